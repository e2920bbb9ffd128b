pub mod confidence;
pub mod reranker;

pub use confidence::{confidence_level, insufficient_evidence, DEFAULT_CONFIDENCE_THRESHOLD};
pub use reranker::{RerankedCandidate, Reranker};
