pub mod fusion;
pub mod graph;
pub mod vector;

pub use fusion::{fuse, overlap_count, DEFAULT_RRF_K};
pub use graph::{GraphRetriever, DEFAULT_RELATIONSHIP_TYPES};
pub use vector::VectorRetriever;
