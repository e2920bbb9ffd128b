//! Concrete, reqwest-backed implementations of the five collaborator
//! traits from `tutor_core::traits` (spec §6). These are binary-level
//! wiring only — every pipeline crate sees nothing but the trait objects
//! built here, following `codegraph-vector`'s provider-per-backend layout
//! (`ollama_embedding_provider.rs`, `reranking/jina.rs`).

pub mod embedder;
pub mod generator;
pub mod graph_store;
pub mod reranker;
pub mod vector_store;

pub use embedder::HttpEmbedder;
pub use generator::HttpChatGenerator;
pub use graph_store::HttpGraphStore;
pub use reranker::HttpReranker;
pub use vector_store::HttpVectorStore;
