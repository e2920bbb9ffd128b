use crate::error::{GeneratorError, RerankError, RetrievalError};
use async_trait::async_trait;

/// Embedding collaborator (spec §6). A single call per query beyond this
/// is out of scope; no query-time fine-tuning.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

/// A single hit returned by the vector store's kNN search, before it is
/// normalized into a `RetrievalResult`.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub fields: crate::types::RawFields,
}

/// Vector store collaborator (spec §6). Metric is cosine; an optional
/// scalar equality filter is supported on one field.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn knn(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        filter_expr: Option<&str>,
    ) -> Result<Vec<VectorHit>, RetrievalError>;

    async fn health(&self) -> bool;
}

/// A concept node matched by the graph retriever's seed lookup.
#[derive(Debug, Clone)]
pub struct ConceptMatch {
    pub concept_id: String,
    pub score: f32,
}

/// A chunk discovered while traversing the concept graph, with the
/// traversal depth of every distinct reached concept it discusses (one
/// entry per concept reached via a `DISCUSSES` edge, not per edge).
#[derive(Debug, Clone)]
pub struct GraphChunkHit {
    pub chunk_id: String,
    pub content: String,
    pub metadata: crate::types::ChunkMetadata,
    pub concept_depths: Vec<usize>,
}

/// Graph store collaborator (spec §6). Queries must be parameterized;
/// concepts and relationship types are passed as parameters / an
/// allow-list, never concatenated into a query string (spec §9).
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Fulltext (preferred) or keyword seed match against the concept-name
    /// index.
    async fn match_concepts(&self, terms: &[String]) -> Result<Vec<ConceptMatch>, RetrievalError>;

    /// Traverse from the given seed concepts along `relationship_types`
    /// up to `max_depth`, then gather chunks that `DISCUSSES` a reached
    /// concept, returning the traversal depth of every distinct reached
    /// concept each chunk discusses (spec §4.2 steps 2-4).
    async fn traverse_and_gather(
        &self,
        seeds: &[ConceptMatch],
        relationship_types: &[String],
        max_depth: usize,
    ) -> Result<Vec<GraphChunkHit>, RetrievalError>;

    async fn health(&self) -> bool;
}

/// A single (index, score) pair returned by the cross-encoder reranker,
/// preserving the subset of input indices it actually scored (spec §6).
#[derive(Debug, Clone)]
pub struct RerankScore {
    pub index: usize,
    pub score: f32,
}

/// Cross-encoder reranker collaborator (spec §6).
#[async_trait]
pub trait RerankerBackend: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<RerankScore>, RerankError>;

    async fn health(&self) -> bool;
}

/// A chat message role, mirrored across the generator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// One incremental piece of a streamed completion.
#[derive(Debug, Clone)]
pub struct GeneratorChunk {
    pub delta: String,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
}

/// Generator collaborator (spec §6/§4.8): blocking `complete` and
/// streaming `stream_complete`, both cancelable via the passed token.
#[async_trait]
pub trait ChatGenerator: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GeneratorError>;

    /// Returns a receiver of streamed chunks. The task producing chunks
    /// must stop promptly once the receiver is dropped (cancellation,
    /// spec §5).
    async fn stream_complete(
        &self,
        messages: &[ChatMessage],
    ) -> Result<tokio::sync::mpsc::Receiver<Result<GeneratorChunk, GeneratorError>>, GeneratorError>;

    async fn health(&self) -> bool;
}
