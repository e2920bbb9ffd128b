use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Structural metadata attached to every chunk. Chunks are immutable once
/// ingested; retrievers only ever read them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub document_title: String,
    pub document_url: String,
    pub section_header: Option<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub token_count: usize,
    pub has_code: bool,
    pub has_formula: bool,
    pub has_table: bool,
    /// Free-form scalar tag used by `VectorRetriever`'s optional filter.
    pub topic_tag: Option<String>,
}

/// An atomic unit of retrieved text, owned by the ingestion subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Which first-stage backend a `RetrievalResult` came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Vector,
    Graph,
}

/// A single hit from one retrieval backend. Scores are never compared
/// across sources directly; fusion operates on ranks (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub content: String,
    pub score: f32,
    pub source: ResultSource,
    pub metadata: ChunkMetadata,
}

/// The result of fusing one or more ranked lists via Reciprocal Rank
/// Fusion. Identity is `chunk_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedResult {
    pub chunk_id: String,
    pub content: String,
    pub fused_score: f32,
    pub vector_rank: Option<usize>,
    pub graph_rank: Option<usize>,
    pub metadata: ChunkMetadata,
}

/// The canonical "best evidence" list, produced by the reranker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk_id: String,
    pub content: String,
    pub rerank_score: f32,
    pub original_fused_score: f32,
    pub metadata: ChunkMetadata,
}

/// A citation offered to the generator and, if referenced, returned to the
/// caller. One-to-one with a `RankedResult` at creation time; may be
/// filtered and renumbered after generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub chunk_id: String,
    pub document_title: String,
    pub document_url: String,
    pub snippet: String,
    pub relevance_score: f32,
}

impl Citation {
    /// The literal marker this citation's id would appear as in answer
    /// text, e.g. `[3]`.
    pub fn marker(&self) -> String {
        format!("[{}]", self.id)
    }
}

/// Derived classification of the top rerank score; never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    Insufficient,
}

/// Which first-stage sources actually produced results for this query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    Hybrid,
    VectorOnly,
    GraphOnly,
    Degraded,
}

impl RetrievalStrategy {
    pub fn from_presence(vector_nonempty: bool, graph_nonempty: bool) -> Self {
        match (vector_nonempty, graph_nonempty) {
            (true, true) => RetrievalStrategy::Hybrid,
            (true, false) => RetrievalStrategy::VectorOnly,
            (false, true) => RetrievalStrategy::GraphOnly,
            (false, false) => RetrievalStrategy::Degraded,
        }
    }
}

/// Tagged-union stream events emitted to the caller (spec §3 StreamEvent,
/// §4.9 StreamMultiplexer). One Rust enum, exhaustively matched at the SSE
/// boundary, in place of the source's class hierarchy (see §9 design
/// notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Confidence {
        level: ConfidenceLevel,
        has_insufficient_evidence: bool,
        top_score: f32,
    },
    Token {
        content: String,
    },
    Citation {
        citation: Citation,
    },
    Metadata {
        strategy: RetrievalStrategy,
        citation_count: usize,
        final_context_tokens: usize,
        total_duration_ms: u64,
    },
    Done,
    Error {
        message: String,
    },
}

/// Finished, non-streamed response returned by `Orchestrator::query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: ConfidenceLevel,
    pub insufficient_evidence: bool,
    pub strategy: RetrievalStrategy,
}

/// Free-form metadata map used when a collaborator hands back fields the
/// core model does not know about; decoded defensively (spec §4.1 edge
/// cases: "metadata may arrive as encoded string").
pub type RawFields = HashMap<String, serde_json::Value>;
