use thiserror::Error;

/// Retrieval-side failures. Never fails a query on its own — the
/// orchestrator absorbs these into `RetrievalStrategy` (see `types.rs`).
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("vector backend error: {0}")]
    VectorBackend(String),

    #[error("graph backend error: {0}")]
    GraphBackend(String),

    #[error("embedding error: {0}")]
    Embedding(String),
}

/// Reranker failures. Request-level: no retry, surfaced as a generation
/// failure per spec.
#[derive(Error, Debug)]
pub enum RerankError {
    #[error("reranker backend error: {0}")]
    Backend(String),
}

/// Chat-generation failure kinds. The retryable/non-retryable split drives
/// `tutor-generation`'s backoff policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("context length exceeded: {0}")]
    ContextLength(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("unknown generator error: {0}")]
    Unknown(String),
}

impl GeneratorError {
    /// Whether this kind is eligible for the bounded exponential backoff
    /// retry loop (spec §4.8 / §7).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GeneratorError::Connection(_)
                | GeneratorError::Timeout(_)
                | GeneratorError::RateLimit(_)
                | GeneratorError::ServiceUnavailable(_)
        )
    }

    /// A short, user-facing fallback message keyed by error kind (spec
    /// §4.8 "Fallback").
    pub fn fallback_message(&self) -> &'static str {
        match self {
            GeneratorError::Connection(_) | GeneratorError::ServiceUnavailable(_) => {
                "I'm having trouble reaching the generation service right now. Please try again shortly."
            }
            GeneratorError::Timeout(_) => {
                "The response is taking longer than expected. Please try again."
            }
            GeneratorError::RateLimit(_) => {
                "The generation service is busy. Please try again in a moment."
            }
            GeneratorError::ContextLength(_) => {
                "Your question plus the retrieved context is too long for the model to answer in one pass."
            }
            GeneratorError::ModelNotFound(_) => {
                "The configured generation model is unavailable."
            }
            GeneratorError::Unknown(_) => {
                "Something went wrong while generating a response."
            }
        }
    }
}

/// Throttle (admission controller) failures. Never enter the pipeline —
/// returned synchronously to the caller (spec §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThrottleError {
    #[error("too many concurrent requests, queue is full")]
    QueueFull,
    #[error("timed out waiting for an available slot")]
    QueueTimeout,
}

/// Top-level error taxonomy for the pipeline, composing the per-stage
/// errors above. Mirrors the way the corpus collapses library errors into
/// one flat enum at the crate boundary.
#[derive(Error, Debug)]
pub enum TutorError {
    #[error("admission: {0}")]
    Throttle(#[from] ThrottleError),

    #[error("retrieval: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("rerank: {0}")]
    Rerank(#[from] RerankError),

    #[error("generation: {0}")]
    Generation(#[from] GeneratorError),

    #[error("query exceeded the {0}s overall deadline")]
    QueryTimeout(u64),

    #[error("query cancelled: {0}")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TutorError>;
