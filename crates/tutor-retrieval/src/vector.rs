use std::sync::Arc;

use tracing::{debug, warn};
use tutor_core::{ChunkMetadata, Embedder, RetrievalError, RetrievalResult, ResultSource, VectorStore};

/// Embeds the query and performs cosine kNN over a chunk collection with
/// an optional scalar filter (spec §4.1).
///
/// Stateless and safe for concurrent calls — holds only shared, read-only
/// collaborator handles.
pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
}

impl VectorRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
        }
    }

    /// `topic_filter` maps to an equality filter on the `topic_tag` scalar
    /// field (spec §4.1 step 3).
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        topic_filter: Option<&str>,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let embedding = self.embedder.embed_one(query).await?;

        let filter_expr = topic_filter.map(|t| format!("topic_tag == \"{t}\""));

        let hits = self
            .store
            .knn(&self.collection, &embedding, top_k, filter_expr.as_deref())
            .await?;

        if hits.is_empty() {
            debug!("vector retriever: backend returned no hits");
            return Ok(Vec::new());
        }

        let results = hits
            .into_iter()
            .map(|hit| RetrievalResult {
                chunk_id: hit.id,
                content: hit.content,
                score: hit.score,
                source: ResultSource::Vector,
                metadata: decode_metadata(&hit.fields),
            })
            .collect();

        Ok(results)
    }

    /// Forwards to the underlying store's health check (spec §6).
    pub async fn health(&self) -> bool {
        self.store.health().await
    }
}

/// Metadata can arrive from the backend as loosely-typed JSON; decode
/// defensively and fall back to sane defaults rather than failing the
/// whole query over a missing field (spec §4.1 edge cases).
fn decode_metadata(fields: &tutor_core::RawFields) -> ChunkMetadata {
    let get_str = |k: &str| fields.get(k).and_then(|v| v.as_str()).map(|s| s.to_string());
    let get_usize = |k: &str| fields.get(k).and_then(|v| v.as_u64()).map(|v| v as usize);
    let get_bool = |k: &str| fields.get(k).and_then(|v| v.as_bool()).unwrap_or(false);

    let metadata = ChunkMetadata {
        document_id: get_str("document_id").unwrap_or_default(),
        document_title: get_str("document_title").unwrap_or_default(),
        document_url: get_str("document_url").unwrap_or_default(),
        section_header: get_str("section_header"),
        chunk_index: get_usize("chunk_index").unwrap_or(0),
        total_chunks: get_usize("total_chunks").unwrap_or(1),
        token_count: get_usize("token_count").unwrap_or(0),
        has_code: get_bool("has_code"),
        has_formula: get_bool("has_formula"),
        has_table: get_bool("has_table"),
        topic_tag: get_str("topic_tag"),
    };

    if metadata.document_title.is_empty() {
        warn!("vector retriever: hit arrived without document_title metadata");
    }

    metadata
}
