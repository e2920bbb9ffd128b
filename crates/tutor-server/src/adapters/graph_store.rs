use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tutor_core::{ChunkMetadata, ConceptMatch, GraphChunkHit, GraphStore, RetrievalError};

/// HTTP client for the labeled property graph's query surface (spec §6
/// "Graph store collaborator"): a fulltext/keyword seed lookup plus a
/// bounded-depth traversal-and-gather call, each a parameterized POST —
/// concepts and relationship types travel as request-body values, never
/// concatenated into a query string (spec §9).
pub struct HttpGraphStore {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct MatchConceptsRequest<'a> {
    terms: &'a [String],
}

#[derive(Deserialize)]
struct MatchConceptsResponse {
    matches: Vec<ConceptMatchWire>,
}

#[derive(Deserialize)]
struct ConceptMatchWire {
    concept_id: String,
    score: f32,
}

#[derive(Serialize)]
struct TraverseRequest<'a> {
    seed_concept_ids: Vec<&'a str>,
    relationship_types: &'a [String],
    max_depth: usize,
}

#[derive(Deserialize)]
struct TraverseResponse {
    chunks: Vec<ChunkHitWire>,
}

#[derive(Deserialize)]
struct ChunkHitWire {
    chunk_id: String,
    content: String,
    metadata: ChunkMetadata,
    /// Traversal depth of each distinct reached concept this chunk
    /// discusses via a `DISCUSSES` edge (spec §4.2 steps 3-4).
    concept_depths: Vec<usize>,
}

impl HttpGraphStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    async fn match_concepts(&self, terms: &[String]) -> Result<Vec<ConceptMatch>, RetrievalError> {
        let response = self
            .client
            .post(format!("{}/concepts/match", self.base_url))
            .json(&MatchConceptsRequest { terms })
            .send()
            .await
            .map_err(|e| RetrievalError::GraphBackend(format!("concept match request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(RetrievalError::GraphBackend(format!(
                "graph backend returned {status} for concept match"
            )));
        }

        let parsed: MatchConceptsResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::GraphBackend(format!("failed to parse concept match response: {e}")))?;

        Ok(parsed
            .matches
            .into_iter()
            .map(|m| ConceptMatch {
                concept_id: m.concept_id,
                score: m.score,
            })
            .collect())
    }

    async fn traverse_and_gather(
        &self,
        seeds: &[ConceptMatch],
        relationship_types: &[String],
        max_depth: usize,
    ) -> Result<Vec<GraphChunkHit>, RetrievalError> {
        let seed_concept_ids: Vec<&str> = seeds.iter().map(|s| s.concept_id.as_str()).collect();

        let response = self
            .client
            .post(format!("{}/concepts/traverse", self.base_url))
            .json(&TraverseRequest {
                seed_concept_ids,
                relationship_types,
                max_depth,
            })
            .send()
            .await
            .map_err(|e| RetrievalError::GraphBackend(format!("traversal request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(RetrievalError::GraphBackend(format!(
                "graph backend returned {status} for traversal"
            )));
        }

        let parsed: TraverseResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::GraphBackend(format!("failed to parse traversal response: {e}")))?;

        Ok(parsed
            .chunks
            .into_iter()
            .map(|c| GraphChunkHit {
                chunk_id: c.chunk_id,
                content: c.content,
                metadata: c.metadata,
                concept_depths: c.concept_depths,
            })
            .collect())
    }

    async fn health(&self) -> bool {
        self.client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
            .ok()
            .and_then(|r| if r.status().is_success() { Some(()) } else { None })
            .is_some()
    }
}
