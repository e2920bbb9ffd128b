use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tutor_core::{RerankError, RerankScore, RerankerBackend};
use tracing::warn;

/// Jina-shaped `POST /rerank` cross-encoder client (spec §6 "Reranker
/// collaborator"), grounded directly on `codegraph-vector::reranking::jina`.
pub struct HttpReranker {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultWire>,
}

#[derive(Deserialize)]
struct RerankResultWire {
    index: usize,
    relevance_score: f32,
}

impl HttpReranker {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl RerankerBackend for HttpReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>, RerankError> {
        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&RerankRequest {
                model: &self.model,
                query,
                documents,
            })
            .send()
            .await
            .map_err(|e| RerankError::Backend(format!("rerank request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RerankError::Backend(format!(
                "reranker backend returned {status}: {body}"
            )));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| RerankError::Backend(format!("failed to parse rerank response: {e}")))?;

        if parsed.results.len() != documents.len() {
            warn!(
                scored = parsed.results.len(),
                submitted = documents.len(),
                "reranker scored a different count than was submitted"
            );
        }

        Ok(parsed
            .results
            .into_iter()
            .map(|r| RerankScore {
                index: r.index,
                score: r.relevance_score,
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
