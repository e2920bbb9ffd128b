use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tutor_core::{RawFields, RetrievalError, VectorHit};

/// Qdrant-shaped `POST /collections/{name}/points/search` client (spec §6
/// "Vector store collaborator"): cosine kNN with an optional scalar
/// equality filter, grounded on the teacher's reqwest-client-plus-typed-
/// request/response pattern (`ollama_embedding_provider.rs`).
pub struct HttpVectorStore {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Filter>,
}

#[derive(Serialize)]
struct Filter {
    must: Vec<FieldCondition>,
}

#[derive(Serialize)]
struct FieldCondition {
    key: String,
    #[serde(rename = "match")]
    matches: MatchValue,
}

#[derive(Serialize)]
struct MatchValue {
    value: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: serde_json::Map<String, serde_json::Value>,
}

impl HttpVectorStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }

    /// `topic_tag == "<value>"` is the only filter expression the spec
    /// requires (§4.1 step 3); parse it back into Qdrant's field-match
    /// shape rather than threading a second trait parameter through.
    fn parse_filter(filter_expr: Option<&str>) -> Option<Filter> {
        let expr = filter_expr?;
        let (key, value) = expr.split_once("==")?;
        let key = key.trim().to_string();
        let value = value.trim().trim_matches('"').to_string();
        Some(Filter {
            must: vec![FieldCondition {
                key,
                matches: MatchValue { value },
            }],
        })
    }
}

#[async_trait]
impl tutor_core::VectorStore for HttpVectorStore {
    async fn knn(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        filter_expr: Option<&str>,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        let request = SearchRequest {
            vector: query_vector,
            limit: k,
            with_payload: true,
            filter: Self::parse_filter(filter_expr),
        };

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.base_url, collection
            ))
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::VectorBackend(format!("kNN request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::VectorBackend(format!(
                "vector backend returned {status}: {body}"
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::VectorBackend(format!("failed to parse search response: {e}")))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|point| {
                let content = point
                    .payload
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let mut fields: RawFields = point.payload.into_iter().collect();
                fields.remove("content");
                VectorHit {
                    id: point.id.as_str().map(str::to_string).unwrap_or_else(|| point.id.to_string()),
                    score: point.score,
                    content,
                    fields,
                }
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
