use std::sync::Arc;

use tutor_core::{RerankError, RerankerBackend};

/// One scored candidate out of `Reranker::rerank`'s output (spec §4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct RerankedCandidate {
    pub index: usize,
    pub content: String,
    pub score: f32,
    pub above_threshold: bool,
}

/// Scores `(query, candidate)` pairs with a cross-encoder, sorts
/// descending, and truncates to `top_n`.
///
/// Open question 3 is resolved per spec: when zero items clear the
/// threshold, the top-N are kept regardless and marked
/// `above_threshold = false` — `ConfidenceClassifier` alone decides
/// whether the evidence is sufficient.
pub struct Reranker {
    backend: Arc<dyn RerankerBackend>,
    top_n: usize,
    confidence_threshold: f32,
}

impl Reranker {
    pub fn new(backend: Arc<dyn RerankerBackend>, top_n: usize, confidence_threshold: f32) -> Self {
        Self {
            backend,
            top_n,
            confidence_threshold,
        }
    }

    pub async fn rerank(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<RerankedCandidate>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self.backend.rerank(query, &documents).await?;

        let mut candidates: Vec<RerankedCandidate> = scores
            .into_iter()
            .filter_map(|s| {
                documents.get(s.index).map(|content| RerankedCandidate {
                    index: s.index,
                    content: content.clone(),
                    score: s.score,
                    above_threshold: s.score >= self.confidence_threshold,
                })
            })
            .collect();

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(self.top_n);

        Ok(candidates)
    }

    /// Forwards to the underlying backend's health check (spec §6).
    pub async fn health(&self) -> bool {
        self.backend.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tutor_core::RerankScore;

    struct MockBackend {
        scores: Vec<RerankScore>,
    }

    #[async_trait]
    impl RerankerBackend for MockBackend {
        async fn rerank(&self, _query: &str, _documents: &[String]) -> Result<Vec<RerankScore>, RerankError> {
            Ok(self.scores.clone())
        }
        async fn health(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn sorts_descending_and_truncates_to_top_n() {
        let backend = MockBackend {
            scores: vec![
                RerankScore { index: 2, score: 0.63 },
                RerankScore { index: 0, score: 0.88 },
                RerankScore { index: 1, score: 0.71 },
            ],
        };
        let reranker = Reranker::new(Arc::new(backend), 2, 0.6);
        let docs = vec!["V1".into(), "G1".into(), "V2".into()];
        let ranked = reranker.rerank("q", docs).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].content, "V1");
        assert_eq!(ranked[1].content, "G1");
        assert!(ranked.iter().all(|c| c.above_threshold));
    }

    #[tokio::test]
    async fn keeps_top_n_even_when_none_clear_threshold() {
        let backend = MockBackend {
            scores: vec![
                RerankScore { index: 0, score: 0.2 },
                RerankScore { index: 1, score: 0.1 },
            ],
        };
        let reranker = Reranker::new(Arc::new(backend), 5, 0.6);
        let docs = vec!["a".into(), "b".into()];
        let ranked = reranker.rerank("q", docs).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|c| !c.above_threshold));
    }

    #[tokio::test]
    async fn empty_documents_short_circuits() {
        let backend = MockBackend { scores: vec![] };
        let reranker = Reranker::new(Arc::new(backend), 5, 0.6);
        let ranked = reranker.rerank("q", vec![]).await.unwrap();
        assert!(ranked.is_empty());
    }
}
