use std::sync::Arc;

use tracing::debug;
use tutor_core::{GraphStore, RetrievalError, RetrievalResult, ResultSource};

/// Default allow-list of traversable relationship labels (spec §4.2).
pub const DEFAULT_RELATIONSHIP_TYPES: &[&str] = &[
    "PREREQUISITE",
    "RELATED_TO",
    "COMPARED_TO",
    "PART_OF",
    "DISCUSSES",
];

const MAX_KEYWORD_SEEDS: usize = 5;
const MIN_KEYWORD_LEN: usize = 4;

/// Matches the query to concept nodes, traverses typed relationships up to
/// a bounded depth, and gathers chunks that discuss reached concepts,
/// scored by inverse depth (spec §4.2).
pub struct GraphRetriever {
    store: Arc<dyn GraphStore>,
    max_depth: usize,
    relationship_types: Vec<String>,
    use_fulltext_search: bool,
}

impl GraphRetriever {
    pub fn new(
        store: Arc<dyn GraphStore>,
        max_depth: usize,
        relationship_types: Vec<String>,
        use_fulltext_search: bool,
    ) -> Self {
        Self {
            store,
            max_depth,
            relationship_types,
            use_fulltext_search,
        }
    }

    pub fn with_defaults(store: Arc<dyn GraphStore>) -> Self {
        Self::new(
            store,
            2,
            DEFAULT_RELATIONSHIP_TYPES.iter().map(|s| s.to_string()).collect(),
            true,
        )
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let seed_terms = seed_terms(query, self.use_fulltext_search);
        if seed_terms.is_empty() {
            return Ok(Vec::new());
        }

        let seeds = self.store.match_concepts(&seed_terms).await?;
        if seeds.is_empty() {
            debug!("graph retriever: no seed concept matches for query");
            return Ok(Vec::new());
        }

        let hits = self
            .store
            .traverse_and_gather(&seeds, &self.relationship_types, self.max_depth)
            .await?;

        let mut results: Vec<RetrievalResult> = hits
            .into_iter()
            .map(|hit| {
                // Sum 1/(1+depth) over every distinct reached concept this
                // chunk discusses, then normalize the aggregate (spec §4.2
                // steps 4-5). A chunk discussing several reached concepts
                // scores higher than one discussing a single shallow one.
                let raw: f32 = hit
                    .concept_depths
                    .iter()
                    .map(|&depth| 1.0 / (1.0 + depth as f32))
                    .sum();
                RetrievalResult {
                    chunk_id: hit.chunk_id,
                    content: hit.content,
                    score: normalize(raw),
                    source: ResultSource::Graph,
                    metadata: hit.metadata,
                }
            })
            .collect();

        // Descending by score, lexicographic chunk_id tie-break (spec §4.2).
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(top_k);

        Ok(results)
    }

    /// Forwards to the underlying store's health check (spec §6).
    pub async fn health(&self) -> bool {
        self.store.health().await
    }
}

/// `1 / (1 + e^-(s-1))`, mapping the raw depth aggregate into (0, 1)
/// (spec §4.2 step 5).
fn normalize(s: f32) -> f32 {
    1.0 / (1.0 + (-(s - 1.0)).exp())
}

/// Derives seed search terms from the query. When fulltext search is
/// available upstream, the escaped raw query is used as a single term;
/// otherwise fall back to lowercase tokens of at least `MIN_KEYWORD_LEN`
/// chars, capped at `MAX_KEYWORD_SEEDS` (spec §4.2 step 1).
fn seed_terms(query: &str, use_fulltext_search: bool) -> Vec<String> {
    if use_fulltext_search {
        let escaped = escape_fulltext(query);
        if escaped.trim().is_empty() {
            return Vec::new();
        }
        return vec![escaped];
    }

    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().filter(|c| c.is_alphanumeric()).count() >= MIN_KEYWORD_LEN)
        .take(MAX_KEYWORD_SEEDS)
        .collect()
}

/// Escapes characters the fulltext engine treats as operators, so user
/// input can never be interpreted as query syntax (spec §4.2 edge cases,
/// §9 "never concatenate user input into a query string").
fn escape_fulltext(query: &str) -> String {
    const OPERATORS: &[char] = &['+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\', '/'];
    query
        .chars()
        .map(|c| if OPERATORS.contains(&c) { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
