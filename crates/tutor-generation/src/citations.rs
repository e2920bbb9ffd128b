use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use tutor_core::{Citation, RankedResult};

/// Default truncation length for a citation snippet (spec §4.6).
pub const DEFAULT_MAX_SNIPPET_LENGTH: usize = 300;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap());

/// Assigns 1-origin citation ids in ranked order, filters to those
/// actually referenced in a generated answer, renumbers to a contiguous
/// range, and validates marker soundness (spec §4.6).
pub struct CitationRegistry;

impl CitationRegistry {
    /// `createCitations`: one citation per ranked result, in order.
    pub fn create_citations(ranked: &[RankedResult], max_snippet_length: usize) -> Vec<Citation> {
        ranked
            .iter()
            .enumerate()
            .map(|(idx, r)| Citation {
                id: (idx + 1).to_string(),
                chunk_id: r.chunk_id.clone(),
                document_title: r.metadata.document_title.clone(),
                document_url: r.metadata.document_url.clone(),
                snippet: snippet(&r.content, max_snippet_length),
                relevance_score: r.rerank_score,
            })
            .collect()
    }

    /// `filterUsed`: keeps only citations whose marker literally appears
    /// in the answer text.
    pub fn filter_used(citations: &[Citation], answer: &str) -> Vec<Citation> {
        citations
            .iter()
            .filter(|c| answer.contains(&c.marker()))
            .cloned()
            .collect()
    }

    /// `renumber`: compresses citations to a contiguous `[1..m]` range in
    /// order of first appearance in `answer`, rewriting markers in the
    /// text. Duplicate markers collapse to the same new id.
    pub fn renumber(answer: &str, citations: &[Citation]) -> (String, Vec<Citation>) {
        let by_old_id: HashMap<&str, &Citation> =
            citations.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut new_id_by_old: HashMap<String, usize> = HashMap::new();
        let mut ordered_new: Vec<Citation> = Vec::new();

        let rewritten = MARKER_RE.replace_all(answer, |caps: &regex::Captures| {
            let old_id = &caps[1];
            let Some(citation) = by_old_id.get(old_id) else {
                // Unknown marker: leave untouched here, `validate` reports it.
                return caps[0].to_string();
            };

            let new_id = *new_id_by_old.entry(old_id.to_string()).or_insert_with(|| {
                let n = ordered_new.len() + 1;
                ordered_new.push(Citation {
                    id: n.to_string(),
                    ..(*citation).clone()
                });
                n
            });

            format!("[{new_id}]")
        });

        (rewritten.into_owned(), ordered_new)
    }

    /// `validate`: reports ids present in text but absent from `citations`.
    pub fn validate(answer: &str, citations: &[Citation]) -> ValidationReport {
        let known: std::collections::HashSet<&str> = citations.iter().map(|c| c.id.as_str()).collect();
        let mut missing = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for caps in MARKER_RE.captures_iter(answer) {
            let id = caps[1].to_string();
            if !known.contains(id.as_str()) && seen.insert(id.clone()) {
                missing.push(id);
            }
        }

        ValidationReport {
            valid: missing.is_empty(),
            missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub missing: Vec<String>,
}

/// Truncates `content` at the nearest sentence boundary at or before
/// `max_len`; falls back to a word boundary with an ellipsis if no
/// sentence boundary is found in range (spec §4.6).
fn snippet(content: &str, max_len: usize) -> String {
    if content.chars().count() <= max_len {
        return content.to_string();
    }

    let truncated: String = content.chars().take(max_len).collect();

    if let Some(pos) = truncated.rfind(['.', '!', '?']) {
        return truncated[..=pos].trim_end().to_string();
    }

    let word_boundary = truncated.rfind(char::is_whitespace).unwrap_or(truncated.len());
    format!("{}...", truncated[..word_boundary].trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::ChunkMetadata;

    fn metadata(title: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: "d".into(),
            document_title: title.into(),
            document_url: "https://example.org".into(),
            section_header: None,
            chunk_index: 0,
            total_chunks: 1,
            token_count: 10,
            has_code: false,
            has_formula: false,
            has_table: false,
            topic_tag: None,
        }
    }

    fn ranked(chunk_id: &str, title: &str, score: f32) -> RankedResult {
        RankedResult {
            chunk_id: chunk_id.into(),
            content: "A short piece of evidence.".into(),
            rerank_score: score,
            original_fused_score: 0.1,
            metadata: metadata(title),
        }
    }

    #[test]
    fn creates_one_to_one_in_ranked_order() {
        let ranked_list = vec![ranked("c1", "A", 0.9), ranked("c2", "B", 0.7)];
        let citations = CitationRegistry::create_citations(&ranked_list, DEFAULT_MAX_SNIPPET_LENGTH);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].id, "1");
        assert_eq!(citations[1].id, "2");
        assert_eq!(citations[0].chunk_id, "c1");
    }

    #[test]
    fn filter_used_keeps_only_referenced() {
        let ranked_list = vec![ranked("c1", "A", 0.9), ranked("c2", "B", 0.7)];
        let citations = CitationRegistry::create_citations(&ranked_list, DEFAULT_MAX_SNIPPET_LENGTH);
        let answer = "Dynamic programming builds on memoization [1].";
        let used = CitationRegistry::filter_used(&citations, answer);
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].id, "1");
    }

    #[test]
    fn filter_used_is_idempotent() {
        let ranked_list = vec![ranked("c1", "A", 0.9), ranked("c2", "B", 0.7)];
        let citations = CitationRegistry::create_citations(&ranked_list, DEFAULT_MAX_SNIPPET_LENGTH);
        let answer = "See [1] and [1] again.";
        let once = CitationRegistry::filter_used(&citations, answer);
        let twice = CitationRegistry::filter_used(&once, answer);
        assert_eq!(once.len(), twice.len());
        assert_eq!(once[0].id, twice[0].id);
    }

    #[test]
    fn renumber_compresses_to_first_appearance_order() {
        let ranked_list = vec![ranked("c1", "A", 0.9), ranked("c2", "B", 0.7), ranked("c3", "C", 0.5)];
        let citations = CitationRegistry::create_citations(&ranked_list, DEFAULT_MAX_SNIPPET_LENGTH);
        let answer = "First [3], then [1], then [3] again.";
        let (new_answer, new_citations) = CitationRegistry::renumber(answer, &citations);
        assert_eq!(new_answer, "First [1], then [2], then [1] again.");
        assert_eq!(new_citations.len(), 2);
        assert_eq!(new_citations[0].chunk_id, "c3");
        assert_eq!(new_citations[1].chunk_id, "c1");
    }

    #[test]
    fn renumber_is_idempotent() {
        let ranked_list = vec![ranked("c1", "A", 0.9), ranked("c2", "B", 0.7)];
        let citations = CitationRegistry::create_citations(&ranked_list, DEFAULT_MAX_SNIPPET_LENGTH);
        let answer = "See [2] then [1].";
        let (once_answer, once_citations) = CitationRegistry::renumber(answer, &citations);
        let (twice_answer, twice_citations) = CitationRegistry::renumber(&once_answer, &once_citations);
        assert_eq!(once_answer, twice_answer);
        assert_eq!(once_citations.len(), twice_citations.len());
    }

    #[test]
    fn validate_reports_unknown_marker() {
        let ranked_list = vec![ranked("c1", "A", 0.9)];
        let citations = CitationRegistry::create_citations(&ranked_list, DEFAULT_MAX_SNIPPET_LENGTH);
        let report = CitationRegistry::validate("See [1] and also [5].", &citations);
        assert!(!report.valid);
        assert_eq!(report.missing, vec!["5".to_string()]);
    }

    #[test]
    fn validate_passes_when_all_markers_known() {
        let ranked_list = vec![ranked("c1", "A", 0.9)];
        let citations = CitationRegistry::create_citations(&ranked_list, DEFAULT_MAX_SNIPPET_LENGTH);
        let report = CitationRegistry::validate("See [1].", &citations);
        assert!(report.valid);
        assert!(report.missing.is_empty());
    }

    #[test]
    fn snippet_truncates_at_sentence_boundary() {
        let long = "Sentence one is here. Sentence two follows and is also fairly short. Sentence three goes on for a while longer than the limit allows so it should never show up.";
        let s = snippet(long, 60);
        assert!(s.ends_with('.'));
        assert!(s.chars().count() <= 60);
    }

    #[test]
    fn snippet_falls_back_to_word_boundary_with_ellipsis() {
        let long = "supercalifragilisticexpialidocious ".repeat(10);
        let s = snippet(&long, 20);
        assert!(s.ends_with("..."));
    }

    #[test]
    fn snippet_passthrough_when_short_enough() {
        let short = "Short content.";
        assert_eq!(snippet(short, 300), short);
    }
}
