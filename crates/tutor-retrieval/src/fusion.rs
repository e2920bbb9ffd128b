use std::collections::HashMap;

use tutor_core::{FusedResult, ResultSource, RetrievalResult};

/// Default RRF constant `k` (spec §4.3).
pub const DEFAULT_RRF_K: usize = 60;

struct Accumulator {
    content: String,
    metadata: tutor_core::ChunkMetadata,
    fused_score: f32,
    vector_rank: Option<usize>,
    graph_rank: Option<usize>,
}

/// Merges N ranked lists via Reciprocal Rank Fusion: for each item at
/// 1-origin rank `r` in a list, add `1/(k+r)` to its fused score and
/// record the rank under its source label (spec §4.3).
///
/// Idempotent under identical inputs, symmetric across lists, and
/// rank-monotone: moving an item up in any input list cannot decrease its
/// fused score (spec §8 invariant 4).
pub fn fuse(lists: &[Vec<RetrievalResult>], k: usize) -> Vec<FusedResult> {
    let mut acc: HashMap<String, Accumulator> = HashMap::new();

    for list in lists {
        for (idx, item) in list.iter().enumerate() {
            let rank = idx + 1;
            let contribution = 1.0 / (k as f32 + rank as f32);

            let entry = acc.entry(item.chunk_id.clone()).or_insert_with(|| Accumulator {
                content: item.content.clone(),
                metadata: item.metadata.clone(),
                fused_score: 0.0,
                vector_rank: None,
                graph_rank: None,
            });

            entry.fused_score += contribution;
            match item.source {
                ResultSource::Vector => entry.vector_rank.get_or_insert(rank),
                ResultSource::Graph => entry.graph_rank.get_or_insert(rank),
            };
        }
    }

    let mut fused: Vec<FusedResult> = acc
        .into_iter()
        .map(|(chunk_id, a)| FusedResult {
            chunk_id,
            content: a.content,
            fused_score: a.fused_score,
            vector_rank: a.vector_rank,
            graph_rank: a.graph_rank,
            metadata: a.metadata,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    fused
}

/// Number of fused items whose ranks came from two or more sources.
pub fn overlap_count(fused: &[FusedResult]) -> usize {
    fused
        .iter()
        .filter(|f| f.vector_rank.is_some() && f.graph_rank.is_some())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::ChunkMetadata;

    fn metadata() -> ChunkMetadata {
        ChunkMetadata {
            document_id: "d".into(),
            document_title: "t".into(),
            document_url: "u".into(),
            section_header: None,
            chunk_index: 0,
            total_chunks: 1,
            token_count: 1,
            has_code: false,
            has_formula: false,
            has_table: false,
            topic_tag: None,
        }
    }

    fn result(chunk_id: &str, score: f32, source: ResultSource) -> RetrievalResult {
        RetrievalResult {
            chunk_id: chunk_id.into(),
            content: format!("content {chunk_id}"),
            score,
            source,
            metadata: metadata(),
        }
    }

    #[test]
    fn single_list_matches_canonical_baseline() {
        let list = vec![
            result("a", 0.9, ResultSource::Vector),
            result("b", 0.8, ResultSource::Vector),
        ];
        let fused = fuse(&[list], DEFAULT_RRF_K);
        assert_eq!(fused[0].fused_score, 1.0 / (DEFAULT_RRF_K as f32 + 1.0));
        assert_eq!(fused[1].fused_score, 1.0 / (DEFAULT_RRF_K as f32 + 2.0));
    }

    #[test]
    fn two_empty_lists_fuse_to_empty() {
        let fused = fuse(&[vec![], vec![]], DEFAULT_RRF_K);
        assert!(fused.is_empty());
    }

    #[test]
    fn one_empty_plus_nonempty_equals_nonempty_baseline() {
        let list = vec![result("a", 0.9, ResultSource::Vector)];
        let fused_with_empty = fuse(&[list.clone(), vec![]], DEFAULT_RRF_K);
        let fused_alone = fuse(&[list], DEFAULT_RRF_K);
        assert_eq!(fused_with_empty[0].fused_score, fused_alone[0].fused_score);
    }

    #[test]
    fn fused_score_is_monotone_non_increasing_along_list() {
        let vector_list = vec![
            result("v1", 0.92, ResultSource::Vector),
            result("v2", 0.81, ResultSource::Vector),
        ];
        let graph_list = vec![
            result("g1", 0.74, ResultSource::Graph),
            result("v1", 0.68, ResultSource::Graph),
        ];
        let fused = fuse(&[vector_list, graph_list], DEFAULT_RRF_K);
        for w in fused.windows(2) {
            assert!(w[0].fused_score >= w[1].fused_score);
        }
        assert_eq!(overlap_count(&fused), 1);
        assert_eq!(fused[0].chunk_id, "v1");
    }

    #[test]
    fn idempotent_under_identical_inputs() {
        let list = vec![result("a", 0.9, ResultSource::Vector), result("b", 0.5, ResultSource::Vector)];
        let first = fuse(&[list.clone()], DEFAULT_RRF_K);
        let second = fuse(&[list], DEFAULT_RRF_K);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chunk_id, b.chunk_id);
            assert_eq!(a.fused_score, b.fused_score);
        }
    }

    #[test]
    fn rank_monotone_moving_item_up_never_decreases_score() {
        // "a" at rank 2 vs rank 1 in the same single list.
        let low_rank = vec![result("x", 0.5, ResultSource::Vector), result("a", 0.4, ResultSource::Vector)];
        let high_rank = vec![result("a", 0.9, ResultSource::Vector), result("x", 0.1, ResultSource::Vector)];

        let fused_low = fuse(&[low_rank], DEFAULT_RRF_K);
        let fused_high = fuse(&[high_rank], DEFAULT_RRF_K);

        let a_low = fused_low.iter().find(|f| f.chunk_id == "a").unwrap().fused_score;
        let a_high = fused_high.iter().find(|f| f.chunk_id == "a").unwrap().fused_score;
        assert!(a_high >= a_low);
    }

    proptest::proptest! {
        #[test]
        fn symmetric_across_list_order(seed in 0u64..1000) {
            use rand::{rngs::StdRng, SeedableRng, Rng};
            let mut rng = StdRng::seed_from_u64(seed);
            let n = rng.gen_range(0..6);
            let vector_list: Vec<RetrievalResult> = (0..n)
                .map(|i| result(&format!("c{i}"), 1.0 - i as f32 * 0.1, ResultSource::Vector))
                .collect();
            let graph_list: Vec<RetrievalResult> = (0..n)
                .map(|i| result(&format!("c{}", n - 1 - i), 1.0 - i as f32 * 0.1, ResultSource::Graph))
                .collect();

            let forward = fuse(&[vector_list.clone(), graph_list.clone()], DEFAULT_RRF_K);
            let backward = fuse(&[graph_list, vector_list], DEFAULT_RRF_K);

            let mut forward_scores: Vec<(String, f32)> = forward.into_iter().map(|f| (f.chunk_id, f.fused_score)).collect();
            let mut backward_scores: Vec<(String, f32)> = backward.into_iter().map(|f| (f.chunk_id, f.fused_score)).collect();
            forward_scores.sort_by(|a, b| a.0.cmp(&b.0));
            backward_scores.sort_by(|a, b| a.0.cmp(&b.0));
            prop_assert_eq!(forward_scores, backward_scores);
        }
    }
}
