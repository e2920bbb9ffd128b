//! Per-query stage timing, score statistics, and strategy tagging,
//! instrumented via a process-wide Prometheus registry and forwarded,
//! best-effort, to an external metrics sink (spec §4.12/§6).

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use tracing::warn;
use tutor_core::RetrievalStrategy;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref STAGE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "tutor_query_stage_duration_seconds",
            "Duration of a pipeline stage in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["stage"]
    )
    .unwrap();

    pub static ref QUERY_TOTAL_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("tutor_query_total_duration_seconds", "End-to-end query duration in seconds")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0])
    )
    .unwrap();

    pub static ref QUERIES_BY_STRATEGY: IntCounterVec = IntCounterVec::new(
        Opts::new("tutor_queries_by_strategy_total", "Completed queries by retrieval strategy"),
        &["strategy"]
    )
    .unwrap();

    pub static ref CONFIDENCE_THRESHOLD_MET_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "tutor_confidence_threshold_met_total",
            "Completed queries, split by whether the rerank top score met the confidence threshold"
        ),
        &["met"]
    )
    .unwrap();
}

/// Registers this crate's metrics with `REGISTRY`. Call once at process
/// startup (mirrors the teacher's `codegraph-api::metrics` registration
/// pattern).
pub fn register() {
    let _ = REGISTRY.register(Box::new(STAGE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(QUERY_TOTAL_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(QUERIES_BY_STRATEGY.clone()));
    let _ = REGISTRY.register(Box::new(CONFIDENCE_THRESHOLD_MET_TOTAL.clone()));
}

/// Basic descriptive statistics over a set of scores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct ScoreStats {
    pub top: f32,
    pub avg: f32,
    pub min: f32,
    pub stddev: f32,
}

impl ScoreStats {
    pub fn compute(scores: &[f32]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let top = scores.iter().cloned().fold(f32::MIN, f32::max);
        let min = scores.iter().cloned().fold(f32::MAX, f32::min);
        let avg = scores.iter().sum::<f32>() / scores.len() as f32;
        let variance = scores.iter().map(|s| (s - avg).powi(2)).sum::<f32>() / scores.len() as f32;
        Self {
            top,
            avg,
            min,
            stddev: variance.sqrt(),
        }
    }
}

/// One append-only row per query, matching the schema of spec §4.12.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMetricsRow {
    pub query_id: String,
    pub embedding_ms: u64,
    pub vector_search_ms: u64,
    pub graph_traversal_ms: u64,
    pub fusion_ms: u64,
    pub rerank_ms: u64,
    pub total_ms: u64,
    pub vector_result_count: usize,
    pub graph_result_count: usize,
    pub rerank_scores: ScoreStats,
    pub overlap_count: usize,
    pub fused_list_len: usize,
    pub rerank_top_score: f32,
    pub confidence_threshold_met: bool,
    pub final_context_tokens: usize,
    pub citation_count: usize,
    pub strategy: RetrievalStrategy,
    pub vector_error: Option<String>,
    pub graph_error: Option<String>,
    pub cancellation_cause: Option<String>,
}

/// Append-one-row-per-query collaborator (spec §6 "Metrics sink").
/// Best-effort: failures are logged and swallowed, never surfaced to the
/// query path.
#[async_trait::async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, row: QueryMetricsRow) -> Result<(), String>;
}

/// A sink that drops every row. Useful as a default when no external sink
/// is configured, and in tests.
pub struct NullSink;

#[async_trait::async_trait]
impl MetricsSink for NullSink {
    async fn record(&self, _row: QueryMetricsRow) -> Result<(), String> {
        Ok(())
    }
}

/// Instruments every pipeline stage transition and, on query completion,
/// appends one row to the configured sink (spec §4.12).
pub struct MetricsCollector {
    sink: std::sync::Arc<dyn MetricsSink>,
}

impl MetricsCollector {
    pub fn new(sink: std::sync::Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub fn observe_stage(&self, stage: &str, duration: std::time::Duration) {
        STAGE_DURATION_SECONDS
            .with_label_values(&[stage])
            .observe(duration.as_secs_f64());
    }

    /// Updates process-wide gauges/counters and forwards the row to the
    /// external sink; sink errors are logged and never propagated, so a
    /// metrics outage can never fail a query (spec §4.12).
    pub async fn finish(&self, row: QueryMetricsRow) {
        QUERY_TOTAL_SECONDS.observe(row.total_ms as f64 / 1000.0);
        QUERIES_BY_STRATEGY
            .with_label_values(&[strategy_label(row.strategy)])
            .inc();
        CONFIDENCE_THRESHOLD_MET_TOTAL
            .with_label_values(&[if row.confidence_threshold_met { "true" } else { "false" }])
            .inc();

        let query_id = row.query_id.clone();
        if let Err(e) = self.sink.record(row).await {
            warn!(query_id, error = %e, "metrics sink failed to record query row");
        }
    }
}

fn strategy_label(strategy: RetrievalStrategy) -> &'static str {
    match strategy {
        RetrievalStrategy::Hybrid => "hybrid",
        RetrievalStrategy::VectorOnly => "vector_only",
        RetrievalStrategy::GraphOnly => "graph_only",
        RetrievalStrategy::Degraded => "degraded",
    }
}
