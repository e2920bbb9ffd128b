use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::warn;

use tutor_core::{
    ChatGenerator, Citation, ConfidenceLevel, Embedder, FusedResult, GeneratorChunk,
    GraphStore, PipelineConfig, QueryResponse, RankedResult, RerankerBackend, RetrievalStrategy,
    StreamEvent, VectorStore,
};
use tutor_generation::{CitationRegistry, Generator, PromptAssembler, StreamMultiplexer, DEFAULT_CHANNEL_CAPACITY};
use tutor_metrics::{MetricsCollector, QueryMetricsRow, ScoreStats};
use tutor_rerank::{confidence_level, insufficient_evidence, Reranker};
use tutor_retrieval::{fuse, overlap_count, GraphRetriever, VectorRetriever};
use tutor_throttle::Throttle;

/// Per-phase soft deadline; retrieval legs that exceed it degrade to an
/// absorbed error rather than failing the query (spec §5 "Timeouts").
const RETRIEVAL_PHASE: Duration = Duration::from_secs(10);
/// Per-phase soft deadline on the generation leg.
const GENERATION_PHASE: Duration = Duration::from_secs(90);
/// Hard bound on the blocking `query` call.
const COMPLETE_QUERY_MAX: Duration = Duration::from_secs(120);
/// Soft SLO on admission-to-first-token latency; a miss only warns.
const FIRST_TOKEN_TARGET: Duration = Duration::from_secs(3);

/// End-to-end per-query coordinator (spec §4.10). Wires the throttle,
/// both retrievers, fusion, reranking, confidence classification, citation
/// registry, prompt assembly, and grounded generation into one state
/// machine: `Admitted -> Retrieved -> Fused -> Reranked -> Classified ->
/// Cited -> Prompted -> Streaming -> Terminal`.
pub struct Orchestrator {
    vector_retriever: VectorRetriever,
    graph_retriever: Option<GraphRetriever>,
    reranker: Reranker,
    generator: Generator,
    throttle: Throttle,
    metrics: Arc<MetricsCollector>,
    pipeline: PipelineConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        vector_collection: impl Into<String>,
        graph_store: Option<Arc<dyn GraphStore>>,
        reranker_backend: Arc<dyn RerankerBackend>,
        chat_generator: Arc<dyn ChatGenerator>,
        throttle: Throttle,
        metrics: Arc<MetricsCollector>,
        pipeline: PipelineConfig,
        graph_max_depth: usize,
        graph_relationship_types: Vec<String>,
        graph_use_fulltext_search: bool,
        retry: tutor_core::RetryConfig,
    ) -> Self {
        let graph_retriever = graph_store.map(|store| {
            GraphRetriever::new(
                store,
                graph_max_depth,
                graph_relationship_types,
                graph_use_fulltext_search,
            )
        });

        Self {
            vector_retriever: VectorRetriever::new(embedder, vector_store, vector_collection),
            graph_retriever,
            reranker: Reranker::new(
                reranker_backend,
                pipeline.rerank_top_k,
                pipeline.confidence_threshold,
            ),
            generator: Generator::new(chat_generator, retry),
            throttle,
            metrics,
            pipeline,
        }
    }

    /// Blocking entry point (spec §4.10 "Blocking mode"): awaits full
    /// completion, filters citations to those actually referenced, and
    /// returns one finished response record. Bounded by
    /// `COMPLETE_QUERY_MAX`.
    pub async fn query(
        &self,
        question: &str,
        topic_filter: Option<&str>,
    ) -> tutor_core::Result<QueryResponse> {
        match tokio::time::timeout(COMPLETE_QUERY_MAX, self.query_inner(question, topic_filter)).await {
            Ok(result) => result,
            Err(_) => Err(tutor_core::TutorError::QueryTimeout(COMPLETE_QUERY_MAX.as_secs())),
        }
    }

    async fn query_inner(
        &self,
        question: &str,
        topic_filter: Option<&str>,
    ) -> tutor_core::Result<QueryResponse> {
        let admitted_at = Instant::now();
        let permit = self.throttle.acquire().await?;

        let staged = self.run_to_prompt(question, topic_filter).await;
        let answer = self
            .generator
            .complete_with_fallback(&staged.messages)
            .await;

        let referenced = CitationRegistry::filter_used(&staged.citations, &answer);
        // Compress to a contiguous 1..m range in order of first appearance
        // so every marker left in the answer maps to an in-range citation
        // (spec §8 invariant 7, §4.6 "renumber").
        let (answer, referenced) = CitationRegistry::renumber(&answer, &referenced);
        let total_duration_ms = admitted_at.elapsed().as_millis() as u64;

        self.record_metrics(&staged, referenced.len(), total_duration_ms, None)
            .await;
        permit.release();

        Ok(QueryResponse {
            answer,
            citations: referenced,
            confidence: staged.level,
            insufficient_evidence: staged.insufficient_evidence,
            strategy: staged.strategy,
        })
    }

    /// Streaming entry point. Returns a bounded receiver of `StreamEvent`s;
    /// the caller is the SSE boundary. Dropping the receiver is the
    /// cancellation signal (spec §5 "Cancellation") — the background task
    /// stops pulling from the generator, releases the throttle slot, and
    /// still records a metrics row tagged with the cancellation cause.
    pub async fn stream_query(
        self: Arc<Self>,
        question: String,
        topic_filter: Option<String>,
    ) -> tutor_core::Result<mpsc::Receiver<StreamEvent>> {
        let admitted_at = Instant::now();
        let permit = self.throttle.acquire().await?;

        let (out_tx, out_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let staged = self.run_to_prompt(&question, topic_filter.as_deref()).await;

            let gen_rx = match tokio::time::timeout(
                GENERATION_PHASE,
                self.generator.stream(&staged.messages),
            )
            .await
            {
                Ok(Ok(rx)) => rx,
                Ok(Err(e)) => fallback_chunk_receiver(e.fallback_message()),
                Err(_) => fallback_chunk_receiver("The response is taking longer than expected. Please try again."),
            };

            let (inner_tx, inner_rx) = mpsc::channel::<StreamEvent>(DEFAULT_CHANNEL_CAPACITY);

            let mux = StreamMultiplexer::new(&staged.citations);
            let final_context_tokens = staged.final_context_tokens;
            let strategy = staged.strategy;
            let level = staged.level;
            let insufficient_evidence = staged.insufficient_evidence;
            let top_score = staged.top_score;

            // GENERATION_PHASE bounds opening the generator's stream (the
            // I/O call above); once tokens are flowing, pacing is the
            // consumer's backpressure, not a fixed deadline (spec §5).
            let run_fut = mux.run(
                level,
                insufficient_evidence,
                top_score,
                gen_rx,
                inner_tx,
                strategy,
                final_context_tokens,
                admitted_at.elapsed().as_millis() as u64,
            );

            let relay_fut = relay_with_slo_warning(inner_rx, out_tx, admitted_at);

            let (completed, relayed_fully) = tokio::join!(run_fut, relay_fut);

            let cancellation_cause = if !completed || !relayed_fully {
                Some("consumer disconnected before stream terminated".to_string())
            } else {
                None
            };

            let total_duration_ms = admitted_at.elapsed().as_millis() as u64;
            self.record_metrics(&staged, staged.citations.len(), total_duration_ms, cancellation_cause)
                .await;
            permit.release();
        });

        Ok(out_rx)
    }

    /// Runs every stage up to (and including) prompt assembly, shared by
    /// both entry points.
    async fn run_to_prompt(&self, question: &str, topic_filter: Option<&str>) -> StagedQuery {
        let (vector_results, vector_error, vector_dur) = self.run_vector_leg(question, topic_filter).await;
        let (graph_results, graph_error, graph_dur) = self.run_graph_leg(question).await;
        self.metrics.observe_stage("vector_search", vector_dur);
        self.metrics.observe_stage("graph_traversal", graph_dur);

        let strategy = RetrievalStrategy::from_presence(!vector_results.is_empty(), !graph_results.is_empty());

        let mut lists = Vec::new();
        if !vector_results.is_empty() {
            lists.push(vector_results.clone());
        }
        if !graph_results.is_empty() {
            lists.push(graph_results.clone());
        }
        let fusion_start = Instant::now();
        let fused = fuse(&lists, self.pipeline.rrf_k);
        let overlap = overlap_count(&fused);
        let fusion_dur = fusion_start.elapsed();
        self.metrics.observe_stage("fusion", fusion_dur);

        let rerank_start = Instant::now();
        let ranked = self.rerank_fused(question, &fused).await;
        let rerank_dur = rerank_start.elapsed();
        self.metrics.observe_stage("rerank", rerank_dur);

        let top_score = ranked.first().map(|r| r.rerank_score).unwrap_or(0.0);
        let level = confidence_level(top_score);
        let insufficient = insufficient_evidence(top_score, self.pipeline.confidence_threshold) || ranked.is_empty();

        let citations = CitationRegistry::create_citations(&ranked, tutor_generation::DEFAULT_MAX_SNIPPET_LENGTH);
        let final_context_tokens: usize = ranked.iter().map(|r| r.metadata.token_count).sum();

        let (_variant, messages) = PromptAssembler::assemble(
            question,
            level,
            insufficient,
            &ranked,
            &citations,
            self.pipeline.confidence_threshold,
        );

        let rerank_scores: Vec<f32> = ranked.iter().map(|r| r.rerank_score).collect();

        StagedQuery {
            vector_result_count: vector_results.len(),
            graph_result_count: graph_results.len(),
            vector_error,
            graph_error,
            vector_search_ms: vector_dur.as_millis() as u64,
            graph_traversal_ms: graph_dur.as_millis() as u64,
            fusion_ms: fusion_dur.as_millis() as u64,
            rerank_ms: rerank_dur.as_millis() as u64,
            strategy,
            overlap,
            fused_list_len: fused.len(),
            rerank_scores: ScoreStats::compute(&rerank_scores),
            top_score,
            level,
            insufficient_evidence: insufficient,
            citations,
            final_context_tokens,
            messages,
        }
    }

    async fn run_vector_leg(
        &self,
        question: &str,
        topic_filter: Option<&str>,
    ) -> (Vec<tutor_core::RetrievalResult>, Option<String>, Duration) {
        let start = Instant::now();
        let result = tokio::time::timeout(
            RETRIEVAL_PHASE,
            self.vector_retriever
                .search(question, self.pipeline.retrieval_top_k, topic_filter),
        )
        .await;

        match result {
            Ok(Ok(results)) => (results, None, start.elapsed()),
            Ok(Err(e)) => {
                warn!(error = %e, "vector retrieval failed, continuing without vector results");
                (Vec::new(), Some(e.to_string()), start.elapsed())
            }
            Err(_) => {
                warn!("vector retrieval exceeded the retrieval-phase deadline");
                (Vec::new(), Some("vector retrieval timed out".to_string()), start.elapsed())
            }
        }
    }

    async fn run_graph_leg(&self, question: &str) -> (Vec<tutor_core::RetrievalResult>, Option<String>, Duration) {
        let start = Instant::now();
        let Some(graph_retriever) = &self.graph_retriever else {
            return (Vec::new(), None, Duration::ZERO);
        };

        let result = tokio::time::timeout(
            RETRIEVAL_PHASE,
            graph_retriever.search(question, self.pipeline.retrieval_top_k),
        )
        .await;

        match result {
            Ok(Ok(results)) => (results, None, start.elapsed()),
            Ok(Err(e)) => {
                warn!(error = %e, "graph retrieval failed, continuing without graph results");
                (Vec::new(), Some(e.to_string()), start.elapsed())
            }
            Err(_) => {
                warn!("graph retrieval exceeded the retrieval-phase deadline");
                (Vec::new(), Some("graph retrieval timed out".to_string()), start.elapsed())
            }
        }
    }

    async fn rerank_fused(&self, question: &str, fused: &[FusedResult]) -> Vec<RankedResult> {
        if fused.is_empty() {
            return Vec::new();
        }

        let documents: Vec<String> = fused.iter().map(|f| f.content.clone()).collect();
        match self.reranker.rerank(question, documents).await {
            Ok(candidates) => candidates
                .into_iter()
                .filter_map(|c| {
                    fused.get(c.index).map(|f| RankedResult {
                        chunk_id: f.chunk_id.clone(),
                        content: c.content,
                        rerank_score: c.score,
                        original_fused_score: f.fused_score,
                        metadata: f.metadata.clone(),
                    })
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "reranker backend failed, falling back to fused order");
                fused
                    .iter()
                    .take(self.pipeline.rerank_top_k)
                    .map(|f| RankedResult {
                        chunk_id: f.chunk_id.clone(),
                        content: f.content.clone(),
                        rerank_score: 0.0,
                        original_fused_score: f.fused_score,
                        metadata: f.metadata.clone(),
                    })
                    .collect(),
            }
        }
    }

    /// Aggregates every collaborator's health check for the server's
    /// `/healthz` endpoint (spec §6 "health() -> bool" per collaborator;
    /// SPEC_FULL §4 "Health checks").
    pub async fn health(&self) -> PipelineHealth {
        let (vector, reranker, generator) = tokio::join!(
            self.vector_retriever.health(),
            self.reranker.health(),
            self.generator.health(),
        );
        let graph = match &self.graph_retriever {
            Some(g) => Some(g.health().await),
            None => None,
        };

        PipelineHealth {
            vector,
            graph,
            reranker,
            generator,
        }
    }

    async fn record_metrics(
        &self,
        staged: &StagedQuery,
        citation_count: usize,
        total_duration_ms: u64,
        cancellation_cause: Option<String>,
    ) {
        self.metrics
            .finish(QueryMetricsRow {
                query_id: uuid::Uuid::new_v4().to_string(),
                // Embedding happens inside the vector leg's own timing
                // window (VectorRetriever::search embeds then queries in
                // one call); it is not broken out separately here.
                embedding_ms: 0,
                vector_search_ms: staged.vector_search_ms,
                graph_traversal_ms: staged.graph_traversal_ms,
                fusion_ms: staged.fusion_ms,
                rerank_ms: staged.rerank_ms,
                total_ms: total_duration_ms,
                vector_result_count: staged.vector_result_count,
                graph_result_count: staged.graph_result_count,
                rerank_scores: staged.rerank_scores,
                overlap_count: staged.overlap,
                fused_list_len: staged.fused_list_len,
                rerank_top_score: staged.top_score,
                confidence_threshold_met: !staged.insufficient_evidence,
                final_context_tokens: staged.final_context_tokens,
                citation_count,
                strategy: staged.strategy,
                vector_error: staged.vector_error.clone(),
                graph_error: staged.graph_error.clone(),
                cancellation_cause,
            })
            .await;
    }
}

/// Per-collaborator health snapshot (spec §6). `graph` is `None` when no
/// graph store was configured, distinct from a configured-but-unhealthy
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PipelineHealth {
    pub vector: bool,
    pub graph: Option<bool>,
    pub reranker: bool,
    pub generator: bool,
}

impl PipelineHealth {
    pub fn is_healthy(&self) -> bool {
        self.vector && self.graph.unwrap_or(true) && self.reranker && self.generator
    }
}

/// Intermediate state shared by the blocking and streaming entry points,
/// from admission through prompt assembly.
struct StagedQuery {
    vector_result_count: usize,
    graph_result_count: usize,
    vector_error: Option<String>,
    graph_error: Option<String>,
    vector_search_ms: u64,
    graph_traversal_ms: u64,
    fusion_ms: u64,
    rerank_ms: u64,
    strategy: RetrievalStrategy,
    overlap: usize,
    fused_list_len: usize,
    rerank_scores: ScoreStats,
    top_score: f32,
    level: ConfidenceLevel,
    insufficient_evidence: bool,
    citations: Vec<Citation>,
    final_context_tokens: usize,
    messages: Vec<tutor_core::ChatMessage>,
}

/// A one-shot receiver yielding a single fallback chunk, used when
/// `Generator::stream` itself fails to open (spec §4.8 "streamWithFallback"
/// — the stream must still terminate with `Done`).
fn fallback_chunk_receiver(message: &str) -> mpsc::Receiver<Result<GeneratorChunk, tutor_core::GeneratorError>> {
    let (tx, rx) = mpsc::channel(1);
    let message = message.to_string();
    tokio::spawn(async move {
        let _ = tx
            .send(Ok(GeneratorChunk {
                delta: message,
                finish_reason: Some(tutor_core::FinishReason::Stop),
            }))
            .await;
    });
    rx
}

/// Forwards events from the multiplexer's internal channel to the external
/// caller-facing one, warning once if the first `TokenEvent` misses the
/// `FIRST_TOKEN_TARGET` SLO. Returns `false` if the external consumer
/// disconnected before the stream's own terminal event.
async fn relay_with_slo_warning(
    mut inner_rx: mpsc::Receiver<StreamEvent>,
    out: mpsc::Sender<StreamEvent>,
    admitted_at: Instant,
) -> bool {
    let mut first_token_checked = false;

    while let Some(event) = inner_rx.recv().await {
        if !first_token_checked && matches!(event, StreamEvent::Token { .. }) {
            first_token_checked = true;
            let elapsed = admitted_at.elapsed();
            if elapsed > FIRST_TOKEN_TARGET {
                warn!(elapsed_ms = elapsed.as_millis() as u64, "first token missed the 3s SLO");
            }
        }

        if out.send(event).await.is_err() {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tutor_core::{
        ChatMessage, ChunkMetadata, ConceptMatch, FinishReason, GeneratorError, GraphChunkHit,
        RerankScore, RetrievalError, RetryConfig, VectorHit,
    };

    fn metadata(title: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: format!("doc-{title}"),
            document_title: title.to_string(),
            document_url: format!("https://example.org/{title}"),
            section_header: None,
            chunk_index: 0,
            total_chunks: 1,
            token_count: 20,
            has_code: false,
            has_formula: false,
            has_table: false,
            topic_tag: None,
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_one(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_one(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
            Err(RetrievalError::Embedding("embedding service down".into()))
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Err(RetrievalError::Embedding("embedding service down".into()))
        }
    }

    struct FixedVectorStore {
        hits: Vec<VectorHit>,
    }

    #[async_trait]
    impl VectorStore for FixedVectorStore {
        async fn knn(
            &self,
            _collection: &str,
            _query_vector: &[f32],
            _k: usize,
            _filter_expr: Option<&str>,
        ) -> Result<Vec<VectorHit>, RetrievalError> {
            Ok(self.hits.clone())
        }
        async fn health(&self) -> bool {
            true
        }
    }

    struct FixedGraphStore {
        concepts: Vec<ConceptMatch>,
        chunks: Vec<GraphChunkHit>,
    }

    #[async_trait]
    impl GraphStore for FixedGraphStore {
        async fn match_concepts(&self, _terms: &[String]) -> Result<Vec<ConceptMatch>, RetrievalError> {
            Ok(self.concepts.clone())
        }
        async fn traverse_and_gather(
            &self,
            _seeds: &[ConceptMatch],
            _relationship_types: &[String],
            _max_depth: usize,
        ) -> Result<Vec<GraphChunkHit>, RetrievalError> {
            Ok(self.chunks.clone())
        }
        async fn health(&self) -> bool {
            true
        }
    }

    struct ScoredReranker {
        scores: Vec<RerankScore>,
    }

    #[async_trait]
    impl RerankerBackend for ScoredReranker {
        async fn rerank(&self, _query: &str, _documents: &[String]) -> Result<Vec<RerankScore>, tutor_core::RerankError> {
            Ok(self.scores.clone())
        }
        async fn health(&self) -> bool {
            true
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl ChatGenerator for EchoGenerator {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GeneratorError> {
            let cites: String = (1..=messages.len().max(1)).map(|i| format!("[{i}]")).collect();
            Ok(format!("Dynamic programming avoids recomputation {cites}."))
        }
        async fn stream_complete(
            &self,
            _messages: &[ChatMessage],
        ) -> Result<mpsc::Receiver<Result<GeneratorChunk, GeneratorError>>, GeneratorError> {
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                let _ = tx
                    .send(Ok(GeneratorChunk {
                        delta: "Dynamic programming avoids recomputation [1].".into(),
                        finish_reason: Some(FinishReason::Stop),
                    }))
                    .await;
            });
            Ok(rx)
        }
        async fn health(&self) -> bool {
            true
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 1,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_factor: 1.0,
        }
    }

    fn vector_hit(id: &str, score: f32) -> VectorHit {
        VectorHit {
            id: id.to_string(),
            score,
            content: format!("content for {id}"),
            fields: tutor_core::RawFields::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_orchestrator(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        graph_store: Option<Arc<dyn GraphStore>>,
        reranker_backend: Arc<dyn RerankerBackend>,
        chat_generator: Arc<dyn ChatGenerator>,
    ) -> Orchestrator {
        Orchestrator::new(
            embedder,
            vector_store,
            "chunks",
            graph_store,
            reranker_backend,
            chat_generator,
            Throttle::new(10, 10, Duration::from_secs(5)),
            Arc::new(MetricsCollector::new(Arc::new(tutor_metrics::NullSink))),
            PipelineConfig::default(),
            2,
            vec!["PREREQUISITE".to_string(), "DISCUSSES".to_string()],
            true,
            fast_retry(),
        )
    }

    #[tokio::test]
    async fn happy_path_hybrid_query_returns_grounded_answer_with_citations() {
        let vector_store = Arc::new(FixedVectorStore {
            hits: vec![vector_hit("c1", 0.9), vector_hit("c2", 0.7)],
        });
        let graph_store: Arc<dyn GraphStore> = Arc::new(FixedGraphStore {
            concepts: vec![ConceptMatch { concept_id: "dp".into(), score: 1.0 }],
            chunks: vec![GraphChunkHit {
                chunk_id: "c3".into(),
                content: "graph content".into(),
                metadata: metadata("Graph Doc"),
                concept_depths: vec![1],
            }],
        });
        let reranker = Arc::new(ScoredReranker {
            scores: vec![
                RerankScore { index: 0, score: 0.92 },
                RerankScore { index: 1, score: 0.85 },
                RerankScore { index: 2, score: 0.81 },
            ],
        });
        let orchestrator = build_orchestrator(
            Arc::new(FixedEmbedder),
            vector_store,
            Some(graph_store),
            reranker,
            Arc::new(EchoGenerator),
        );

        let response = orchestrator.query("What is dynamic programming?", None).await.unwrap();

        assert_eq!(response.strategy, RetrievalStrategy::Hybrid);
        assert_eq!(response.confidence, ConfidenceLevel::High);
        assert!(!response.insufficient_evidence);
        assert!(!response.citations.is_empty());
        assert!(response.answer.contains('['));
    }

    #[tokio::test]
    async fn graph_store_absent_degrades_to_vector_only_strategy() {
        let vector_store = Arc::new(FixedVectorStore {
            hits: vec![vector_hit("c1", 0.9)],
        });
        let reranker = Arc::new(ScoredReranker {
            scores: vec![RerankScore { index: 0, score: 0.7 }],
        });
        let orchestrator = build_orchestrator(
            Arc::new(FixedEmbedder),
            vector_store,
            None,
            reranker,
            Arc::new(EchoGenerator),
        );

        let response = orchestrator.query("What is recursion?", None).await.unwrap();

        assert_eq!(response.strategy, RetrievalStrategy::VectorOnly);
    }

    #[tokio::test]
    async fn vector_backend_failure_is_absorbed_and_falls_back_to_graph_only() {
        let graph_store: Arc<dyn GraphStore> = Arc::new(FixedGraphStore {
            concepts: vec![ConceptMatch { concept_id: "dp".into(), score: 1.0 }],
            chunks: vec![GraphChunkHit {
                chunk_id: "c3".into(),
                content: "graph content".into(),
                metadata: metadata("Graph Doc"),
                concept_depths: vec![1],
            }],
        });
        let reranker = Arc::new(ScoredReranker {
            scores: vec![RerankScore { index: 0, score: 0.7 }],
        });
        let orchestrator = build_orchestrator(
            Arc::new(FailingEmbedder),
            Arc::new(FixedVectorStore { hits: vec![] }),
            Some(graph_store),
            reranker,
            Arc::new(EchoGenerator),
        );

        let response = orchestrator.query("What is dynamic programming?", None).await.unwrap();

        assert_eq!(response.strategy, RetrievalStrategy::GraphOnly);
    }

    #[tokio::test]
    async fn no_results_from_either_source_yields_insufficient_evidence() {
        let orchestrator = build_orchestrator(
            Arc::new(FixedEmbedder),
            Arc::new(FixedVectorStore { hits: vec![] }),
            None,
            Arc::new(ScoredReranker { scores: vec![] }),
            Arc::new(EchoGenerator),
        );

        let response = orchestrator.query("An entirely unrelated question?", None).await.unwrap();

        assert_eq!(response.strategy, RetrievalStrategy::Degraded);
        assert!(response.insufficient_evidence);
        assert_eq!(response.confidence, ConfidenceLevel::Insufficient);
        assert!(response.citations.is_empty());
    }

    #[tokio::test]
    async fn streaming_query_emits_confidence_first_and_done_last() {
        let vector_store = Arc::new(FixedVectorStore {
            hits: vec![vector_hit("c1", 0.9)],
        });
        let reranker = Arc::new(ScoredReranker {
            scores: vec![RerankScore { index: 0, score: 0.9 }],
        });
        let orchestrator = Arc::new(build_orchestrator(
            Arc::new(FixedEmbedder),
            vector_store,
            None,
            reranker,
            Arc::new(EchoGenerator),
        ));

        let mut rx = orchestrator
            .stream_query("What is dynamic programming?".to_string(), None)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(StreamEvent::Confidence { .. })));
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::Citation { .. })));
    }

    #[tokio::test]
    async fn dropping_the_stream_receiver_does_not_panic_or_hang() {
        let vector_store = Arc::new(FixedVectorStore {
            hits: vec![vector_hit("c1", 0.9)],
        });
        let reranker = Arc::new(ScoredReranker {
            scores: vec![RerankScore { index: 0, score: 0.9 }],
        });
        let orchestrator = Arc::new(build_orchestrator(
            Arc::new(FixedEmbedder),
            vector_store,
            None,
            reranker,
            Arc::new(EchoGenerator),
        ));

        let rx = orchestrator
            .stream_query("What is dynamic programming?".to_string(), None)
            .await
            .unwrap();
        drop(rx);

        // Give the spawned task a chance to observe the disconnect and
        // release its throttle permit; absence of a panic is the assertion.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(orchestrator.throttle.stats().active, 0);
    }
}
