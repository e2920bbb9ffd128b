use serde::{Deserialize, Serialize};

/// Bounded-concurrency policy for one logical endpoint (spec §4.11/§6).
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ThrottleConfig {
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub queue_timeout_ms: u64,
}

impl ThrottleConfig {
    /// Defaults for the query endpoint (spec §4.11).
    pub fn query_defaults() -> Self {
        Self {
            max_concurrent: 10,
            max_queue_size: 30,
            queue_timeout_ms: 60_000,
        }
    }

    /// Defaults for the ingestion endpoint (spec §4.11). Kept here even
    /// though ingestion itself is out of scope, since the throttle crate
    /// is shared infrastructure a caller may reuse for it.
    pub fn ingestion_defaults() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 10,
            queue_timeout_ms: 300_000,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::query_defaults()
    }
}

/// Pipeline-wide tunables (spec §6 "Pipeline").
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "PipelineConfig::default_rerank_top_k")]
    pub rerank_top_k: usize,
    #[serde(default = "PipelineConfig::default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "PipelineConfig::default_include_graph")]
    pub include_graph: bool,
    #[serde(default = "PipelineConfig::default_rrf_k")]
    pub rrf_k: usize,
}

impl PipelineConfig {
    fn default_retrieval_top_k() -> usize {
        20
    }
    fn default_rerank_top_k() -> usize {
        5
    }
    fn default_confidence_threshold() -> f32 {
        0.6
    }
    fn default_include_graph() -> bool {
        true
    }
    fn default_rrf_k() -> usize {
        60
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retrieval_top_k: Self::default_retrieval_top_k(),
            rerank_top_k: Self::default_rerank_top_k(),
            confidence_threshold: Self::default_confidence_threshold(),
            include_graph: Self::default_include_graph(),
            rrf_k: Self::default_rrf_k(),
        }
    }
}

/// Vector retriever tunables (spec §6 "Vector").
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct VectorConfig {
    #[serde(default = "VectorConfig::default_collection_name")]
    pub collection_name: String,
    #[serde(default = "VectorConfig::default_top_k")]
    pub top_k: usize,
    #[serde(default = "VectorConfig::default_vector_field")]
    pub vector_field: String,
}

impl VectorConfig {
    fn default_collection_name() -> String {
        "chunks".to_string()
    }
    fn default_top_k() -> usize {
        20
    }
    fn default_vector_field() -> String {
        "embedding".to_string()
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            collection_name: Self::default_collection_name(),
            top_k: Self::default_top_k(),
            vector_field: Self::default_vector_field(),
        }
    }
}

/// Graph retriever tunables (spec §6 "Graph" / §4.2).
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GraphConfig {
    #[serde(default = "GraphConfig::default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "GraphConfig::default_top_k")]
    pub top_k: usize,
    #[serde(default = "GraphConfig::default_relationship_types")]
    pub relationship_types: Vec<String>,
    #[serde(default = "GraphConfig::default_use_fulltext_search")]
    pub use_fulltext_search: bool,
}

impl GraphConfig {
    fn default_max_depth() -> usize {
        2
    }
    fn default_top_k() -> usize {
        20
    }
    fn default_relationship_types() -> Vec<String> {
        vec![
            "PREREQUISITE".to_string(),
            "RELATED_TO".to_string(),
            "COMPARED_TO".to_string(),
            "PART_OF".to_string(),
            "DISCUSSES".to_string(),
        ]
    }
    fn default_use_fulltext_search() -> bool {
        true
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: Self::default_max_depth(),
            top_k: Self::default_top_k(),
            relationship_types: Self::default_relationship_types(),
            use_fulltext_search: Self::default_use_fulltext_search(),
        }
    }
}

/// Generator retry policy (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "RetryConfig::default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "RetryConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "RetryConfig::default_backoff_factor")]
    pub backoff_factor: f64,
}

impl RetryConfig {
    fn default_max_retries() -> u32 {
        3
    }
    fn default_initial_delay_ms() -> u64 {
        1_000
    }
    fn default_max_delay_ms() -> u64 {
        10_000
    }
    fn default_backoff_factor() -> f64 {
        2.0
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            initial_delay_ms: Self::default_initial_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
            backoff_factor: Self::default_backoff_factor(),
        }
    }
}

/// Generator tunables (spec §6 "Generator").
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GeneratorConfig {
    #[serde(default = "GeneratorConfig::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "GeneratorConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "GeneratorConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl GeneratorConfig {
    fn default_max_tokens() -> u32 {
        1024
    }
    fn default_temperature() -> f32 {
        0.2
    }
    fn default_timeout_ms() -> u64 {
        90_000
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_tokens: Self::default_max_tokens(),
            temperature: Self::default_temperature(),
            timeout_ms: Self::default_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

/// HTTP bind address and logging tunables for the `tutor-server` binary.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_log_filter")]
    pub log_filter: String,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    fn default_port() -> u16 {
        8080
    }
    fn default_log_filter() -> String {
        "info,tutor_server=debug,tutor_orchestrator=debug".to_string()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            log_filter: Self::default_log_filter(),
        }
    }
}

/// Connection details for the five external collaborator services the
/// orchestrator is wired against at process startup (spec §6). Out of
/// scope for the pipeline crates themselves, which only see the narrow
/// trait boundary — this is purely binary-level wiring.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AdaptersConfig {
    #[serde(default = "AdaptersConfig::default_embedder_base_url")]
    pub embedder_base_url: String,
    #[serde(default = "AdaptersConfig::default_embedder_model")]
    pub embedder_model: String,
    #[serde(default = "AdaptersConfig::default_vector_store_base_url")]
    pub vector_store_base_url: String,
    #[serde(default)]
    pub graph_store_base_url: Option<String>,
    #[serde(default = "AdaptersConfig::default_reranker_base_url")]
    pub reranker_base_url: String,
    #[serde(default = "AdaptersConfig::default_reranker_model")]
    pub reranker_model: String,
    #[serde(default = "AdaptersConfig::default_generator_base_url")]
    pub generator_base_url: String,
    #[serde(default = "AdaptersConfig::default_generator_model")]
    pub generator_model: String,
    #[serde(default = "AdaptersConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "AdaptersConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl AdaptersConfig {
    fn default_embedder_base_url() -> String {
        "http://localhost:11434".to_string()
    }
    fn default_embedder_model() -> String {
        "text-embedding-3-small".to_string()
    }
    fn default_vector_store_base_url() -> String {
        "http://localhost:6333".to_string()
    }
    fn default_reranker_base_url() -> String {
        "http://localhost:11435".to_string()
    }
    fn default_reranker_model() -> String {
        "rerank-v1".to_string()
    }
    fn default_generator_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }
    fn default_generator_model() -> String {
        "gpt-5.1".to_string()
    }
    fn default_api_key_env() -> String {
        "TUTOR_API_KEY".to_string()
    }
    fn default_request_timeout_ms() -> u64 {
        30_000
    }
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            embedder_base_url: Self::default_embedder_base_url(),
            embedder_model: Self::default_embedder_model(),
            vector_store_base_url: Self::default_vector_store_base_url(),
            graph_store_base_url: None,
            reranker_base_url: Self::default_reranker_base_url(),
            reranker_model: Self::default_reranker_model(),
            generator_base_url: Self::default_generator_base_url(),
            generator_model: Self::default_generator_model(),
            api_key_env: Self::default_api_key_env(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Top-level settings tree, loaded by `load()` from an optional TOML file
/// layered with `TUTOR_`-prefixed environment overrides, the way
/// `codegraph-core`'s config layer composes file + env sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default, schemars::JsonSchema)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
}

impl Settings {
    /// Load settings from an optional config file path plus environment
    /// overlay. Missing file is not an error — defaults apply.
    pub fn load(config_path: Option<&str>) -> Result<Self, crate::error::TutorError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default()).map_err(|e| {
                crate::error::TutorError::Configuration(format!("default seed: {e}"))
            })?);

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TUTOR")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder
            .build()
            .map_err(|e| crate::error::TutorError::Configuration(e.to_string()))?;

        cfg.try_deserialize()
            .map_err(|e| crate::error::TutorError::Configuration(e.to_string()))
    }
}
