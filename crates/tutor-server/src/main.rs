use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tutor_core::Settings;
use tutor_metrics::MetricsCollector;
use tutor_orchestrator::Orchestrator;
use tutor_server::adapters::{HttpChatGenerator, HttpEmbedder, HttpGraphStore, HttpReranker, HttpVectorStore};
use tutor_server::state::AppState;
use tutor_throttle::Throttle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("TUTOR_CONFIG").ok();
    let settings = Settings::load(config_path.as_deref())?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(settings.server.log_filter.clone())))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tutor_metrics::register();

    let orchestrator = Arc::new(build_orchestrator(&settings));
    let state = AppState::new(orchestrator);
    let router = tutor_server::create_router(state);

    let addr = settings.server.bind_addr();
    tracing::info!("starting tutor-server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;

    tracing::info!("listening on http://{}", addr);
    tracing::info!("  GET  /healthz         - health check");
    tracing::info!("  GET  /metrics         - Prometheus metrics");
    tracing::info!("  POST /query           - streaming query (SSE)");
    tracing::info!("  POST /query/blocking  - blocking query (JSON)");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_orchestrator(settings: &Settings) -> Orchestrator {
    let request_timeout = Duration::from_millis(settings.adapters.request_timeout_ms);
    let api_key = std::env::var(&settings.adapters.api_key_env).ok();

    let embedder = Arc::new(HttpEmbedder::new(
        settings.adapters.embedder_base_url.clone(),
        settings.adapters.embedder_model.clone(),
        request_timeout,
    ));
    let vector_store = Arc::new(HttpVectorStore::new(
        settings.adapters.vector_store_base_url.clone(),
        request_timeout,
    ));
    let graph_store: Option<Arc<dyn tutor_core::GraphStore>> = if settings.pipeline.include_graph {
        settings
            .adapters
            .graph_store_base_url
            .clone()
            .map(|base_url| Arc::new(HttpGraphStore::new(base_url, request_timeout)) as Arc<dyn tutor_core::GraphStore>)
    } else {
        None
    };
    let reranker_backend = Arc::new(HttpReranker::new(
        settings.adapters.reranker_base_url.clone(),
        settings.adapters.reranker_model.clone(),
        request_timeout,
    ));
    let chat_generator = Arc::new(HttpChatGenerator::new(
        settings.adapters.generator_base_url.clone(),
        settings.adapters.generator_model.clone(),
        api_key,
        settings.generator.max_tokens,
        settings.generator.temperature,
        Duration::from_millis(settings.generator.timeout_ms),
    ));

    let throttle = Throttle::from_config(&settings.throttle);
    let metrics = Arc::new(MetricsCollector::new(Arc::new(tutor_metrics::NullSink)));

    Orchestrator::new(
        embedder,
        vector_store,
        settings.vector.collection_name.clone(),
        graph_store,
        reranker_backend,
        chat_generator,
        throttle,
        metrics,
        settings.pipeline.clone(),
        settings.graph.max_depth,
        settings.graph.relationship_types.clone(),
        settings.graph.use_fulltext_search,
        settings.generator.retry.clone(),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down gracefully");
        },
    }
}
