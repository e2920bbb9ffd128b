use std::convert::Infallible;
use std::time::{Duration, SystemTime};

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::Stream;
use lazy_static::lazy_static;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;

use tutor_core::{QueryResponse, StreamEvent};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

lazy_static! {
    static ref START_TIME: SystemTime = SystemTime::now();
}

#[derive(Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub topic_filter: Option<String>,
}

/// Process-wide health snapshot, mirroring the teacher's `HealthResponse`
/// shape but keyed to this pipeline's own collaborators (spec §6 "Health
/// checks").
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub components: tutor_orchestrator::PipelineHealth,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let components = state.orchestrator.health().await;
    let status = if components.is_healthy() { "healthy" } else { "degraded" };
    let uptime_seconds = START_TIME.elapsed().unwrap_or(Duration::ZERO).as_secs();

    Json(HealthResponse {
        status,
        uptime_seconds,
        components,
    })
}

/// Exposes the process registry in Prometheus text exposition format, the
/// way the teacher's `codegraph-api::metrics` module does.
pub async fn metrics() -> impl IntoResponse {
    let metric_families = tutor_metrics::REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "failed to encode metrics");
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics".to_string(),
        )
            .into_response();
    }
    let body = String::from_utf8(buffer).unwrap_or_default();
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// Blocking query entry point: awaits the complete answer and returns one
/// JSON `QueryResponse` (spec §4.10 "Blocking mode").
pub async fn query_blocking(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    if req.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }

    let response = state
        .orchestrator
        .query(&req.question, req.topic_filter.as_deref())
        .await?;

    Ok(Json(response))
}

/// Streaming query entry point: opens an SSE connection and relays every
/// `StreamEvent` as it is produced (spec §4.10 "Streaming mode"). Dropping
/// the connection mid-stream is the caller's cancellation signal — the
/// orchestrator observes it via the receiver's drop.
pub async fn query_stream(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if req.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }

    let rx = state
        .orchestrator
        .clone()
        .stream_query(req.question, req.topic_filter)
        .await?;

    let events = ReceiverStream::new(rx).map(|event| Ok(to_sse_event(event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Maps a `StreamEvent` onto the named SSE event the wire format mandates
/// (spec §6 "Event stream to consumer"): `event: confidence|token|citation
/// |metadata|done|error`, with the JSON payload as `data:`.
fn to_sse_event(event: StreamEvent) -> Event {
    let name = match &event {
        StreamEvent::Confidence { .. } => "confidence",
        StreamEvent::Token { .. } => "token",
        StreamEvent::Citation { .. } => "citation",
        StreamEvent::Metadata { .. } => "metadata",
        StreamEvent::Done => "done",
        StreamEvent::Error { .. } => "error",
    };

    match serde_json::to_string(&event) {
        Ok(json) => Event::default().event(name).data(json),
        Err(e) => {
            warn!(error = %e, "failed to serialize stream event");
            Event::default()
                .event("error")
                .data("{\"type\":\"error\",\"message\":\"serialization failure\"}")
        }
    }
}
