use std::sync::Arc;

use tutor_orchestrator::Orchestrator;

/// Shared, cloneable handle to the pipeline, threaded through every axum
/// handler via `State` (mirrors the teacher's `AppState`).
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}
