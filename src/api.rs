use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::agents::SourceId;
use crate::pipeline::PipelineOrchestrator;
use crate::scheduler::SchedulerService;
use crate::store::runs::{PipelineRun, RunLog};
use crate::store::status::{SourceStatus, SourceStatusTracker};

/// Shared handles for the status/trigger surface. Auth and dashboard queries
/// live behind a separate gateway; this router is the operational core only.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: SchedulerService,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub run_log: Arc<RunLog>,
    pub status: Arc<SourceStatusTracker>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/scheduler/status", get(scheduler_status))
        .route("/scheduler/trigger", post(trigger_pipeline))
        .route("/scheduler/runs", get(pipeline_runs))
        .route("/sources/status", get(sources_status))
        .route("/sources/{id}/trigger", post(trigger_source))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn scheduler_status(
    State(state): State<AppState>,
) -> Json<crate::scheduler::SchedulerStatus> {
    Json(state.scheduler.status())
}

async fn trigger_pipeline(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.scheduler.trigger_now() {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "pipeline_triggered",
                "message": "Pipeline quotidien lance en arriere-plan",
            })),
        ),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

#[derive(serde::Deserialize)]
struct RunsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

async fn pipeline_runs(
    State(state): State<AppState>,
    Query(q): Query<RunsQuery>,
) -> Json<Vec<PipelineRun>> {
    Json(state.run_log.recent(q.limit.min(100)))
}

async fn sources_status(State(state): State<AppState>) -> Json<Vec<SourceStatus>> {
    Json(state.status.snapshot())
}

async fn trigger_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let source: SourceId = match id.parse() {
        Ok(source) => source,
        Err(e) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    // fire-and-forget: the ack does not wait for the fetch
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let result = orchestrator.run_single_agent(source).await;
        tracing::info!(source = %source, status = ?result.status, "manual agent run finished");
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "agent_triggered",
            "source": source.as_str(),
        })),
    )
}
