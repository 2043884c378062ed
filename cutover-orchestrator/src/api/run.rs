//! Run API Handlers
//!
//! HTTP endpoints for pipeline runs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use cutover_core::domain::run::PipelineRun;
use cutover_core::dto::run::{RunSummary, TriggerRun};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::repository::RunRepository;

/// POST /environments/{stage}/runs
/// Start a run; it executes in the background
pub async fn trigger_run(
    State(state): State<AppState>,
    Path(stage): Path<String>,
    Json(req): Json<TriggerRun>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    let revision = req.revision.trim();
    let pipeline = state.pipeline(&stage)?;
    tracing::info!("Triggering run of {} for {}", revision, stage);

    let run = pipeline.enqueue(revision).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// GET /environments/{stage}/runs
/// List runs of one environment, most recent first
pub async fn list_runs(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<Json<Vec<RunSummary>>> {
    tracing::debug!("Listing runs for {}", stage);

    let pipeline = state.pipeline(&stage)?;
    let runs = pipeline.runs().list_by_environment(&stage).await?;

    Ok(Json(runs.into_iter().map(RunSummary::from).collect()))
}

/// GET /environments/{stage}/runs/{id}
/// Get run by ID
pub async fn get_run(
    State(state): State<AppState>,
    Path((stage, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run {} for {}", id, stage);

    let pipeline = state.pipeline(&stage)?;
    let run = pipeline
        .runs()
        .find_by_id(&stage, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))?;

    Ok(Json(run))
}
