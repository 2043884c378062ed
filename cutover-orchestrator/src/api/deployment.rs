//! Deployment API Handlers
//!
//! Rollout status and operator actions on a deployment controller.

use axum::{
    Json,
    extract::{Path, State},
};
use cutover_core::domain::deployment::RolloutStatus;
use cutover_core::dto::deployment::{DeploymentAction, ScaleService, ServiceCapacity};

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /environments/{stage}/deployment
/// Current rollout status
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<Json<RolloutStatus>> {
    let pipeline = state.pipeline(&stage)?;
    Ok(Json(pipeline.controller().status()))
}

/// POST /environments/{stage}/deployment/cancel
/// Cancel the in-flight rollout; traffic returns to the active pool
pub async fn cancel_deployment(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<Json<DeploymentAction>> {
    let pipeline = state.pipeline(&stage)?;
    let controller = pipeline.controller();

    let accepted = controller.cancel().await?;
    if accepted {
        tracing::warn!("Operator cancelled rollout on {}", stage);
    } else {
        tracing::info!("Cancel requested on {} with no rollout in flight", stage);
    }

    Ok(Json(DeploymentAction {
        accepted,
        deployment: controller.status(),
    }))
}

/// POST /environments/{stage}/deployment/clear-fault
/// Acknowledge a failed rollback so new rollouts are accepted again
pub async fn clear_fault(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<Json<DeploymentAction>> {
    let pipeline = state.pipeline(&stage)?;
    let controller = pipeline.controller();

    let accepted = controller.clear_fault().await?;
    tracing::info!("Clear fault on {}: {}", stage, accepted);

    Ok(Json(DeploymentAction {
        accepted,
        deployment: controller.status(),
    }))
}

/// GET /environments/{stage}/deployment/capacity
/// Task counts of both pools
pub async fn get_capacity(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<Json<ServiceCapacity>> {
    let pipeline = state.pipeline(&stage)?;
    Ok(Json(pipeline.controller().runtime().capacity().await))
}

/// PUT /environments/{stage}/deployment/capacity
/// Resize both pools of the service
pub async fn scale_service(
    State(state): State<AppState>,
    Path(stage): Path<String>,
    Json(req): Json<ScaleService>,
) -> ApiResult<Json<ServiceCapacity>> {
    let pipeline = state.pipeline(&stage)?;
    let runtime = pipeline.controller().runtime();

    tracing::info!("Scaling {} to {} task(s) per pool", stage, req.desired_count);
    runtime.scale_to(req.desired_count).await?;

    Ok(Json(runtime.capacity().await))
}
