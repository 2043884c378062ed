//! API Module
//!
//! HTTP control plane of the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod deployment;
pub mod environment;
pub mod error;
pub mod health;
pub mod run;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::error::{ApiError, ApiResult};
use crate::service::{Fleet, PipelineOrchestrator};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<Fleet>,
}

impl AppState {
    pub fn new(fleet: Arc<Fleet>) -> Self {
        Self { fleet }
    }

    /// Pipeline of one environment, or 404
    pub fn pipeline(&self, stage: &str) -> ApiResult<Arc<PipelineOrchestrator>> {
        self.fleet
            .get(stage)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Environment '{}' not found", stage)))
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Environment endpoints
        .route("/environments", get(environment::list_environments))
        .route("/environments/{stage}", get(environment::get_environment))
        .route(
            "/environments/{stage}/bootstrap/complete",
            post(environment::complete_bootstrap),
        )
        // Run endpoints
        .route(
            "/environments/{stage}/runs",
            get(run::list_runs).post(run::trigger_run),
        )
        .route("/environments/{stage}/runs/{id}", get(run::get_run))
        // Deployment endpoints
        .route(
            "/environments/{stage}/deployment",
            get(deployment::get_deployment),
        )
        .route(
            "/environments/{stage}/deployment/cancel",
            post(deployment::cancel_deployment),
        )
        .route(
            "/environments/{stage}/deployment/clear-fault",
            post(deployment::clear_fault),
        )
        .route(
            "/environments/{stage}/deployment/capacity",
            get(deployment::get_capacity).put(deployment::scale_service),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
