//! Environment API Handlers
//!
//! Environment overviews and the bootstrap protocol.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use cutover_core::domain::run::PipelineRun;
use cutover_core::dto::environment::{CompleteBootstrap, EnvironmentSummary};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::PipelineOrchestrator;

fn summarize(pipeline: &PipelineOrchestrator) -> EnvironmentSummary {
    let env = pipeline.environment();
    EnvironmentSummary {
        stage: env.stage().to_string(),
        account: env.account().to_string(),
        region: env.region().to_string(),
        resource_prefix: pipeline.resource_prefix(),
        pipeline_name: pipeline.pipeline_name(),
        bootstrap: pipeline.bootstrap_phase(),
        deployment: pipeline.controller().status(),
    }
}

/// GET /environments
/// List all environments
pub async fn list_environments(State(state): State<AppState>) -> Json<Vec<EnvironmentSummary>> {
    tracing::debug!("Listing environments");
    Json(state.fleet.pipelines().map(|p| summarize(p)).collect())
}

/// GET /environments/{stage}
/// Get one environment
pub async fn get_environment(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<Json<EnvironmentSummary>> {
    let pipeline = state.pipeline(&stage)?;
    Ok(Json(summarize(&pipeline)))
}

/// POST /environments/{stage}/bootstrap/complete
/// Arm the Deploy stage and launch the run closing the bootstrap cycle
pub async fn complete_bootstrap(
    State(state): State<AppState>,
    Path(stage): Path<String>,
    body: Option<Json<CompleteBootstrap>>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    let pipeline = state.pipeline(&stage)?;
    let request = body.map(|Json(req)| req).unwrap_or_default();

    tracing::info!("Completing bootstrap for {}", stage);
    let run = pipeline.complete_bootstrap(request.revision).await?;

    Ok((StatusCode::ACCEPTED, Json(run)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::service::Fleet;
    use crate::service::testing::test_pipeline;
    use cutover_core::domain::environment::BootstrapPhase;
    use std::sync::Arc;

    fn state(phase: BootstrapPhase) -> AppState {
        let built = test_pipeline("dev", phase, Arc::default());
        let mut fleet = Fleet::new();
        fleet
            .register(Arc::try_unwrap(built.pipeline).ok().unwrap())
            .unwrap();
        AppState::new(Arc::new(fleet))
    }

    #[tokio::test]
    async fn test_list_environments() {
        let Json(envs) = list_environments(State(state(BootstrapPhase::Initial))).await;
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].stage, "dev");
        assert_eq!(
            envs[0].resource_prefix,
            "sin-simflexcloud-dev-ecs-fargate-blue-green-deployments"
        );
        assert_eq!(envs[0].bootstrap, BootstrapPhase::Initial);
    }

    #[tokio::test]
    async fn test_unknown_environment_is_not_found() {
        let result = get_environment(State(state(BootstrapPhase::Initial)), Path("qa".to_string())).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bootstrap_without_image_conflicts() {
        let result = complete_bootstrap(
            State(state(BootstrapPhase::Initial)),
            Path("dev".to_string()),
            None,
        )
        .await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_traversal_revision() {
        let result = complete_bootstrap(
            State(state(BootstrapPhase::Initial)),
            Path("dev".to_string()),
            Some(Json(CompleteBootstrap {
                revision: Some("../../victim".to_string()),
            })),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
