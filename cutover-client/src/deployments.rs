//! Deployment controller endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use cutover_core::domain::deployment::RolloutStatus;
use cutover_core::dto::deployment::{DeploymentAction, ScaleService, ServiceCapacity};

impl OrchestratorClient {
    // =============================================================================
    // Deployment Controller
    // =============================================================================

    /// Current rollout status of an environment
    pub async fn get_deployment(&self, stage: &str) -> Result<RolloutStatus> {
        let url = self.environment_url(stage, "/deployment");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Cancel the in-flight rollout; traffic returns to the active pool
    pub async fn cancel_deployment(&self, stage: &str) -> Result<DeploymentAction> {
        let url = self.environment_url(stage, "/deployment/cancel");
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Acknowledge a failed rollback so the controller accepts rollouts again
    pub async fn clear_fault(&self, stage: &str) -> Result<DeploymentAction> {
        let url = self.environment_url(stage, "/deployment/clear-fault");
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Task counts of both pools of an environment's service
    pub async fn get_capacity(&self, stage: &str) -> Result<ServiceCapacity> {
        let url = self.environment_url(stage, "/deployment/capacity");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Resize both pools to `desired_count` tasks each
    pub async fn scale_service(&self, stage: &str, desired_count: usize) -> Result<ServiceCapacity> {
        let url = self.environment_url(stage, "/deployment/capacity");
        let response = self
            .client
            .put(&url)
            .json(&ScaleService { desired_count })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
