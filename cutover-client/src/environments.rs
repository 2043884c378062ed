//! Environment and bootstrap endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use cutover_core::domain::run::PipelineRun;
use cutover_core::dto::environment::{CompleteBootstrap, EnvironmentSummary};

impl OrchestratorClient {
    // =============================================================================
    // Environments
    // =============================================================================

    /// List every environment the orchestrator drives
    pub async fn list_environments(&self) -> Result<Vec<EnvironmentSummary>> {
        let url = format!("{}/environments", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get one environment by stage name
    pub async fn get_environment(&self, stage: &str) -> Result<EnvironmentSummary> {
        let url = self.environment_url(stage, "");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Arm the Deploy stage of an environment and start the closing run
    ///
    /// # Arguments
    /// * `stage` - Environment stage name
    /// * `revision` - Revision to deliver; the last succeeded run's revision when `None`
    ///
    /// # Returns
    /// The run that deploys the first image
    pub async fn complete_bootstrap(
        &self,
        stage: &str,
        revision: Option<String>,
    ) -> Result<PipelineRun> {
        let url = self.environment_url(stage, "/bootstrap/complete");
        let response = self
            .client
            .post(&url)
            .json(&CompleteBootstrap { revision })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
