//! Pipeline run endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use cutover_core::domain::run::PipelineRun;
use cutover_core::dto::run::{RunSummary, TriggerRun};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Runs
    // =============================================================================

    /// Start a run of `revision` in an environment
    ///
    /// The run executes in the background; the returned record is pending.
    ///
    /// # Example
    /// ```no_run
    /// # use cutover_client::OrchestratorClient;
    /// # async fn example() -> cutover_client::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let run = client.trigger_run("dev", "4f2a9c1").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn trigger_run(&self, stage: &str, revision: &str) -> Result<PipelineRun> {
        let url = self.environment_url(stage, "/runs");
        let response = self
            .client
            .post(&url)
            .json(&TriggerRun {
                revision: revision.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List runs of an environment, most recent first
    pub async fn list_runs(&self, stage: &str) -> Result<Vec<RunSummary>> {
        let url = self.environment_url(stage, "/runs");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get a run by ID
    pub async fn get_run(&self, stage: &str, run_id: Uuid) -> Result<PipelineRun> {
        let url = self.environment_url(stage, &format!("/runs/{}", run_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
