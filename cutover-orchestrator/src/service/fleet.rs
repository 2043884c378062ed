//! Environment fleet
//!
//! One pipeline per environment. Pipelines share no mutable state, so a
//! revision fans out to every environment without ordering between them.

use cutover_core::domain::run::PipelineRun;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::FleetError;
use crate::service::pipeline::PipelineOrchestrator;

#[derive(Default)]
pub struct Fleet {
    pipelines: BTreeMap<String, Arc<PipelineOrchestrator>>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pipeline; stage names and resource prefixes must be unique
    pub fn register(&mut self, pipeline: PipelineOrchestrator) -> Result<(), FleetError> {
        let stage = pipeline.stage().to_string();
        if self.pipelines.contains_key(&stage) {
            return Err(FleetError::DuplicateStage(stage));
        }

        let prefix = pipeline.resource_prefix();
        if self.pipelines.values().any(|p| p.resource_prefix() == prefix) {
            return Err(FleetError::DuplicatePrefix(prefix));
        }

        info!("Registered environment {} ({})", stage, prefix);
        self.pipelines.insert(stage, Arc::new(pipeline));
        Ok(())
    }

    pub fn get(&self, stage: &str) -> Option<&Arc<PipelineOrchestrator>> {
        self.pipelines.get(stage)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &Arc<PipelineOrchestrator>> {
        self.pipelines.values()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Starts a background run of `revision` in every environment
    pub async fn enqueue_all(&self, revision: &str) -> Vec<PipelineRun> {
        let mut started = Vec::with_capacity(self.pipelines.len());
        for pipeline in self.pipelines.values() {
            match pipeline.enqueue(revision).await {
                Ok(run) => started.push(run),
                Err(e) => error!(
                    "Failed to start run of {} for {}: {}",
                    revision,
                    pipeline.stage(),
                    e
                ),
            }
        }
        started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::test_pipeline;
    use cutover_core::domain::environment::BootstrapPhase;
    use cutover_core::domain::run::RunStatus;

    fn unwrap_pipeline(stage: &str) -> PipelineOrchestrator {
        let built = test_pipeline(stage, BootstrapPhase::Complete, Arc::default());
        Arc::try_unwrap(built.pipeline).ok().unwrap()
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let mut fleet = Fleet::new();
        fleet.register(unwrap_pipeline("dev")).unwrap();
        fleet.register(unwrap_pipeline("prod")).unwrap();

        assert_eq!(
            fleet.register(unwrap_pipeline("dev")),
            Err(FleetError::DuplicateStage("dev".to_string()))
        );
        assert_eq!(fleet.len(), 2);
        assert!(fleet.get("prod").is_some());
        assert!(fleet.get("qa").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_all_starts_one_run_per_environment() {
        let mut fleet = Fleet::new();
        fleet.register(unwrap_pipeline("dev")).unwrap();
        fleet.register(unwrap_pipeline("prod")).unwrap();

        let started = fleet.enqueue_all("rev1").await;
        let stages: Vec<_> = started.iter().map(|r| r.environment.as_str()).collect();
        assert_eq!(stages, vec!["dev", "prod"]);
        assert!(started.iter().all(|r| r.status == RunStatus::Pending));

        assert!(fleet.enqueue_all("../rev1").await.is_empty());
    }
}
