//! Pipeline run DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus, StageKind};

/// Request to start a run for a source revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRun {
    pub revision: String,
}

/// Lightweight run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub environment: String,
    pub revision: String,
    pub status: RunStatus,
    pub deploy_enabled: bool,
    pub failed_stage: Option<StageKind>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<PipelineRun> for RunSummary {
    fn from(run: PipelineRun) -> Self {
        Self {
            id: run.id,
            environment: run.environment,
            revision: run.revision,
            status: run.status,
            deploy_enabled: run.deploy_enabled,
            failed_stage: run.failure.map(|f| f.stage),
            requested_at: run.requested_at,
            completed_at: run.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_summary_conversion() {
        let mut run = PipelineRun::new("dev", "abc123", true);
        run.begin_stage(StageKind::Build);
        run.fail(StageKind::Build, "exit 1", false);

        let summary: RunSummary = run.clone().into();
        assert_eq!(summary.id, run.id);
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.failed_stage, Some(StageKind::Build));
    }
}
