//! Pipeline run domain types

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::artifact::ArtifactSummary;

/// Pipeline stage kinds, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    Source,
    Build,
    Deploy,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageKind::Source => "Source",
            StageKind::Build => "Build",
            StageKind::Deploy => "Deploy",
        };
        f.write_str(s)
    }
}

/// Terminal and intermediate states of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Building,
    Deploying,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Building => 1,
            RunStatus::Deploying => 2,
            RunStatus::Succeeded | RunStatus::Failed => 3,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "Pending",
            RunStatus::Building => "Building",
            RunStatus::Deploying => "Deploying",
            RunStatus::Succeeded => "Succeeded",
            RunStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Rejected run status transition
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid run transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Longest revision accepted; revisions name a checkout directory
pub const MAX_REVISION_LEN: usize = 255;

/// Revision rejected before a run is recorded
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RevisionError {
    #[error("revision cannot be empty")]
    Empty,

    #[error("revision is longer than {MAX_REVISION_LEN} characters")]
    TooLong,

    #[error("revision '{0}' must not start with '-'")]
    OptionLike(String),

    #[error("revision '{0}' may only contain letters, digits, '.', '_' and '-'")]
    InvalidCharacter(String),

    #[error("revision '{0}' must not contain '..'")]
    ParentReference(String),
}

/// Checks that `revision` is a plain commit id or ref name
///
/// Revisions become a directory name under the workspace and a positional
/// argument to the version-control tool, so path separators, `..` and a
/// leading `-` are refused.
pub fn validate_revision(revision: &str) -> Result<(), RevisionError> {
    if revision.is_empty() {
        return Err(RevisionError::Empty);
    }
    if revision.len() > MAX_REVISION_LEN {
        return Err(RevisionError::TooLong);
    }
    if revision.starts_with('-') {
        return Err(RevisionError::OptionLike(revision.to_string()));
    }
    if !revision
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(RevisionError::InvalidCharacter(revision.to_string()));
    }
    if revision == "." || revision.contains("..") {
        return Err(RevisionError::ParentReference(revision.to_string()));
    }
    Ok(())
}

/// Outcome of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Running,
    Succeeded,
    Failed,
    /// Stage disabled for this run (bootstrap phase)
    Skipped,
}

/// Execution record for one stage of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub status: StageStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub message: Option<String>,
}

/// Failure of a run and the stage it originated in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: StageKind,
    pub message: String,
    /// Set when operator intervention is required before the next rollout
    pub fatal: bool,
}

/// One execution of Source -> Build -> Deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    /// Stage name of the environment this run belongs to
    pub environment: String,
    pub revision: String,
    pub status: RunStatus,
    pub deploy_enabled: bool,
    pub stages: Vec<StageRecord>,
    pub artifacts: Vec<ArtifactSummary>,
    pub failure: Option<RunFailure>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PipelineRun {
    pub fn new(environment: impl Into<String>, revision: impl Into<String>, deploy_enabled: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            environment: environment.into(),
            revision: revision.into(),
            status: RunStatus::Pending,
            deploy_enabled,
            stages: Vec::new(),
            artifacts: Vec::new(),
            failure: None,
            requested_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Moves the run forward; progression is strictly monotonic and terminal
    /// states are final
    pub fn advance(&mut self, to: RunStatus) -> Result<(), TransitionError> {
        let from = self.status;
        let allowed = match (from, to) {
            (_, _) if from.is_terminal() => false,
            (_, RunStatus::Failed) => true,
            (RunStatus::Building, RunStatus::Succeeded) => !self.deploy_enabled,
            (RunStatus::Deploying, RunStatus::Succeeded) => true,
            (_, RunStatus::Succeeded) => false,
            _ => to.rank() == from.rank() + 1,
        };

        if !allowed {
            return Err(TransitionError { from, to });
        }

        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now());
        }
        if to.is_terminal() {
            self.completed_at = Some(chrono::Utc::now());
        }
        self.status = to;
        Ok(())
    }

    /// Records the start of a stage
    pub fn begin_stage(&mut self, stage: StageKind) {
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now());
        }
        self.stages.push(StageRecord {
            stage,
            status: StageStatus::Running,
            started_at: chrono::Utc::now(),
            finished_at: None,
            message: None,
        });
    }

    /// Records the end of the most recent record for `stage`
    pub fn finish_stage(&mut self, stage: StageKind, status: StageStatus, message: Option<String>) {
        let now = chrono::Utc::now();
        match self.stages.iter_mut().rev().find(|r| r.stage == stage) {
            Some(record) => {
                record.status = status;
                record.finished_at = Some(now);
                record.message = message;
            }
            None => self.stages.push(StageRecord {
                stage,
                status,
                started_at: now,
                finished_at: Some(now),
                message,
            }),
        }
    }

    /// Fails the run at `stage`; later stages never start
    pub fn fail(&mut self, stage: StageKind, message: impl Into<String>, fatal: bool) {
        let message = message.into();
        self.finish_stage(stage, StageStatus::Failed, Some(message.clone()));
        self.failure = Some(RunFailure {
            stage,
            message,
            fatal,
        });
        // Failed is reachable from every non-terminal state
        let _ = self.advance(RunStatus::Failed);
    }

    pub fn stage(&self, stage: StageKind) -> Option<&StageRecord> {
        self.stages.iter().rev().find(|r| r.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_progression() {
        let mut run = PipelineRun::new("dev", "abc123", true);
        assert!(run.advance(RunStatus::Deploying).is_err());
        assert!(run.advance(RunStatus::Building).is_ok());
        assert!(run.advance(RunStatus::Pending).is_err());
        assert!(run.advance(RunStatus::Succeeded).is_err());
        assert!(run.advance(RunStatus::Deploying).is_ok());
        assert!(run.advance(RunStatus::Succeeded).is_ok());
        assert!(run.completed_at.is_some());
        assert!(run.advance(RunStatus::Failed).is_err());
    }

    #[test]
    fn test_build_may_succeed_when_deploy_disabled() {
        let mut run = PipelineRun::new("dev", "abc123", false);
        run.advance(RunStatus::Building).unwrap();
        assert!(run.advance(RunStatus::Succeeded).is_ok());
    }

    #[test]
    fn test_validate_revision() {
        assert!(validate_revision("3f9c2ab").is_ok());
        assert!(validate_revision("v1.2.0-rc_1").is_ok());

        assert_eq!(validate_revision(""), Err(RevisionError::Empty));
        assert!(matches!(
            validate_revision("../../victim"),
            Err(RevisionError::InvalidCharacter(_))
        ));
        assert!(matches!(
            validate_revision("/etc"),
            Err(RevisionError::InvalidCharacter(_))
        ));
        assert!(matches!(
            validate_revision(".."),
            Err(RevisionError::ParentReference(_))
        ));
        assert!(matches!(
            validate_revision("--upload-pack=touch"),
            Err(RevisionError::OptionLike(_))
        ));
        assert_eq!(
            validate_revision(&"a".repeat(MAX_REVISION_LEN + 1)),
            Err(RevisionError::TooLong)
        );
    }

    #[test]
    fn test_fail_records_stage() {
        let mut run = PipelineRun::new("dev", "abc123", true);
        run.begin_stage(StageKind::Source);
        run.fail(StageKind::Source, "repository unreachable", false);

        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.as_ref().unwrap();
        assert_eq!(failure.stage, StageKind::Source);
        assert_eq!(run.stage(StageKind::Source).unwrap().status, StageStatus::Failed);
        assert!(run.stage(StageKind::Build).is_none());
    }
}
