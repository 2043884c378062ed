//! Error taxonomy
//!
//! Stage-local errors (source, build) halt a pipeline run. Rollout-local
//! errors are recovered by the deployment controller through rollback and only
//! surface as `DeploymentError`.

use cutover_core::domain::deployment::FailureReason;
use cutover_core::domain::pool::PoolColor;
use cutover_core::domain::run::{RevisionError, StageKind};
use thiserror::Error;

/// Source stage failures
#[derive(Debug, Error)]
pub enum SourceFetchError {
    #[error("revision '{0}' not found")]
    RevisionNotFound(String),

    #[error("source command failed: {0}")]
    CommandFailed(String),

    #[error(transparent)]
    InvalidRevision(#[from] RevisionError),

    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build stage failures, surfaced without local retry
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build action failed (exit code {exit_code}): {message}")]
    ActionFailed { exit_code: i32, message: String },

    #[error("registry rejected push: {0}")]
    PushDenied(String),

    #[error("build stage received a non-source artifact '{0}'")]
    UnexpectedArtifact(String),
}

/// A single failed health check
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HealthCheckError {
    #[error("health check timed out")]
    Timeout,

    #[error("unhealthy response: HTTP {0}")]
    Unhealthy(u16),

    #[error("health endpoint unreachable: {0}")]
    Unreachable(String),
}

impl From<HealthCheckError> for FailureReason {
    fn from(err: HealthCheckError) -> Self {
        match err {
            HealthCheckError::Timeout => FailureReason::HealthCheckTimeout,
            other => FailureReason::HealthCheckFailed(other.to_string()),
        }
    }
}

/// Service runtime failures
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to launch tasks for {pool} pool: {message}")]
    LaunchFailed { pool: PoolColor, message: String },

    #[error("failed to stop tasks for {pool} pool: {message}")]
    StopFailed { pool: PoolColor, message: String },
}

/// Listener weight updates rejected by the router
#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("router request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("router rejected update (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Rollout failures reported upstream
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// Rolled back to the original weighting
    #[error("deployment failed at {reached_weight}% shifted: {reason}")]
    DeploymentFailed {
        reason: FailureReason,
        reached_weight: u8,
    },

    /// Rollback could not restore the original weighting; operator action required
    #[error("rollback failed after {reason}: {message}")]
    RollbackFailed {
        reason: FailureReason,
        message: String,
    },

    #[error("controller is faulted and refuses new rollouts: {0}")]
    ControllerFaulted(String),

    #[error("deployment controller stopped")]
    ControllerStopped,
}

impl DeploymentError {
    /// Whether the error leaves the group needing operator intervention
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeploymentError::RollbackFailed { .. } | DeploymentError::ControllerFaulted(_)
        )
    }
}

/// Artifact channel misuse
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("artifact '{0}' has not been produced yet")]
    NotProduced(String),

    #[error("artifact '{0}' was already produced")]
    AlreadyProduced(String),

    #[error("stage {consumer} is not a consumer of artifact '{name}'")]
    NotAConsumer { name: String, consumer: StageKind },

    #[error("artifact '{name}' was already consumed by stage {consumer}")]
    AlreadyConsumed { name: String, consumer: StageKind },
}

/// Run history persistence failures
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored run is malformed: {0}")]
    Malformed(String),
}

/// Run could not be recorded
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    InvalidRevision(#[from] RevisionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Bootstrap protocol misuse
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap already complete for environment '{0}'")]
    AlreadyComplete(String),

    #[error("no succeeded run yet for environment '{0}'; run the pipeline with deploy disabled first")]
    NoImageYet(String),

    #[error(transparent)]
    InvalidRevision(#[from] RevisionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<RunError> for BootstrapError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::InvalidRevision(e) => BootstrapError::InvalidRevision(e),
            RunError::Repository(e) => BootstrapError::Repository(e),
        }
    }
}

/// Environment registry misuse
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("environment '{0}' is already registered")]
    DuplicateStage(String),

    #[error("resource prefix '{0}' is already used by another environment")]
    DuplicatePrefix(String),
}
