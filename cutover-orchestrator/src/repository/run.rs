//! Run Repository
//!
//! Persists pipeline run history. Stage records, artifact summaries and the
//! failure are stored as JSONB next to the scalar run columns.

use async_trait::async_trait;
use cutover_core::domain::run::{PipelineRun, RunStatus};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::RepositoryError;

/// Run history storage
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Inserts the run or replaces the stored copy
    async fn save(&self, run: &PipelineRun) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, environment: &str, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError>;

    /// Runs of one environment, most recent first
    async fn list_by_environment(&self, environment: &str) -> Result<Vec<PipelineRun>, RepositoryError>;

    /// Most recent succeeded run of one environment
    async fn last_succeeded(&self, environment: &str) -> Result<Option<PipelineRun>, RepositoryError>;
}

// =============================================================================
// PostgreSQL
// =============================================================================

pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_RUN: &str = r#"
    SELECT id, environment, revision, status, deploy_enabled, stages, artifacts,
           failure, requested_at, started_at, completed_at
    FROM pipeline_runs
"#;

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn save(&self, run: &PipelineRun) -> Result<(), RepositoryError> {
        let stages = serde_json::to_value(&run.stages)
            .map_err(|e| RepositoryError::Malformed(e.to_string()))?;
        let artifacts = serde_json::to_value(&run.artifacts)
            .map_err(|e| RepositoryError::Malformed(e.to_string()))?;
        let failure = run
            .failure
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| RepositoryError::Malformed(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, environment, revision, status, deploy_enabled,
                                       stages, artifacts, failure, requested_at,
                                       started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                stages = EXCLUDED.stages,
                artifacts = EXCLUDED.artifacts,
                failure = EXCLUDED.failure,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(run.id)
        .bind(&run.environment)
        .bind(&run.revision)
        .bind(status_to_string(run.status))
        .bind(run.deploy_enabled)
        .bind(stages)
        .bind(artifacts)
        .bind(failure)
        .bind(run.requested_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, environment: &str, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "{} WHERE environment = $1 AND id = $2",
            SELECT_RUN
        ))
        .bind(environment)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineRun::try_from).transpose()
    }

    async fn list_by_environment(&self, environment: &str) -> Result<Vec<PipelineRun>, RepositoryError> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "{} WHERE environment = $1 ORDER BY requested_at DESC",
            SELECT_RUN
        ))
        .bind(environment)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineRun::try_from).collect()
    }

    async fn last_succeeded(&self, environment: &str) -> Result<Option<PipelineRun>, RepositoryError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "{} WHERE environment = $1 AND status = $2 ORDER BY completed_at DESC LIMIT 1",
            SELECT_RUN
        ))
        .bind(environment)
        .bind(status_to_string(RunStatus::Succeeded))
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineRun::try_from).transpose()
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Run history kept in process memory, used when no database is configured
#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: Mutex<HashMap<Uuid, PipelineRun>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(&self, environment: &str) -> Vec<PipelineRun> {
        let mut runs: Vec<PipelineRun> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.environment == environment)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        runs
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn save(&self, run: &PipelineRun) -> Result<(), RepositoryError> {
        self.runs.lock().unwrap().insert(run.id, run.clone());
        Ok(())
    }

    async fn find_by_id(&self, environment: &str, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .get(&id)
            .filter(|r| r.environment == environment)
            .cloned())
    }

    async fn list_by_environment(&self, environment: &str) -> Result<Vec<PipelineRun>, RepositoryError> {
        Ok(self.sorted(environment))
    }

    async fn last_succeeded(&self, environment: &str) -> Result<Option<PipelineRun>, RepositoryError> {
        Ok(self
            .sorted(environment)
            .into_iter()
            .filter(|r| r.status == RunStatus::Succeeded)
            .max_by_key(|r| r.completed_at))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "Pending",
        RunStatus::Building => "Building",
        RunStatus::Deploying => "Deploying",
        RunStatus::Succeeded => "Succeeded",
        RunStatus::Failed => "Failed",
    }
}

fn string_to_status(s: &str) -> Result<RunStatus, RepositoryError> {
    match s {
        "Pending" => Ok(RunStatus::Pending),
        "Building" => Ok(RunStatus::Building),
        "Deploying" => Ok(RunStatus::Deploying),
        "Succeeded" => Ok(RunStatus::Succeeded),
        "Failed" => Ok(RunStatus::Failed),
        other => Err(RepositoryError::Malformed(format!("unknown run status '{}'", other))),
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    environment: String,
    revision: String,
    status: String,
    deploy_enabled: bool,
    stages: serde_json::Value,
    artifacts: serde_json::Value,
    failure: Option<serde_json::Value>,
    requested_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<RunRow> for PipelineRun {
    type Error = RepositoryError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let malformed = |e: serde_json::Error| RepositoryError::Malformed(e.to_string());

        Ok(PipelineRun {
            id: row.id,
            environment: row.environment,
            revision: row.revision,
            status: string_to_status(&row.status)?,
            deploy_enabled: row.deploy_enabled,
            stages: serde_json::from_value(row.stages).map_err(malformed)?,
            artifacts: serde_json::from_value(row.artifacts).map_err(malformed)?,
            failure: row
                .failure
                .map(serde_json::from_value)
                .transpose()
                .map_err(malformed)?,
            requested_at: row.requested_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}
