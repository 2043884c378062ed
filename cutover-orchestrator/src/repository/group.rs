//! Deployment Group Repository
//!
//! Remembers which pool of each deployment group serves production traffic,
//! so a restarted orchestrator updates the standby pool and never the live one.

use async_trait::async_trait;
use cutover_core::domain::artifact::ImageRef;
use cutover_core::domain::pool::PoolColor;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::RepositoryError;

/// Last promotion recorded for a deployment group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePool {
    pub color: PoolColor,
    pub image: ImageRef,
    pub promoted_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// Records that `color` became active running `image`
    async fn record_promotion(
        &self,
        group: &str,
        color: PoolColor,
        image: &ImageRef,
    ) -> Result<(), RepositoryError>;

    /// Last recorded promotion; `None` for a group that was never promoted
    async fn active_pool(&self, group: &str) -> Result<Option<ActivePool>, RepositoryError>;
}

// =============================================================================
// PostgreSQL
// =============================================================================

pub struct PgGroupRepository {
    pool: PgPool,
}

impl PgGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepository for PgGroupRepository {
    async fn record_promotion(
        &self,
        group: &str,
        color: PoolColor,
        image: &ImageRef,
    ) -> Result<(), RepositoryError> {
        let image =
            serde_json::to_value(image).map_err(|e| RepositoryError::Malformed(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO deployment_groups (name, active, active_image, promoted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET active = EXCLUDED.active,
                active_image = EXCLUDED.active_image,
                promoted_at = EXCLUDED.promoted_at
            "#,
        )
        .bind(group)
        .bind(color.as_str())
        .bind(image)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn active_pool(&self, group: &str) -> Result<Option<ActivePool>, RepositoryError> {
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT active, active_image, promoted_at FROM deployment_groups WHERE name = $1",
        )
        .bind(group)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ActivePool::try_from).transpose()
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Promotions kept in process memory, used when no database is configured
#[derive(Default)]
pub struct InMemoryGroupRepository {
    groups: Mutex<HashMap<String, ActivePool>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn record_promotion(
        &self,
        group: &str,
        color: PoolColor,
        image: &ImageRef,
    ) -> Result<(), RepositoryError> {
        self.groups.lock().unwrap().insert(
            group.to_string(),
            ActivePool {
                color,
                image: image.clone(),
                promoted_at: chrono::Utc::now(),
            },
        );
        Ok(())
    }

    async fn active_pool(&self, group: &str) -> Result<Option<ActivePool>, RepositoryError> {
        Ok(self.groups.lock().unwrap().get(group).cloned())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn string_to_color(s: &str) -> Result<PoolColor, RepositoryError> {
    match s {
        "blue" => Ok(PoolColor::Blue),
        "green" => Ok(PoolColor::Green),
        other => Err(RepositoryError::Malformed(format!("unknown pool color '{}'", other))),
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    active: String,
    active_image: serde_json::Value,
    promoted_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<GroupRow> for ActivePool {
    type Error = RepositoryError;

    fn try_from(row: GroupRow) -> Result<Self, Self::Error> {
        Ok(ActivePool {
            color: string_to_color(&row.active)?,
            image: serde_json::from_value(row.active_image)
                .map_err(|e| RepositoryError::Malformed(e.to_string()))?,
            promoted_at: row.promoted_at,
        })
    }
}
