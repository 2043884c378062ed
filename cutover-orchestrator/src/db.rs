use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create pipeline runs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id UUID PRIMARY KEY,
            environment VARCHAR(64) NOT NULL,
            revision VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            deploy_enabled BOOLEAN NOT NULL,
            stages JSONB NOT NULL DEFAULT '[]',
            artifacts JSONB NOT NULL DEFAULT '[]',
            failure JSONB,
            requested_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runs_environment ON pipeline_runs(environment, requested_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON pipeline_runs(environment, status)")
        .execute(pool)
        .await?;

    // Create deployment groups table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployment_groups (
            name VARCHAR(255) PRIMARY KEY,
            active VARCHAR(16) NOT NULL,
            active_image JSONB NOT NULL,
            promoted_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
