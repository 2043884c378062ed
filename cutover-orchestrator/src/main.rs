//! Cutover Orchestrator
//!
//! Drives one delivery pipeline per environment: Source, Build, and a
//! blue/green Deploy stage that shifts production traffic in fixed
//! increments and rolls back on the first failed health check.
//!
//! Architecture:
//! - Configuration: environments, listeners and rollout policy from the environment
//! - Repositories: run history in PostgreSQL, or in memory without DATABASE_URL
//! - Services: pipelines, deployment controllers, source watcher
//! - API: HTTP control plane for runs, rollouts and the bootstrap protocol

use anyhow::{Context, Result};
use cutover_core::domain::deployment::DeploymentGroup;
use cutover_core::domain::environment::BootstrapPhase;
use cutover_core::domain::pool::{ListenerRef, ListenerRole, PoolColor};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod podman;
pub mod repository;
pub mod service;

use crate::config::{Config, RuntimeKind};
use crate::repository::{
    GroupRepository, InMemoryGroupRepository, InMemoryRunRepository, PgGroupRepository,
    PgRunRepository, RunRepository,
};
use crate::service::build::{BuildAction, BuildStage, InMemoryBuildAction};
use crate::service::health::{AssumeHealthy, HealthChecker, HttpHealthChecker};
use crate::service::runtime::{InMemoryLauncher, ServiceRuntime, TaskLauncher};
use crate::service::source::{GitSource, LocalSource, SourceProvider};
use crate::service::traffic::{HttpRouter, InMemoryRouter, TrafficRouter};
use crate::service::{DeploymentController, Fleet, PipelineOrchestrator, SourceWatcher};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cutover_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cutover Orchestrator...");

    // Load configuration
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        "Loaded configuration: {} environment(s), runtime={:?}, owner={}",
        config.environments.len(),
        config.runtime,
        config.owner
    );

    let (runs, groups) = connect_repositories(&config).await?;

    // Collaborators shared by every environment
    let (launcher, action, health): (
        Arc<dyn TaskLauncher>,
        Arc<dyn BuildAction>,
        Arc<dyn HealthChecker>,
    ) = match config.runtime {
        RuntimeKind::Podman => {
            podman::check_podman_available().await?;
            (
                Arc::new(podman::PodmanLauncher::default()),
                Arc::new(podman::PodmanBuildAction::new()),
                Arc::new(HttpHealthChecker::new()),
            )
        }
        RuntimeKind::Memory => {
            warn!("Running with the memory runtime; no image is built and no task is started");
            (
                Arc::new(InMemoryLauncher::new()),
                Arc::new(InMemoryBuildAction::new()),
                Arc::new(AssumeHealthy),
            )
        }
    };

    let source: Arc<dyn SourceProvider> = match &config.source_repo {
        Some(repo) => Arc::new(GitSource::new(repo.clone(), config.source_branch.clone())),
        None => {
            let dir = std::env::current_dir().context("Failed to resolve working directory")?;
            info!("No source repository configured, building {}", dir.display());
            Arc::new(LocalSource::new(dir))
        }
    };

    let build = Arc::new(BuildStage::new(action, config.build.clone()));
    let phase = if config.bootstrapped {
        BootstrapPhase::Complete
    } else {
        BootstrapPhase::Initial
    };

    // One pipeline and one deployment controller per environment
    let mut fleet = Fleet::new();
    for env in &config.environments {
        let prefix = env.resource_prefix(&config.owner);
        let service_name = format!("{}-fargate-svc", prefix);

        let group = DeploymentGroup::new(
            prefix.clone(),
            service_name.clone(),
            config.policy.clone(),
            ListenerRef::new(ListenerRole::Prod, &config.listener_host, config.prod_port),
            ListenerRef::new(ListenerRole::Test, &config.listener_host, config.test_port),
            config.health_path.clone(),
        );

        let router: Arc<dyn TrafficRouter> = match &config.router_url {
            Some(url) => Arc::new(
                HttpRouter::new(url.clone())
                    .with_context(|| format!("Failed to create router client for {}", url))?,
            ),
            None => Arc::new(InMemoryRouter::new(PoolColor::Blue)),
        };

        let runtime = Arc::new(ServiceRuntime::new(
            service_name,
            config.desired_count,
            launcher.clone(),
        ));
        let controller =
            DeploymentController::resume(group, runtime, router, health.clone(), groups.clone())
                .await
                .with_context(|| format!("Failed to restore deployment group {}", prefix))?
                .spawn();

        let pipeline = PipelineOrchestrator::new(
            env.clone(),
            config.owner.clone(),
            source.clone(),
            build.clone(),
            controller,
            runs.clone(),
            config.workspace.clone(),
            phase,
        );

        info!(
            "Registered pipeline {} ({}, deploy stage {})",
            pipeline.pipeline_name(),
            env,
            if phase.deploy_enabled() { "armed" } else { "not armed" }
        );
        fleet.register(pipeline)?;
    }
    let fleet = Arc::new(fleet);

    // Watch the source branch only when a repository is configured
    if config.source_repo.is_some() {
        let last_seen = last_built_revision(&config, &runs).await?;
        let watcher = SourceWatcher::new(
            source,
            fleet.clone(),
            config.source_poll_interval,
            last_seen,
        );
        tokio::spawn(watcher.run());
    }

    // Build router with all API endpoints
    let app = api::create_router(api::AppState::new(fleet));

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}

/// Run history and promotions in PostgreSQL when DATABASE_URL is set, in
/// memory otherwise
async fn connect_repositories(
    config: &Config,
) -> Result<(Arc<dyn RunRepository>, Arc<dyn GroupRepository>)> {
    let Some(database_url) = &config.database_url else {
        warn!("DATABASE_URL not set, run history and promotions are kept in memory");
        return Ok((
            Arc::new(InMemoryRunRepository::new()),
            Arc::new(InMemoryGroupRepository::new()),
        ));
    };

    info!("Connecting to database...");
    let pool = db::create_pool(database_url)
        .await
        .context("Failed to create database pool")?;

    info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok((
        Arc::new(PgRunRepository::new(pool.clone())),
        Arc::new(PgGroupRepository::new(pool)),
    ))
}

/// Revision of the most recent succeeded run of the first environment
///
/// Keeps a restart from rebuilding a head that was already delivered.
async fn last_built_revision(
    config: &Config,
    runs: &Arc<dyn RunRepository>,
) -> Result<Option<String>> {
    let Some(env) = config.environments.first() else {
        return Ok(None);
    };

    let last = runs
        .last_succeeded(env.stage())
        .await
        .context("Failed to read run history")?;
    Ok(last.map(|run| run.revision))
}
