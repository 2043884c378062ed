//! Scriptable collaborators for service tests

use async_trait::async_trait;
use cutover_core::domain::artifact::{Artifact, ArtifactPayload};
use cutover_core::domain::deployment::{DeploymentGroup, RolloutPolicy};
use cutover_core::domain::environment::{BootstrapPhase, EnvironmentConfig};
use cutover_core::domain::pool::{ListenerRef, ListenerRole, PoolColor};
use cutover_core::domain::run::StageKind;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{HealthCheckError, SourceFetchError};
use crate::repository::{InMemoryGroupRepository, InMemoryRunRepository};
use crate::service::build::{BuildSettings, BuildStage, InMemoryBuildAction};
use crate::service::controller::DeploymentController;
use crate::service::health::HealthChecker;
use crate::service::pipeline::PipelineOrchestrator;
use crate::service::runtime::{InMemoryLauncher, ServiceRuntime};
use crate::service::source::{SOURCE_ARTIFACT, SourceProvider};
use crate::service::traffic::InMemoryRouter;

/// Health checker whose answers are scripted by call number (1-based)
#[derive(Default)]
pub struct ScriptedHealth {
    calls: AtomicUsize,
    failures: Mutex<HashMap<usize, HealthCheckError>>,
    hang: Mutex<Option<usize>>,
    always: Mutex<Option<HealthCheckError>>,
}

impl ScriptedHealth {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_on(&self, call: usize, err: HealthCheckError) {
        self.failures.lock().unwrap().insert(call, err);
    }

    /// The given call never answers
    pub fn hang_on(&self, call: usize) {
        *self.hang.lock().unwrap() = Some(call);
    }

    pub fn always(&self, err: HealthCheckError) {
        *self.always.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl HealthChecker for ScriptedHealth {
    async fn check(&self, _url: &str, _timeout: Duration) -> Result<(), HealthCheckError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let hangs = *self.hang.lock().unwrap() == Some(call);
        if hangs {
            std::future::pending::<()>().await;
        }

        let always = self.always.lock().unwrap().clone();
        let scripted = self.failures.lock().unwrap().remove(&call);
        match always.or(scripted) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Source host serving a fixed head revision
pub struct StaticSource {
    pub head: Mutex<String>,
    pub fetches: Mutex<Vec<String>>,
    pub missing: Mutex<Vec<String>>,
}

impl StaticSource {
    pub fn new(head: &str) -> Self {
        Self {
            head: Mutex::new(head.to_string()),
            fetches: Mutex::new(Vec::new()),
            missing: Mutex::new(Vec::new()),
        }
    }

    pub fn set_head(&self, head: &str) {
        *self.head.lock().unwrap() = head.to_string();
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceProvider for StaticSource {
    async fn latest_revision(&self) -> Result<String, SourceFetchError> {
        Ok(self.head.lock().unwrap().clone())
    }

    async fn fetch(&self, revision: &str, workspace: &Path) -> Result<Artifact, SourceFetchError> {
        if self.missing.lock().unwrap().iter().any(|r| r == revision) {
            return Err(SourceFetchError::RevisionNotFound(revision.to_string()));
        }
        self.fetches.lock().unwrap().push(revision.to_string());
        Ok(Artifact::new(
            SOURCE_ARTIFACT,
            StageKind::Source,
            ArtifactPayload::SourceBundle {
                revision: revision.to_string(),
                path: workspace.join(revision),
            },
        ))
    }
}

/// Pipeline wired to in-memory collaborators
pub struct TestPipeline {
    pub pipeline: Arc<PipelineOrchestrator>,
    pub source: Arc<StaticSource>,
    pub build: Arc<InMemoryBuildAction>,
    pub health: Arc<ScriptedHealth>,
    pub router: Arc<InMemoryRouter>,
    pub runs: Arc<InMemoryRunRepository>,
}

/// Two 50% steps, 10s apart, no bake
pub fn quick_policy() -> RolloutPolicy {
    RolloutPolicy {
        shift_increment_percent: 50,
        shift_interval_secs: 10,
        bake_time_secs: 0,
        health_check_timeout_secs: 2,
        ready_timeout_secs: 30,
    }
}

pub fn test_pipeline(stage: &str, phase: BootstrapPhase, runs: Arc<InMemoryRunRepository>) -> TestPipeline {
    let env = EnvironmentConfig::new("123456789012", "ap-southeast-1", stage, "sin").unwrap();
    let source = Arc::new(StaticSource::new("rev1"));
    let build = Arc::new(InMemoryBuildAction::new());
    let health = Arc::new(ScriptedHealth::healthy());
    let router = Arc::new(InMemoryRouter::new(PoolColor::Blue));

    let group = DeploymentGroup::new(
        format!("{}-group", stage),
        "svc",
        quick_policy(),
        ListenerRef::new(ListenerRole::Prod, "alb", 80),
        ListenerRef::new(ListenerRole::Test, "alb", 8080),
        "/",
    );
    let runtime = Arc::new(ServiceRuntime::new("svc", 2, Arc::new(InMemoryLauncher::new())));
    let controller = DeploymentController::new(
        group,
        runtime,
        router.clone(),
        health.clone(),
        Arc::new(InMemoryGroupRepository::new()),
    )
    .spawn();

    let pipeline = Arc::new(PipelineOrchestrator::new(
        env,
        "simflexcloud",
        source.clone(),
        Arc::new(BuildStage::new(build.clone(), BuildSettings::default())),
        controller,
        runs.clone(),
        PathBuf::from("/tmp/cutover-test"),
        phase,
    ));

    TestPipeline {
        pipeline,
        source,
        build,
        health,
        router,
        runs,
    }
}
