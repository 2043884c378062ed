//! Pipeline orchestrator
//!
//! Sequences Source -> Build -> Deploy for one environment. Stages hand off
//! through write-once artifact channels, so a stage can only start once its
//! predecessor has published. A failed stage halts the run; nothing after it
//! executes and the deployment group is left untouched.
//!
//! The Deploy stage is gated by the environment's bootstrap phase. Until an
//! operator completes the bootstrap, runs stop after Build and record Deploy
//! as skipped. Completing the bootstrap arms Deploy and launches the run that
//! closes the loop; from then on every run executes all stages.

use cutover_core::domain::artifact::{Artifact, ArtifactSummary};
use cutover_core::domain::environment::{BootstrapPhase, EnvironmentConfig};
use cutover_core::domain::run::{
    PipelineRun, RunStatus, StageKind, StageStatus, validate_revision,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::error::{BootstrapError, RepositoryError, RunError};
use crate::repository::RunRepository;
use crate::service::artifact::ArtifactChannel;
use crate::service::build::{BUILD_ARTIFACT, BuildStage};
use crate::service::controller::ControllerHandle;
use crate::service::source::{SOURCE_ARTIFACT, SourceProvider};

/// Stage failure recorded on the run
struct Halt {
    stage: StageKind,
    message: String,
    fatal: bool,
}

impl Halt {
    fn at(stage: StageKind, err: impl std::fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
            fatal: false,
        }
    }
}

/// Channels of one run, discarded when the run ends
struct RunChannels {
    source: ArtifactChannel,
    build: ArtifactChannel,
}

impl RunChannels {
    fn new() -> Self {
        Self {
            source: ArtifactChannel::new(SOURCE_ARTIFACT, StageKind::Source, &[StageKind::Build]),
            build: ArtifactChannel::new(BUILD_ARTIFACT, StageKind::Build, &[StageKind::Deploy]),
        }
    }

    fn discard(&mut self) {
        self.source.discard();
        self.build.discard();
    }
}

/// Pipeline for one environment
pub struct PipelineOrchestrator {
    env: EnvironmentConfig,
    owner: String,
    source: Arc<dyn SourceProvider>,
    build: Arc<BuildStage>,
    controller: ControllerHandle,
    runs: Arc<dyn RunRepository>,
    workspace: PathBuf,
    phase: Mutex<BootstrapPhase>,
    // Held for the whole of a run; tokio's mutex grants it in request order
    serial: tokio::sync::Mutex<()>,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        env: EnvironmentConfig,
        owner: impl Into<String>,
        source: Arc<dyn SourceProvider>,
        build: Arc<BuildStage>,
        controller: ControllerHandle,
        runs: Arc<dyn RunRepository>,
        workspace: PathBuf,
        phase: BootstrapPhase,
    ) -> Self {
        Self {
            env,
            owner: owner.into(),
            source,
            build,
            controller,
            runs,
            workspace,
            phase: Mutex::new(phase),
            serial: tokio::sync::Mutex::new(()),
        }
    }

    pub fn environment(&self) -> &EnvironmentConfig {
        &self.env
    }

    /// Stage name that scopes this pipeline's history
    pub fn stage(&self) -> &str {
        self.env.stage()
    }

    pub fn resource_prefix(&self) -> String {
        self.env.resource_prefix(&self.owner)
    }

    pub fn pipeline_name(&self) -> String {
        self.env.pipeline_name(&self.owner)
    }

    pub fn bootstrap_phase(&self) -> BootstrapPhase {
        *self.phase.lock().unwrap()
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    pub fn runs(&self) -> &Arc<dyn RunRepository> {
        &self.runs
    }

    /// Runs the pipeline for `revision` and returns the terminal run
    ///
    /// Stage failures are recorded on the returned run; only a rejected
    /// revision or a persistence error is returned as `Err`.
    pub async fn run(&self, revision: &str) -> Result<PipelineRun, RunError> {
        let run = self.pending(revision).await?;
        Ok(self.execute(run).await?)
    }

    /// Records a pending run and executes it in the background
    pub async fn enqueue(self: &Arc<Self>, revision: &str) -> Result<PipelineRun, RunError> {
        let run = self.pending(revision).await?;

        let this = Arc::clone(self);
        let pending = run.clone();
        tokio::spawn(async move {
            let id = pending.id;
            if let Err(e) = this.execute(pending).await {
                error!("Failed to persist run {} for {}: {}", id, this.stage(), e);
            }
        });

        Ok(run)
    }

    /// Phase (b) of the bootstrap: arms the Deploy stage and launches the
    /// run that deploys the image built during phase (a)
    ///
    /// `revision` defaults to the revision of the last succeeded run.
    pub async fn complete_bootstrap(
        self: &Arc<Self>,
        revision: Option<String>,
    ) -> Result<PipelineRun, BootstrapError> {
        if self.bootstrap_phase() == BootstrapPhase::Complete {
            return Err(BootstrapError::AlreadyComplete(self.stage().to_string()));
        }
        if let Some(revision) = &revision {
            validate_revision(revision)?;
        }

        let last = self
            .runs
            .last_succeeded(self.stage())
            .await?
            .ok_or_else(|| BootstrapError::NoImageYet(self.stage().to_string()))?;
        let revision = revision.unwrap_or(last.revision);

        {
            let mut phase = self.phase.lock().unwrap();
            if *phase == BootstrapPhase::Complete {
                return Err(BootstrapError::AlreadyComplete(self.stage().to_string()));
            }
            *phase = BootstrapPhase::Complete;
        }

        info!(
            "Bootstrap complete for {}; deploying revision {}",
            self.stage(),
            revision
        );
        Ok(self.enqueue(&revision).await?)
    }

    async fn pending(&self, revision: &str) -> Result<PipelineRun, RunError> {
        validate_revision(revision)?;
        let run = PipelineRun::new(
            self.stage(),
            revision,
            self.bootstrap_phase().deploy_enabled(),
        );
        self.runs.save(&run).await?;
        Ok(run)
    }

    async fn execute(&self, mut run: PipelineRun) -> Result<PipelineRun, RepositoryError> {
        let _serial = self.serial.lock().await;

        info!(
            "Run {} started for {} at revision {} (deploy {})",
            run.id,
            self.stage(),
            run.revision,
            if run.deploy_enabled { "enabled" } else { "disabled" }
        );

        let mut channels = RunChannels::new();
        let outcome = self.run_stages(&mut run, &mut channels).await;
        channels.discard();

        if let Err(halt) = outcome? {
            if halt.fatal {
                error!(
                    "Run {} for {} failed at {}: {} (operator intervention required)",
                    run.id,
                    self.stage(),
                    halt.stage,
                    halt.message
                );
            } else {
                warn!(
                    "Run {} for {} failed at {}: {}",
                    run.id,
                    self.stage(),
                    halt.stage,
                    halt.message
                );
            }
            run.fail(halt.stage, halt.message, halt.fatal);
            self.runs.save(&run).await?;
            return Ok(run);
        }

        info!("Run {} for {} succeeded", run.id, self.stage());
        Ok(run)
    }

    /// Executes the stages in order; the inner error is the stage that halted
    async fn run_stages(
        &self,
        run: &mut PipelineRun,
        channels: &mut RunChannels,
    ) -> Result<Result<(), Halt>, RepositoryError> {
        // Source
        run.begin_stage(StageKind::Source);
        self.runs.save(run).await?;

        let workspace = self.workspace.join(self.stage());
        let bundle = match self.source.fetch(&run.revision, &workspace).await {
            Ok(bundle) => bundle,
            Err(e) => return Ok(Err(Halt::at(StageKind::Source, e))),
        };
        if let Err(halt) = publish(run, &mut channels.source, bundle) {
            return Ok(Err(halt));
        }
        run.finish_stage(StageKind::Source, StageStatus::Succeeded, None);

        // Build
        if let Err(e) = run.advance(RunStatus::Building) {
            return Ok(Err(Halt::at(StageKind::Build, e)));
        }
        run.begin_stage(StageKind::Build);
        self.runs.save(run).await?;

        let bundle = match channels.source.consume(StageKind::Build) {
            Ok(bundle) => bundle,
            Err(e) => return Ok(Err(Halt::at(StageKind::Build, e))),
        };
        let image = match self.build.build(&bundle, &self.env).await {
            Ok(image) => image,
            Err(e) => return Ok(Err(Halt::at(StageKind::Build, e))),
        };
        if let Err(halt) = publish(run, &mut channels.build, image) {
            return Ok(Err(halt));
        }
        run.finish_stage(StageKind::Build, StageStatus::Succeeded, None);

        // Deploy
        if !run.deploy_enabled {
            info!(
                "Deploy stage of {} disabled until bootstrap completes",
                self.stage()
            );
            run.finish_stage(
                StageKind::Deploy,
                StageStatus::Skipped,
                Some("deploy disabled until bootstrap completes".to_string()),
            );
            if let Err(e) = run.advance(RunStatus::Succeeded) {
                return Ok(Err(Halt::at(StageKind::Deploy, e)));
            }
            self.runs.save(run).await?;
            return Ok(Ok(()));
        }

        if let Err(e) = run.advance(RunStatus::Deploying) {
            return Ok(Err(Halt::at(StageKind::Deploy, e)));
        }
        run.begin_stage(StageKind::Deploy);
        self.runs.save(run).await?;

        let artifact = match channels.build.consume(StageKind::Deploy) {
            Ok(artifact) => artifact,
            Err(e) => return Ok(Err(Halt::at(StageKind::Deploy, e))),
        };
        let Some(image) = artifact.image().cloned() else {
            return Ok(Err(Halt::at(
                StageKind::Deploy,
                format!("artifact '{}' carries no image", artifact.name),
            )));
        };

        match self.controller.deploy(image).await {
            Ok(report) => {
                run.finish_stage(
                    StageKind::Deploy,
                    StageStatus::Succeeded,
                    Some(format!(
                        "{} promoted after {} step(s)",
                        report.promoted, report.steps
                    )),
                );
            }
            Err(e) => {
                return Ok(Err(Halt {
                    stage: StageKind::Deploy,
                    message: e.to_string(),
                    fatal: e.is_fatal(),
                }));
            }
        }

        if let Err(e) = run.advance(RunStatus::Succeeded) {
            return Ok(Err(Halt::at(StageKind::Deploy, e)));
        }
        self.runs.save(run).await?;
        Ok(Ok(()))
    }
}

fn publish(run: &mut PipelineRun, channel: &mut ArtifactChannel, artifact: Artifact) -> Result<(), Halt> {
    let summary = ArtifactSummary::from(&artifact);
    channel
        .publish(artifact)
        .map_err(|e| Halt::at(channel.producer(), e))?;
    run.artifacts.push(summary);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HealthCheckError;
    use crate::repository::InMemoryRunRepository;
    use crate::service::testing::test_pipeline as fixture;
    use cutover_core::domain::pool::{ListenerWeights, PoolColor};
    use std::time::Duration;

    async fn wait_terminal(runs: &InMemoryRunRepository, stage: &str, id: uuid::Uuid) -> PipelineRun {
        for _ in 0..600 {
            if let Some(run) = runs.find_by_id(stage, id).await.unwrap() {
                if run.status.is_terminal() {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("run {} never finished", id);
    }

    fn stage_order(run: &PipelineRun) -> Vec<StageKind> {
        run.stages.iter().map(|s| s.stage).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_executes_stages_in_order() {
        let f = fixture("dev", BootstrapPhase::Complete, Arc::default());

        let run = f.pipeline.run("rev1").await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(
            stage_order(&run),
            vec![StageKind::Source, StageKind::Build, StageKind::Deploy]
        );
        for pair in run.stages.windows(2) {
            assert!(pair[0].finished_at.unwrap() <= pair[1].started_at);
        }
        assert_eq!(run.artifacts.len(), 2);
        assert_eq!(f.pipeline.controller().status().active, PoolColor::Green);
        assert_eq!(
            f.router.prod_history().last().copied(),
            Some(ListenerWeights::all_to(PoolColor::Green))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_failure_halts_before_deploy() {
        let f = fixture("dev", BootstrapPhase::Complete, Arc::default());
        f.build.failing(true);

        let run = f.pipeline.run("rev1").await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.as_ref().unwrap();
        assert_eq!(failure.stage, StageKind::Build);
        assert!(!failure.fatal);
        assert!(run.stage(StageKind::Deploy).is_none());
        assert!(f.router.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_failure_halts_before_build() {
        let f = fixture("dev", BootstrapPhase::Complete, Arc::default());
        f.source.missing.lock().unwrap().push("gone".to_string());

        let run = f.pipeline.run("gone").await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure.unwrap().stage, StageKind::Source);
        assert_eq!(f.build.builds(), 0);
        assert!(run.artifacts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolled_back_deploy_fails_run_without_fatal_flag() {
        let f = fixture("dev", BootstrapPhase::Complete, Arc::default());
        f.health.fail_on(2, HealthCheckError::Unhealthy(503));

        let run = f.pipeline.run("rev1").await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, StageKind::Deploy);
        assert!(!failure.fatal);
        assert_eq!(f.pipeline.controller().status().active, PoolColor::Blue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rollback_is_fatal() {
        let f = fixture("dev", BootstrapPhase::Complete, Arc::default());
        f.health.fail_on(3, HealthCheckError::Unhealthy(503));
        f.router.fail_prod_updates_after(Some(1));

        let run = f.pipeline.run("rev1").await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.failure.unwrap().fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_phase_skips_deploy() {
        let f = fixture("dev", BootstrapPhase::Initial, Arc::default());

        let run = f.pipeline.run("rev1").await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(!run.deploy_enabled);
        assert_eq!(
            run.stage(StageKind::Deploy).unwrap().status,
            StageStatus::Skipped
        );
        assert!(f.router.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_phase_bootstrap() {
        let f = fixture("dev", BootstrapPhase::Initial, Arc::default());

        assert!(matches!(
            f.pipeline.complete_bootstrap(None).await,
            Err(BootstrapError::NoImageYet(_))
        ));

        f.pipeline.run("rev1").await.unwrap();
        f.source.set_head("rev2");

        let closing = f.pipeline.complete_bootstrap(None).await.unwrap();
        assert_eq!(closing.revision, "rev1");
        assert!(closing.deploy_enabled);
        assert_eq!(f.pipeline.bootstrap_phase(), BootstrapPhase::Complete);

        let closing = wait_terminal(&f.runs, "dev", closing.id).await;
        assert_eq!(closing.status, RunStatus::Succeeded);
        assert_eq!(
            closing.stage(StageKind::Deploy).unwrap().status,
            StageStatus::Succeeded
        );

        assert!(matches!(
            f.pipeline.complete_bootstrap(Some("rev2".to_string())).await,
            Err(BootstrapError::AlreadyComplete(_))
        ));

        // Steady state: every run deploys
        let next = f.pipeline.run("rev2").await.unwrap();
        assert!(next.deploy_enabled);
        assert_eq!(next.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unsafe_revision_is_never_recorded() {
        let f = fixture("dev", BootstrapPhase::Complete, Arc::default());

        for revision in ["../../victim", "--upload-pack=touch", "a/b"] {
            assert!(matches!(
                f.pipeline.run(revision).await,
                Err(RunError::InvalidRevision(_))
            ));
        }
        assert!(f.runs.list_by_environment("dev").await.unwrap().is_empty());
        assert_eq!(f.build.builds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_rejects_unsafe_revision_without_arming() {
        let f = fixture("dev", BootstrapPhase::Initial, Arc::default());
        f.pipeline.run("rev1").await.unwrap();

        assert!(matches!(
            f.pipeline.complete_bootstrap(Some("../rev1".to_string())).await,
            Err(BootstrapError::InvalidRevision(_))
        ));
        assert_eq!(f.pipeline.bootstrap_phase(), BootstrapPhase::Initial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_for_one_environment_are_serialized() {
        let f = fixture("dev", BootstrapPhase::Complete, Arc::default());

        let (a, b) = tokio::join!(f.pipeline.run("rev1"), f.pipeline.run("rev2"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.status, RunStatus::Succeeded);
        assert_eq!(b.status, RunStatus::Succeeded);

        let (first, second) = if a.started_at <= b.started_at { (a, b) } else { (b, a) };
        assert!(first.completed_at.unwrap() <= second.started_at.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_environments_keep_separate_histories() {
        let runs: Arc<InMemoryRunRepository> = Arc::default();
        let dev = fixture("dev", BootstrapPhase::Complete, runs.clone());
        let prod = fixture("prod", BootstrapPhase::Initial, runs.clone());

        let dev_run = dev.pipeline.run("rev1").await.unwrap();
        let prod_run = prod.pipeline.run("rev1").await.unwrap();

        assert_eq!(runs.list_by_environment("dev").await.unwrap().len(), 1);
        assert_eq!(runs.list_by_environment("prod").await.unwrap().len(), 1);
        assert!(runs.find_by_id("dev", prod_run.id).await.unwrap().is_none());

        let dev_ids: Vec<_> = dev_run.artifacts.iter().map(|a| a.id).collect();
        assert!(prod_run.artifacts.iter().all(|a| !dev_ids.contains(&a.id)));
        assert_eq!(prod.pipeline.controller().status().active, PoolColor::Blue);
    }
}
