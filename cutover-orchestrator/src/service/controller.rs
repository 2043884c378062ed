//! Deployment controller
//!
//! Blue/green rollout state machine for one deployment group:
//!
//! ```text
//! Idle -> ShiftingTraffic -> Verifying -> Completed
//!               |                |
//!               +-> RollingBack <+--> RolledBack
//! ```
//!
//! The controller runs as a single task that owns the group. It reacts to
//! commands (new image, operator cancel, fault acknowledgement) and to its
//! own shift timer. Images that arrive during a rollout are queued and applied
//! in order once the current rollout reaches a terminal state; rollouts never
//! overlap. Any failed or timed-out health check, and any operator cancel,
//! reverts production traffic to the original active pool in one step.
//!
//! Every promotion is recorded, so a restarted controller resumes with the
//! pool that actually serves production and pins traffic to it.

use cutover_core::domain::artifact::ImageRef;
use cutover_core::domain::deployment::{
    DeploymentGroup, FailureReason, RolloutPolicy, RolloutReport, RolloutState, RolloutStatus,
};
use cutover_core::domain::pool::{ListenerWeights, PoolColor};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{DeploymentError, HealthCheckError, RepositoryError};
use crate::repository::GroupRepository;
use crate::service::health::HealthChecker;
use crate::service::runtime::ServiceRuntime;
use crate::service::traffic::TrafficRouter;

/// Command channel capacity
const COMMAND_BUFFER: usize = 64;

type RolloutResult = Result<RolloutReport, DeploymentError>;

enum Command {
    Deploy {
        image: ImageRef,
        respond: oneshot::Sender<RolloutResult>,
    },
    Cancel {
        respond: oneshot::Sender<bool>,
    },
    ClearFault {
        respond: oneshot::Sender<bool>,
    },
}

struct PendingRollout {
    image: ImageRef,
    respond: oneshot::Sender<RolloutResult>,
}

/// Why an in-flight rollout stopped before completion
struct Interrupted {
    reason: FailureReason,
    reached_weight: u8,
}

/// Cloneable handle to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
    status: watch::Receiver<RolloutStatus>,
    runtime: Arc<ServiceRuntime>,
}

impl ControllerHandle {
    /// Submits an image and waits for its rollout to finish
    pub async fn deploy(&self, image: ImageRef) -> RolloutResult {
        let pending = self.submit(image).await?;
        pending.await.map_err(|_| DeploymentError::ControllerStopped)?
    }

    /// Submits an image without waiting; the receiver resolves once the
    /// rollout (possibly queued behind another) reaches a terminal state
    pub async fn submit(
        &self,
        image: ImageRef,
    ) -> Result<oneshot::Receiver<RolloutResult>, DeploymentError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(Command::Deploy { image, respond })
            .await
            .map_err(|_| DeploymentError::ControllerStopped)?;
        Ok(rx)
    }

    /// Operator cancel; returns `false` when no rollout is in flight
    pub async fn cancel(&self) -> Result<bool, DeploymentError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(Command::Cancel { respond })
            .await
            .map_err(|_| DeploymentError::ControllerStopped)?;
        rx.await.map_err(|_| DeploymentError::ControllerStopped)
    }

    /// Acknowledges a failed rollback; returns `false` when not faulted
    pub async fn clear_fault(&self) -> Result<bool, DeploymentError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(Command::ClearFault { respond })
            .await
            .map_err(|_| DeploymentError::ControllerStopped)?;
        rx.await.map_err(|_| DeploymentError::ControllerStopped)
    }

    pub fn status(&self) -> RolloutStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RolloutStatus> {
        self.status.clone()
    }

    /// Runtime of the group's service, for capacity changes
    pub fn runtime(&self) -> &Arc<ServiceRuntime> {
        &self.runtime
    }
}

/// Rollout orchestrator for one deployment group
pub struct DeploymentController {
    group: DeploymentGroup,
    runtime: Arc<ServiceRuntime>,
    router: Arc<dyn TrafficRouter>,
    health: Arc<dyn HealthChecker>,
    groups: Arc<dyn GroupRepository>,
    queue: VecDeque<PendingRollout>,
    status: watch::Sender<RolloutStatus>,
    fault: Option<String>,
}

impl DeploymentController {
    pub fn new(
        group: DeploymentGroup,
        runtime: Arc<ServiceRuntime>,
        router: Arc<dyn TrafficRouter>,
        health: Arc<dyn HealthChecker>,
        groups: Arc<dyn GroupRepository>,
    ) -> Self {
        let (status, _) = watch::channel(RolloutStatus::idle(&group));
        Self {
            group,
            runtime,
            router,
            health,
            groups,
            queue: VecDeque::new(),
            status,
            fault: None,
        }
    }

    /// Builds a controller from the last promotion recorded for `group`
    ///
    /// The recorded pool becomes active in the group and the runtime, and
    /// production traffic is pinned to it, which also rolls back a rollout
    /// cut short by the restart. If the router refuses, the controller
    /// starts faulted.
    pub async fn resume(
        group: DeploymentGroup,
        runtime: Arc<ServiceRuntime>,
        router: Arc<dyn TrafficRouter>,
        health: Arc<dyn HealthChecker>,
        groups: Arc<dyn GroupRepository>,
    ) -> Result<Self, RepositoryError> {
        let recorded = groups.active_pool(&group.name).await?;
        let group = match &recorded {
            Some(active) => {
                runtime.restore(active.color, &active.image).await;
                group.with_active(active.color)
            }
            None => group,
        };

        let mut controller = Self::new(group, runtime, router, health, groups);
        if let Some(active) = recorded {
            info!(
                "{} resumes with {} active (promoted {})",
                controller.group.name, active.color, active.promoted_at
            );
            controller.update(|s| s.active_image = Some(active.image));
        }
        controller.pin_to_active().await;
        Ok(controller)
    }

    async fn pin_to_active(&mut self) {
        let active = self.group.active();
        if let Err(e) = self
            .router
            .set_prod_weights(ListenerWeights::all_to(active))
            .await
        {
            let message = format!(
                "could not pin production traffic to {} on {}: {}",
                active, self.group.name, e
            );
            error!("{}; operator intervention required", message);
            self.fault = Some(message.clone());
            self.update(|s| s.fault = Some(message));
            return;
        }

        if let Err(e) = self.router.route_test_listener(active.other()).await {
            warn!(
                "Failed to point test listener at standby {} on {}: {}",
                active.other(),
                self.group.name,
                e
            );
        }
    }

    /// Starts the control loop on the current runtime
    pub fn spawn(self) -> ControllerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let status = self.status.subscribe();
        let runtime = Arc::clone(&self.runtime);
        tokio::spawn(self.run(rx));
        ControllerHandle {
            tx,
            status,
            runtime,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!(
            "Deployment controller for {} started ({} active)",
            self.group.name,
            self.group.active()
        );

        loop {
            if self.fault.is_none() {
                if let Some(next) = self.queue.pop_front() {
                    self.update(|s| s.queued -= 1);
                    let result = self.execute(&next.image, &mut rx).await;
                    if next.respond.send(result).is_err() {
                        debug!("Rollout submitter for {} went away", next.image);
                    }
                    continue;
                }
            }

            let Some(command) = rx.recv().await else {
                break;
            };
            self.on_idle_command(command);
        }

        info!("Deployment controller for {} stopped", self.group.name);
    }

    fn on_idle_command(&mut self, command: Command) {
        match command {
            Command::Deploy { image, respond } => {
                if let Some(fault) = &self.fault {
                    let _ = respond.send(Err(DeploymentError::ControllerFaulted(fault.clone())));
                } else {
                    self.enqueue(image, respond);
                }
            }
            Command::Cancel { respond } => {
                let _ = respond.send(false);
            }
            Command::ClearFault { respond } => {
                let cleared = self.fault.take().is_some();
                if cleared {
                    warn!("Fault on {} cleared by operator", self.group.name);
                    self.update(|s| {
                        s.fault = None;
                        s.state = RolloutState::RolledBack;
                        s.standby_weight = 0;
                        s.in_flight_image = None;
                    });
                }
                let _ = respond.send(cleared);
            }
        }
    }

    /// Handles a command received mid-rollout; returns an interrupt for cancels
    fn on_in_flight_command(&mut self, command: Option<Command>) -> Option<FailureReason> {
        match command {
            Some(Command::Deploy { image, respond }) => {
                info!(
                    "Rollout in progress on {}; queueing {}",
                    self.group.name, image
                );
                self.enqueue(image, respond);
                None
            }
            Some(Command::Cancel { respond }) => {
                warn!("Operator cancelled rollout on {}", self.group.name);
                let _ = respond.send(true);
                Some(FailureReason::OperatorCancelled)
            }
            Some(Command::ClearFault { respond }) => {
                let _ = respond.send(false);
                None
            }
            // Every handle dropped: shut down without leaving traffic split
            None => Some(FailureReason::OperatorCancelled),
        }
    }

    fn enqueue(&mut self, image: ImageRef, respond: oneshot::Sender<RolloutResult>) {
        self.queue.push_back(PendingRollout { image, respond });
        self.update(|s| s.queued += 1);
    }

    fn update(&self, f: impl FnOnce(&mut RolloutStatus)) {
        self.status.send_modify(|s| {
            f(s);
            s.updated_at = chrono::Utc::now();
        });
    }

    /// Awaits `fut` while still serving commands; a cancel aborts the wait
    async fn interruptible<F: Future>(
        &mut self,
        fut: F,
        rx: &mut mpsc::Receiver<Command>,
    ) -> Result<F::Output, FailureReason> {
        tokio::pin!(fut);
        loop {
            let command = tokio::select! {
                out = &mut fut => return Ok(out),
                command = rx.recv() => command,
            };
            if let Some(reason) = self.on_in_flight_command(command) {
                return Err(reason);
            }
        }
    }

    async fn wait(
        &mut self,
        duration: Duration,
        rx: &mut mpsc::Receiver<Command>,
    ) -> Result<(), FailureReason> {
        self.interruptible(tokio::time::sleep(duration), rx).await
    }

    /// One bounded health check of the standby pool through the test listener
    async fn probe(&mut self, rx: &mut mpsc::Receiver<Command>) -> Result<(), FailureReason> {
        let health = Arc::clone(&self.health);
        let url = self.group.standby_health_url();
        let timeout = self.group.policy.health_check_timeout();

        let check = async move {
            match tokio::time::timeout(timeout, health.check(&url, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(HealthCheckError::Timeout),
            }
        };

        self.interruptible(check, rx).await?.map_err(|e| {
            warn!("Standby health check failed on {}: {}", self.group.name, e);
            FailureReason::from(e)
        })
    }

    async fn execute(&mut self, image: &ImageRef, rx: &mut mpsc::Receiver<Command>) -> RolloutResult {
        let started_at = chrono::Utc::now();
        let previous_active = self.group.active();
        let standby = self.group.standby();

        info!(
            "Starting rollout of {} on {}: {} -> {}",
            image, self.group.name, previous_active, standby
        );
        self.update(|s| {
            s.state = RolloutState::ShiftingTraffic;
            s.standby_weight = 0;
            s.in_flight_image = Some(image.clone());
            s.last_failure = None;
        });

        match self.drive(image, standby, rx).await {
            Ok(steps) => {
                self.promote(standby, image).await;
                info!(
                    "Rollout of {} on {} completed; {} is now active",
                    image, self.group.name, standby
                );
                Ok(RolloutReport {
                    image: image.clone(),
                    previous_active,
                    promoted: standby,
                    steps,
                    started_at,
                    completed_at: chrono::Utc::now(),
                })
            }
            Err(interrupted) => Err(self.roll_back(interrupted).await),
        }
    }

    /// Updates the standby pool, shifts traffic, then bakes. Returns the
    /// number of shift steps applied.
    async fn drive(
        &mut self,
        image: &ImageRef,
        standby: PoolColor,
        rx: &mut mpsc::Receiver<Command>,
    ) -> Result<usize, Interrupted> {
        let policy = self.group.policy.clone();
        let at = |reached_weight: u8| move |reason: FailureReason| Interrupted {
            reason,
            reached_weight,
        };

        // Standby gets the new image while the active pool keeps all prod traffic
        self.runtime
            .apply_image(standby, image)
            .await
            .map_err(|e| at(0)(FailureReason::StandbyLaunchFailed(e.to_string())))?;
        self.router
            .route_test_listener(standby)
            .await
            .map_err(|e| at(0)(FailureReason::TrafficShiftFailed(e.to_string())))?;

        self.await_ready(&policy, rx).await.map_err(at(0))?;

        let mut weight = 0u8;
        let steps = policy.step_count();
        for step in 1..=steps {
            self.wait(policy.shift_interval(), rx).await.map_err(at(weight))?;
            self.probe(rx).await.map_err(at(weight))?;

            let next = policy.weight_after(step);
            self.router
                .set_prod_weights(ListenerWeights::split(standby, next))
                .await
                .map_err(|e| at(weight)(FailureReason::TrafficShiftFailed(e.to_string())))?;
            weight = next;

            info!(
                "{}: step {}/{} -> {} at {}%",
                self.group.name, step, steps, standby, weight
            );
            self.update(|s| s.standby_weight = weight);
        }

        self.update(|s| s.state = RolloutState::Verifying);
        let bake_end = Instant::now() + policy.bake_time();
        while Instant::now() < bake_end {
            let remaining = bake_end - Instant::now();
            self.wait(remaining.min(policy.shift_interval()), rx)
                .await
                .map_err(at(weight))?;
            self.probe(rx).await.map_err(at(weight))?;
        }

        Ok(steps)
    }

    /// Polls the freshly updated standby pool until healthy or the ready timeout
    async fn await_ready(
        &mut self,
        policy: &RolloutPolicy,
        rx: &mut mpsc::Receiver<Command>,
    ) -> Result<(), FailureReason> {
        let deadline = Instant::now() + policy.ready_timeout();

        loop {
            match self.probe(rx).await {
                Ok(()) => return Ok(()),
                Err(FailureReason::OperatorCancelled) => {
                    return Err(FailureReason::OperatorCancelled);
                }
                Err(_) if Instant::now() >= deadline => {
                    return Err(FailureReason::HealthCheckTimeout);
                }
                Err(_) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.wait(policy.shift_interval().min(remaining), rx).await?;
                }
            }
        }
    }

    async fn promote(&mut self, standby: PoolColor, image: &ImageRef) {
        self.group.promote_standby();
        self.runtime.set_active(standby).await;

        // Former active pool is now standby and reachable through the test listener
        if let Err(e) = self.router.route_test_listener(standby.other()).await {
            warn!(
                "Failed to point test listener at new standby {} on {}: {}",
                standby.other(),
                self.group.name,
                e
            );
        }

        if let Err(e) = self
            .groups
            .record_promotion(&self.group.name, standby, image)
            .await
        {
            error!(
                "Failed to record promotion of {} on {}: {}; a restart would resume with {} active",
                standby,
                self.group.name,
                e,
                standby.other()
            );
        }

        let active = self.group.active();
        self.update(|s| {
            s.state = RolloutState::Completed;
            s.active = active;
            s.standby_weight = 0;
            s.active_image = Some(image.clone());
            s.in_flight_image = None;
        });
    }

    /// Restores full weight to the original active pool in a single update
    async fn roll_back(&mut self, interrupted: Interrupted) -> DeploymentError {
        let Interrupted {
            reason,
            reached_weight,
        } = interrupted;
        let active = self.group.active();

        warn!(
            "Rolling back {} at {}% shifted: {}",
            self.group.name, reached_weight, reason
        );
        self.update(|s| s.state = RolloutState::RollingBack);

        match self
            .router
            .set_prod_weights(ListenerWeights::all_to(active))
            .await
        {
            Ok(()) => {
                let failure = reason.clone();
                self.update(|s| {
                    s.state = RolloutState::RolledBack;
                    s.standby_weight = 0;
                    s.in_flight_image = None;
                    s.last_failure = Some(failure);
                });
                DeploymentError::DeploymentFailed {
                    reason,
                    reached_weight,
                }
            }
            Err(e) => {
                let message = format!(
                    "could not restore full weight to {} on {}: {}",
                    active, self.group.name, e
                );
                error!("{}; operator intervention required", message);
                self.fault = Some(message.clone());

                let fault = message.clone();
                let failure = reason.clone();
                self.update(|s| {
                    s.fault = Some(fault);
                    s.last_failure = Some(failure);
                });
                self.reject_queue(&message);

                DeploymentError::RollbackFailed { reason, message }
            }
        }
    }

    fn reject_queue(&mut self, fault: &str) {
        let rejected = self.queue.len();
        for pending in self.queue.drain(..) {
            let _ = pending
                .respond
                .send(Err(DeploymentError::ControllerFaulted(fault.to_string())));
        }
        if rejected > 0 {
            warn!(
                "Rejected {} queued rollout(s) on faulted {}",
                rejected, self.group.name
            );
            self.update(|s| s.queued = 0);
        }
    }
}
