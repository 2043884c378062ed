//! Deployment domain types
//!
//! A deployment group binds a service to its two target pools, the prod and
//! test listeners, and the rollout policy that governs traffic shifting.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::artifact::ImageRef;
use crate::domain::pool::{ListenerRef, PoolColor, TargetPool};

/// Invalid rollout policy
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("shift increment must be between 1 and 100 percent (got {0})")]
    InvalidIncrement(u8),

    #[error("shift interval must be greater than 0")]
    ZeroInterval,

    #[error("health check timeout must be greater than 0")]
    ZeroHealthTimeout,

    #[error("health check timeout ({timeout}s) cannot exceed the shift interval ({interval}s)")]
    TimeoutExceedsInterval { timeout: u64, interval: u64 },
}

/// Phased traffic-shift policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutPolicy {
    /// Percentage of production traffic moved per step
    pub shift_increment_percent: u8,
    /// Time between steps
    pub shift_interval_secs: u64,
    /// Observation window after reaching 100%
    pub bake_time_secs: u64,
    /// Bound on a single health check
    pub health_check_timeout_secs: u64,
    /// Bound on waiting for the freshly updated standby pool to become healthy
    pub ready_timeout_secs: u64,
}

impl RolloutPolicy {
    /// Linear shift of 10% every minute with no bake time
    pub fn linear_10_percent_every_1_minute() -> Self {
        Self {
            shift_increment_percent: 10,
            shift_interval_secs: 60,
            bake_time_secs: 0,
            health_check_timeout_secs: 5,
            ready_timeout_secs: 300,
        }
    }

    pub fn with_bake_time(mut self, secs: u64) -> Self {
        self.bake_time_secs = secs;
        self
    }

    pub fn shift_interval(&self) -> Duration {
        Duration::from_secs(self.shift_interval_secs)
    }

    pub fn bake_time(&self) -> Duration {
        Duration::from_secs(self.bake_time_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Number of shift steps needed to reach 100%
    pub fn step_count(&self) -> usize {
        let inc = self.shift_increment_percent.max(1) as usize;
        100_usize.div_ceil(inc)
    }

    /// Standby weight after `step` steps, capped at 100
    pub fn weight_after(&self, step: usize) -> u8 {
        (step * self.shift_increment_percent as usize).min(100) as u8
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.shift_increment_percent == 0 || self.shift_increment_percent > 100 {
            return Err(PolicyError::InvalidIncrement(self.shift_increment_percent));
        }
        if self.shift_interval_secs == 0 {
            return Err(PolicyError::ZeroInterval);
        }
        if self.health_check_timeout_secs == 0 {
            return Err(PolicyError::ZeroHealthTimeout);
        }
        if self.health_check_timeout_secs > self.shift_interval_secs {
            return Err(PolicyError::TimeoutExceedsInterval {
                timeout: self.health_check_timeout_secs,
                interval: self.shift_interval_secs,
            });
        }
        Ok(())
    }
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self::linear_10_percent_every_1_minute()
    }
}

/// Binding of a service to its two pools plus a rollout policy
///
/// Exactly one pool is active outside an in-flight cutover. The pools are
/// never recreated; promotion only swaps roles and listener bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentGroup {
    pub name: String,
    pub policy: RolloutPolicy,
    pub prod_listener: ListenerRef,
    pub test_listener: ListenerRef,
    blue: TargetPool,
    green: TargetPool,
    active: PoolColor,
}

impl DeploymentGroup {
    /// Creates a group with blue active behind the prod listener and green
    /// standby behind the test listener
    pub fn new(
        name: impl Into<String>,
        service: impl Into<String>,
        policy: RolloutPolicy,
        prod_listener: ListenerRef,
        test_listener: ListenerRef,
        health_check_path: impl Into<String>,
    ) -> Self {
        let service = service.into();
        let health_check_path = health_check_path.into();

        Self {
            name: name.into(),
            policy,
            blue: TargetPool {
                color: PoolColor::Blue,
                listener_port: prod_listener.port,
                health_check_path: health_check_path.clone(),
                service: service.clone(),
            },
            green: TargetPool {
                color: PoolColor::Green,
                listener_port: test_listener.port,
                health_check_path,
                service,
            },
            prod_listener,
            test_listener,
            active: PoolColor::Blue,
        }
    }

    /// Same group with `color` active, as recorded by an earlier promotion
    pub fn with_active(mut self, color: PoolColor) -> Self {
        if self.active != color {
            self.promote_standby();
        }
        self
    }

    pub fn active(&self) -> PoolColor {
        self.active
    }

    pub fn standby(&self) -> PoolColor {
        self.active.other()
    }

    pub fn pool(&self, color: PoolColor) -> &TargetPool {
        match color {
            PoolColor::Blue => &self.blue,
            PoolColor::Green => &self.green,
        }
    }

    /// URL polled to check the standby pool through the test listener
    pub fn standby_health_url(&self) -> String {
        self.test_listener
            .url(&self.pool(self.standby()).health_check_path)
    }

    /// Swaps active and standby roles along with their listener bindings
    pub fn promote_standby(&mut self) {
        std::mem::swap(&mut self.blue.listener_port, &mut self.green.listener_port);
        self.active = self.active.other();
    }
}

/// Rollout state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutState {
    Idle,
    ShiftingTraffic,
    Verifying,
    Completed,
    RollingBack,
    RolledBack,
}

impl RolloutState {
    /// Whether a rollout is currently in flight
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            RolloutState::ShiftingTraffic | RolloutState::Verifying | RolloutState::RollingBack
        )
    }
}

impl std::fmt::Display for RolloutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RolloutState::Idle => "Idle",
            RolloutState::ShiftingTraffic => "ShiftingTraffic",
            RolloutState::Verifying => "Verifying",
            RolloutState::Completed => "Completed",
            RolloutState::RollingBack => "RollingBack",
            RolloutState::RolledBack => "RolledBack",
        };
        f.write_str(s)
    }
}

/// Why a rollout was rolled back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("health check timed out")]
    HealthCheckTimeout,

    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("cancelled by operator")]
    OperatorCancelled,

    #[error("standby pool could not be updated: {0}")]
    StandbyLaunchFailed(String),

    #[error("traffic shift failed: {0}")]
    TrafficShiftFailed(String),
}

/// Point-in-time view of a deployment controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStatus {
    pub group: String,
    pub state: RolloutState,
    pub active: PoolColor,
    /// Production traffic share of the standby pool, in percent
    pub standby_weight: u8,
    pub active_image: Option<ImageRef>,
    pub in_flight_image: Option<ImageRef>,
    pub queued: usize,
    pub last_failure: Option<FailureReason>,
    /// Set when a rollback could not restore the original weighting
    pub fault: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl RolloutStatus {
    pub fn idle(group: &DeploymentGroup) -> Self {
        Self {
            group: group.name.clone(),
            state: RolloutState::Idle,
            active: group.active(),
            standby_weight: 0,
            active_image: None,
            in_flight_image: None,
            queued: 0,
            last_failure: None,
            fault: None,
            updated_at: chrono::Utc::now(),
        }
    }
}

/// Summary of a completed rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutReport {
    pub image: ImageRef,
    pub previous_active: PoolColor,
    pub promoted: PoolColor,
    pub steps: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pool::ListenerRole;

    fn group() -> DeploymentGroup {
        DeploymentGroup::new(
            "svc-group",
            "svc",
            RolloutPolicy::default(),
            ListenerRef::new(ListenerRole::Prod, "alb", 80),
            ListenerRef::new(ListenerRole::Test, "alb", 8080),
            "/",
        )
    }

    #[test]
    fn test_step_schedule() {
        let policy = RolloutPolicy::default();
        assert_eq!(policy.step_count(), 10);
        assert_eq!(policy.weight_after(6), 60);
        assert_eq!(policy.weight_after(10), 100);

        let uneven = RolloutPolicy {
            shift_increment_percent: 30,
            ..RolloutPolicy::default()
        };
        assert_eq!(uneven.step_count(), 4);
        assert_eq!(uneven.weight_after(4), 100);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RolloutPolicy::default().validate().is_ok());

        let mut policy = RolloutPolicy::default();
        policy.shift_increment_percent = 0;
        assert_eq!(policy.validate(), Err(PolicyError::InvalidIncrement(0)));

        let mut policy = RolloutPolicy::default();
        policy.shift_interval_secs = 0;
        assert_eq!(policy.validate(), Err(PolicyError::ZeroInterval));

        let mut policy = RolloutPolicy::default();
        policy.health_check_timeout_secs = 120;
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::TimeoutExceedsInterval { .. })
        ));
    }

    #[test]
    fn test_promote_swaps_roles_and_listeners() {
        let mut group = group();
        assert_eq!(group.active(), PoolColor::Blue);
        assert_eq!(group.pool(PoolColor::Blue).listener_port, 80);
        assert_eq!(group.standby_health_url(), "http://alb:8080/");

        group.promote_standby();
        assert_eq!(group.active(), PoolColor::Green);
        assert_eq!(group.standby(), PoolColor::Blue);
        assert_eq!(group.pool(PoolColor::Green).listener_port, 80);
        assert_eq!(group.pool(PoolColor::Blue).listener_port, 8080);
    }

    #[test]
    fn test_with_active_restores_listener_bindings() {
        let group = group().with_active(PoolColor::Green);
        assert_eq!(group.active(), PoolColor::Green);
        assert_eq!(group.pool(PoolColor::Green).listener_port, 80);
        assert_eq!(group.pool(PoolColor::Blue).listener_port, 8080);
        assert_eq!(group.standby_health_url(), "http://alb:8080/");

        assert_eq!(group.clone().with_active(PoolColor::Green), group);
    }
}
