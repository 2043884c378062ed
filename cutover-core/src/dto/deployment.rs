//! Deployment DTOs

use serde::{Deserialize, Serialize};

use crate::domain::deployment::RolloutStatus;

/// Outcome of an operator action on a deployment controller
///
/// `accepted` is false when the action did not apply, e.g. a cancel with no
/// rollout in flight or a fault acknowledgement on a healthy controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentAction {
    pub accepted: bool,
    pub deployment: RolloutStatus,
}

/// Operator request resizing both pools of a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleService {
    pub desired_count: usize,
}

/// Task counts of the two pools behind a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCapacity {
    pub service: String,
    pub desired_count: usize,
    pub blue_running: usize,
    pub green_running: usize,
}
