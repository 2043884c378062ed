//! Environment DTOs

use serde::{Deserialize, Serialize};

use crate::domain::deployment::RolloutStatus;
use crate::domain::environment::BootstrapPhase;

/// Environment overview returned by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSummary {
    pub stage: String,
    pub account: String,
    pub region: String,
    pub resource_prefix: String,
    pub pipeline_name: String,
    pub bootstrap: BootstrapPhase,
    pub deployment: RolloutStatus,
}

/// Operator request closing the bootstrap cycle
///
/// When `revision` is absent the revision of the last succeeded run is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteBootstrap {
    pub revision: Option<String>,
}
