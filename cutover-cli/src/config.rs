//! Configuration module
//!
//! Settings shared by every command.

use cutover_client::OrchestratorClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator control plane
    pub orchestrator_url: String,
}

impl Config {
    /// Client bound to the configured orchestrator
    pub fn client(&self) -> OrchestratorClient {
        OrchestratorClient::new(&self.orchestrator_url)
    }
}
