//! Cutover HTTP Client
//!
//! A typed HTTP client for the Cutover orchestrator control plane.
//!
//! # Example
//!
//! ```no_run
//! use cutover_client::OrchestratorClient;
//!
//! #[tokio::main]
//! async fn main() -> cutover_client::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     // Start a run of revision abc123 in the dev environment
//!     let run = client.trigger_run("dev", "abc123").await?;
//!
//!     println!("Started run: {}", run.id);
//!     Ok(())
//! }
//! ```

mod deployments;
mod environments;
pub mod error;
mod runs;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Cutover orchestrator API
///
/// Methods are organized into logical groups:
/// - Environments and the bootstrap protocol
/// - Pipeline runs (trigger, list, get)
/// - Deployment controller status and operator actions
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use cutover_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the orchestrator answers its health endpoint
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// URL of an environment-scoped endpoint
    fn environment_url(&self, stage: &str, path: &str) -> String {
        format!("{}/environments/{}{}", self.base_url, stage, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response whose body is ignored
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OrchestratorClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_environment_url() {
        let client = OrchestratorClient::new("http://localhost:8080");
        assert_eq!(
            client.environment_url("prod", "/runs"),
            "http://localhost:8080/environments/prod/runs"
        );
        assert_eq!(
            client.environment_url("prod", ""),
            "http://localhost:8080/environments/prod"
        );
    }

    #[tokio::test]
    async fn test_unreachable_orchestrator() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let client = OrchestratorClient::new("http://127.0.0.1:9");
        let result = client.health().await;
        assert!(matches!(result, Err(ClientError::RequestFailed(_))));
    }
}
