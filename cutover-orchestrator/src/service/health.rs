//! Pool health checks
//!
//! A check is an HTTP GET against the pool's health path through a listener;
//! any 2xx response is healthy. Checks are bounded by a timeout, and a
//! timeout counts as a failed check.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::HealthCheckError;

#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, url: &str, timeout: Duration) -> Result<(), HealthCheckError>;
}

/// HTTP health checker
pub struct HttpHealthChecker {
    client: Client,
}

impl HttpHealthChecker {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpHealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check(&self, url: &str, timeout: Duration) -> Result<(), HealthCheckError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HealthCheckError::Timeout
                } else {
                    HealthCheckError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        debug!("GET {} -> {}", url, status);

        if status.is_success() {
            Ok(())
        } else {
            Err(HealthCheckError::Unhealthy(status.as_u16()))
        }
    }
}

/// Checker reporting every pool healthy, used when no tasks actually run
#[derive(Debug, Default)]
pub struct AssumeHealthy;

#[async_trait]
impl HealthChecker for AssumeHealthy {
    async fn check(&self, url: &str, _timeout: Duration) -> Result<(), HealthCheckError> {
        debug!("Assuming {} is healthy", url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_check() {
        let checker = HttpHealthChecker::new();
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let result = checker
            .check("http://127.0.0.1:9/", Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_assume_healthy_never_fails() {
        let result = AssumeHealthy
            .check("http://127.0.0.1:9/", Duration::from_secs(1))
            .await;
        assert!(result.is_ok());
    }
}
