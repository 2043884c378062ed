//! Listener traffic routing
//!
//! The load balancer is external. The controller only needs to set the prod
//! listener's weights across the two pools and point the test listener at
//! one pool.

use async_trait::async_trait;
use cutover_core::domain::pool::{ListenerWeights, PoolColor};
use reqwest::Client;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::TrafficError;

/// Load balancer collaborator
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    async fn set_prod_weights(&self, weights: ListenerWeights) -> Result<(), TrafficError>;

    async fn route_test_listener(&self, pool: PoolColor) -> Result<(), TrafficError>;
}

/// Router change recorded by `InMemoryRouter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteChange {
    Prod(ListenerWeights),
    Test(PoolColor),
}

/// Router that keeps weights in memory, for dry runs and tests
pub struct InMemoryRouter {
    weights: Mutex<ListenerWeights>,
    history: Mutex<Vec<RouteChange>>,
    fail_after: Mutex<Option<usize>>,
}

impl InMemoryRouter {
    pub fn new(active: PoolColor) -> Self {
        Self {
            weights: Mutex::new(ListenerWeights::all_to(active)),
            history: Mutex::new(Vec::new()),
            fail_after: Mutex::new(None),
        }
    }

    pub fn weights(&self) -> ListenerWeights {
        *self.weights.lock().unwrap()
    }

    pub fn history(&self) -> Vec<RouteChange> {
        self.history.lock().unwrap().clone()
    }

    /// Prod weight updates recorded so far
    pub fn prod_history(&self) -> Vec<ListenerWeights> {
        self.history()
            .into_iter()
            .filter_map(|c| match c {
                RouteChange::Prod(w) => Some(w),
                RouteChange::Test(_) => None,
            })
            .collect()
    }

    /// Rejects every prod weight update after the first `n`
    pub fn fail_prod_updates_after(&self, n: Option<usize>) {
        *self.fail_after.lock().unwrap() = n;
    }
}

#[async_trait]
impl TrafficRouter for InMemoryRouter {
    async fn set_prod_weights(&self, weights: ListenerWeights) -> Result<(), TrafficError> {
        let applied = self.prod_history().len();
        if let Some(limit) = *self.fail_after.lock().unwrap() {
            if applied >= limit {
                return Err(TrafficError::Rejected {
                    status: 503,
                    message: "router unavailable".to_string(),
                });
            }
        }

        debug!("prod listener weights: blue={} green={}", weights.blue, weights.green);
        *self.weights.lock().unwrap() = weights;
        self.history.lock().unwrap().push(RouteChange::Prod(weights));
        Ok(())
    }

    async fn route_test_listener(&self, pool: PoolColor) -> Result<(), TrafficError> {
        debug!("test listener -> {}", pool);
        self.history.lock().unwrap().push(RouteChange::Test(pool));
        Ok(())
    }
}

#[derive(Serialize)]
struct TestRoute {
    pool: PoolColor,
}

/// Router driving a load balancer admin endpoint over HTTP
///
/// Sends `PUT {base}/listeners/prod/weights` with `{"blue":..,"green":..}` and
/// `PUT {base}/listeners/test/target` with `{"pool":"green"}`.
pub struct HttpRouter {
    base_url: String,
    client: Client,
}

impl HttpRouter {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TrafficError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn put<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), TrafficError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.put(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TrafficError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TrafficRouter for HttpRouter {
    async fn set_prod_weights(&self, weights: ListenerWeights) -> Result<(), TrafficError> {
        info!(
            "Setting prod listener weights blue={} green={}",
            weights.blue, weights.green
        );
        self.put("/listeners/prod/weights", &weights).await
    }

    async fn route_test_listener(&self, pool: PoolColor) -> Result<(), TrafficError> {
        info!("Routing test listener to {} pool", pool);
        self.put("/listeners/test/target", &TestRoute { pool }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_router_records_changes() {
        let router = InMemoryRouter::new(PoolColor::Blue);
        assert_eq!(router.weights(), ListenerWeights { blue: 100, green: 0 });

        router.route_test_listener(PoolColor::Green).await.unwrap();
        router
            .set_prod_weights(ListenerWeights::split(PoolColor::Green, 30))
            .await
            .unwrap();

        assert_eq!(router.weights(), ListenerWeights { blue: 70, green: 30 });
        assert_eq!(router.history().len(), 2);
        assert_eq!(router.prod_history().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_router_failure_injection() {
        let router = InMemoryRouter::new(PoolColor::Blue);
        router.fail_prod_updates_after(Some(1));

        assert!(router.set_prod_weights(ListenerWeights::split(PoolColor::Green, 10)).await.is_ok());
        assert!(router.set_prod_weights(ListenerWeights::split(PoolColor::Green, 20)).await.is_err());
        assert_eq!(router.weights(), ListenerWeights { blue: 90, green: 10 });
    }

    #[test]
    fn test_http_router_trims_base_url() {
        let router = HttpRouter::new("http://lb.local:9000/").unwrap();
        assert_eq!(router.base_url, "http://lb.local:9000");
    }
}
