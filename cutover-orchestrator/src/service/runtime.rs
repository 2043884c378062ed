//! Service runtime
//!
//! The running container service behind the two target pools. Each pool runs
//! a fixed number of tasks; capacity policy belongs to external
//! infrastructure. Task placement goes through a `TaskLauncher` so the
//! runtime can drive podman or an in-memory fleet.

use async_trait::async_trait;
use cutover_core::domain::artifact::ImageRef;
use cutover_core::domain::pool::PoolColor;
use cutover_core::dto::deployment::ServiceCapacity;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::RuntimeError;

/// Places and removes tasks for one pool
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    /// Replaces the tasks of `pool` with `count` tasks running `image`
    async fn launch(
        &self,
        service: &str,
        pool: PoolColor,
        image: &ImageRef,
        count: usize,
    ) -> Result<(), RuntimeError>;

    /// Removes every task of `pool`
    async fn stop(&self, service: &str, pool: PoolColor) -> Result<(), RuntimeError>;
}

/// Tasks currently placed for one pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolTasks {
    pub image: Option<ImageRef>,
    pub running: usize,
}

#[derive(Debug)]
struct RuntimeState {
    desired_count: usize,
    active: PoolColor,
    blue: PoolTasks,
    green: PoolTasks,
}

impl RuntimeState {
    fn pool_mut(&mut self, color: PoolColor) -> &mut PoolTasks {
        match color {
            PoolColor::Blue => &mut self.blue,
            PoolColor::Green => &mut self.green,
        }
    }

    fn pool(&self, color: PoolColor) -> &PoolTasks {
        match color {
            PoolColor::Blue => &self.blue,
            PoolColor::Green => &self.green,
        }
    }
}

/// Container service fronted by the blue and green pools
pub struct ServiceRuntime {
    service: String,
    launcher: Arc<dyn TaskLauncher>,
    state: tokio::sync::Mutex<RuntimeState>,
}

impl ServiceRuntime {
    /// Creates a runtime whose pools start empty, blue active
    pub fn new(service: impl Into<String>, desired_count: usize, launcher: Arc<dyn TaskLauncher>) -> Self {
        Self {
            service: service.into(),
            launcher,
            state: tokio::sync::Mutex::new(RuntimeState {
                desired_count,
                active: PoolColor::Blue,
                blue: PoolTasks::default(),
                green: PoolTasks::default(),
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Image served by the active pool, if it runs one
    pub async fn current_active_image(&self) -> Option<ImageRef> {
        let state = self.state.lock().await;
        state.pool(state.active).image.clone()
    }

    pub async fn pool(&self, color: PoolColor) -> PoolTasks {
        self.state.lock().await.pool(color).clone()
    }

    pub async fn desired_count(&self) -> usize {
        self.state.lock().await.desired_count
    }

    pub async fn capacity(&self) -> ServiceCapacity {
        let state = self.state.lock().await;
        ServiceCapacity {
            service: self.service.clone(),
            desired_count: state.desired_count,
            blue_running: state.blue.running,
            green_running: state.green.running,
        }
    }

    /// Sets the per-pool task count and resizes every pool that runs an image
    ///
    /// The new count is kept even when a pool fails to resize; that pool keeps
    /// its previous task count and the next `apply_image` brings it in line.
    pub async fn scale_to(&self, desired_count: usize) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        if state.desired_count == desired_count {
            return Ok(());
        }

        info!(
            "Scaling {} from {} to {} task(s) per pool",
            self.service, state.desired_count, desired_count
        );
        state.desired_count = desired_count;

        let mut first_error = None;
        for color in [PoolColor::Blue, PoolColor::Green] {
            let Some(image) = state.pool(color).image.clone() else {
                continue;
            };
            let resized = if desired_count == 0 {
                self.launcher.stop(&self.service, color).await
            } else {
                self.launcher
                    .launch(&self.service, color, &image, desired_count)
                    .await
            };
            match resized {
                Ok(()) => state.pool_mut(color).running = desired_count,
                Err(e) => {
                    warn!("Failed to resize {} pool of {}: {}", color, self.service, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Restarts the tasks of `pool` on `image`
    ///
    /// Returns `false` without touching the pool when it already runs the
    /// image at the desired count.
    pub async fn apply_image(&self, pool: PoolColor, image: &ImageRef) -> Result<bool, RuntimeError> {
        let mut state = self.state.lock().await;
        let desired = state.desired_count;
        let current = state.pool(pool);

        if current.image.as_ref() == Some(image) && current.running == desired {
            debug!("{} pool of {} already runs {}", pool, self.service, image);
            return Ok(false);
        }

        info!("Updating {} pool of {} to {}", pool, self.service, image);
        self.launcher
            .launch(&self.service, pool, image, desired)
            .await?;

        let tasks = state.pool_mut(pool);
        tasks.image = Some(image.clone());
        tasks.running = desired;
        Ok(true)
    }

    /// Adopts a promotion recorded before a restart
    ///
    /// The active pool is assumed to still run `image` at the desired count.
    pub async fn restore(&self, active: PoolColor, image: &ImageRef) {
        let mut state = self.state.lock().await;
        info!(
            "Restoring {}: {} pool active running {}",
            self.service, active, image
        );
        let desired = state.desired_count;
        state.active = active;
        let tasks = state.pool_mut(active);
        tasks.image = Some(image.clone());
        tasks.running = desired;
    }

    pub async fn active(&self) -> PoolColor {
        self.state.lock().await.active
    }

    /// Records which pool serves production traffic
    pub async fn set_active(&self, color: PoolColor) {
        let mut state = self.state.lock().await;
        if state.active != color {
            info!("{} pool is now active for {}", color, self.service);
            state.active = color;
        }
    }
}

/// Launch call recorded by `InMemoryLauncher`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub pool: PoolColor,
    pub image: Option<ImageRef>,
    pub count: usize,
}

/// Task launcher that only records calls, for dry runs and tests
#[derive(Default)]
pub struct InMemoryLauncher {
    records: Mutex<Vec<LaunchRecord>>,
    failing: Mutex<Option<PoolColor>>,
}

impl InMemoryLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent launches for `pool` fail
    pub fn fail_pool(&self, pool: Option<PoolColor>) {
        *self.failing.lock().unwrap() = pool;
    }

    pub fn records(&self) -> Vec<LaunchRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskLauncher for InMemoryLauncher {
    async fn launch(
        &self,
        service: &str,
        pool: PoolColor,
        image: &ImageRef,
        count: usize,
    ) -> Result<(), RuntimeError> {
        if *self.failing.lock().unwrap() == Some(pool) {
            return Err(RuntimeError::LaunchFailed {
                pool,
                message: format!("simulated launch failure for {}", service),
            });
        }

        self.records.lock().unwrap().push(LaunchRecord {
            pool,
            image: Some(image.clone()),
            count,
        });
        Ok(())
    }

    async fn stop(&self, _service: &str, pool: PoolColor) -> Result<(), RuntimeError> {
        self.records.lock().unwrap().push(LaunchRecord {
            pool,
            image: None,
            count: 0,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(digest: &str) -> ImageRef {
        ImageRef::new("repo", "latest").with_digest(digest)
    }

    #[tokio::test]
    async fn test_apply_image_is_idempotent() {
        let launcher = Arc::new(InMemoryLauncher::new());
        let runtime = ServiceRuntime::new("svc", 3, launcher.clone());

        assert!(runtime.apply_image(PoolColor::Green, &image("sha256:1")).await.unwrap());
        assert!(!runtime.apply_image(PoolColor::Green, &image("sha256:1")).await.unwrap());
        assert_eq!(launcher.records().len(), 1);

        assert!(runtime.apply_image(PoolColor::Green, &image("sha256:2")).await.unwrap());
        assert_eq!(launcher.records().len(), 2);
    }

    #[tokio::test]
    async fn test_current_active_image_follows_active_pool() {
        let runtime = ServiceRuntime::new("svc", 3, Arc::new(InMemoryLauncher::new()));
        assert_eq!(runtime.current_active_image().await, None);

        runtime.apply_image(PoolColor::Green, &image("sha256:1")).await.unwrap();
        assert_eq!(runtime.current_active_image().await, None);

        runtime.set_active(PoolColor::Green).await;
        assert_eq!(runtime.current_active_image().await, Some(image("sha256:1")));
    }

    #[tokio::test]
    async fn test_scale_to_resizes_running_pools_only() {
        let launcher = Arc::new(InMemoryLauncher::new());
        let runtime = ServiceRuntime::new("svc", 3, launcher.clone());
        runtime.apply_image(PoolColor::Blue, &image("sha256:1")).await.unwrap();

        runtime.scale_to(5).await.unwrap();
        let records = launcher.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].pool, PoolColor::Blue);
        assert_eq!(records[1].count, 5);
        assert_eq!(runtime.pool(PoolColor::Green).await.running, 0);

        // Reapplying after the resize is still a no-op
        assert!(!runtime.apply_image(PoolColor::Blue, &image("sha256:1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_partial_scale_failure_keeps_pools_consistent() {
        let launcher = Arc::new(InMemoryLauncher::new());
        let runtime = ServiceRuntime::new("svc", 3, launcher.clone());
        runtime.apply_image(PoolColor::Blue, &image("sha256:1")).await.unwrap();
        runtime.apply_image(PoolColor::Green, &image("sha256:2")).await.unwrap();

        launcher.fail_pool(Some(PoolColor::Green));
        assert!(runtime.scale_to(5).await.is_err());

        let capacity = runtime.capacity().await;
        assert_eq!(capacity.desired_count, 5);
        assert_eq!(capacity.blue_running, 5);
        assert_eq!(capacity.green_running, 3);

        // Blue already matches; only green is relaunched
        launcher.fail_pool(None);
        let launches = launcher.records().len();
        assert!(!runtime.apply_image(PoolColor::Blue, &image("sha256:1")).await.unwrap());
        assert!(runtime.apply_image(PoolColor::Green, &image("sha256:2")).await.unwrap());
        assert_eq!(launcher.records().len(), launches + 1);
        assert_eq!(runtime.pool(PoolColor::Green).await.running, 5);
    }

    #[tokio::test]
    async fn test_restore_adopts_recorded_active_pool() {
        let launcher = Arc::new(InMemoryLauncher::new());
        let runtime = ServiceRuntime::new("svc", 3, launcher.clone());

        runtime.restore(PoolColor::Green, &image("sha256:1")).await;

        assert_eq!(runtime.active().await, PoolColor::Green);
        assert_eq!(runtime.current_active_image().await, Some(image("sha256:1")));
        assert!(!runtime.apply_image(PoolColor::Green, &image("sha256:1")).await.unwrap());
        assert!(launcher.records().is_empty());
    }

    #[tokio::test]
    async fn test_failed_launch_leaves_pool_unchanged() {
        let launcher = Arc::new(InMemoryLauncher::new());
        launcher.fail_pool(Some(PoolColor::Green));
        let runtime = ServiceRuntime::new("svc", 3, launcher);

        assert!(runtime.apply_image(PoolColor::Green, &image("sha256:1")).await.is_err());
        assert_eq!(runtime.pool(PoolColor::Green).await, PoolTasks::default());
    }
}
