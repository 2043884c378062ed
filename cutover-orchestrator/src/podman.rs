//! Podman integration
//!
//! Default build action and task launcher:
//! - Checking podman availability
//! - Building and pushing images (`podman build` + `podman push --digestfile`)
//! - Running a fixed number of labelled containers per pool

use anyhow::{Context, Result};
use async_trait::async_trait;
use cutover_core::domain::artifact::ImageRef;
use cutover_core::domain::pool::PoolColor;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{BuildError, RuntimeError};
use crate::service::build::{BuildAction, BuildRequest};
use crate::service::runtime::TaskLauncher;

/// Checks if podman is installed and available
pub async fn check_podman_available() -> Result<()> {
    let output = Command::new("podman")
        .arg("--version")
        .output()
        .await
        .context("Failed to execute 'podman --version'. Is podman installed?")?;

    if !output.status.success() {
        anyhow::bail!("Podman is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Podman is available: {}", version.trim());

    Ok(())
}

/// Logs captured output and returns (exit code, trimmed stderr)
fn inspect(what: &str, output: &Output) -> (i32, String) {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !stdout.trim().is_empty() {
        debug!("{} stdout: {}", what, stdout.trim());
    }
    if !stderr.trim().is_empty() {
        debug!("{} stderr: {}", what, stderr.trim());
    }

    (output.status.code().unwrap_or(-1), stderr.trim().to_string())
}

// =============================================================================
// Build
// =============================================================================

/// Builds with `podman build` and pushes with `podman push`
#[derive(Default)]
pub struct PodmanBuildAction;

impl PodmanBuildAction {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuildAction for PodmanBuildAction {
    async fn run(&self, request: &BuildRequest) -> Result<ImageRef, BuildError> {
        let target = request.image.tagged();

        let mut build = Command::new("podman");
        build
            .arg("build")
            .arg("-f")
            .arg(&request.spec_path)
            .arg("-t")
            .arg(&target);
        for (name, value) in &request.variables {
            build.arg("--build-arg").arg(format!("{}={}", name, value));
        }
        build.arg(&request.context_dir);

        info!("Building image {}", target);
        let output = build.output().await.map_err(|e| BuildError::ActionFailed {
            exit_code: -1,
            message: format!("failed to execute podman build: {}", e),
        })?;

        let (exit_code, stderr) = inspect("podman build", &output);
        if !output.status.success() {
            error!("podman build of {} exited with {}", target, exit_code);
            return Err(BuildError::ActionFailed {
                exit_code,
                message: stderr,
            });
        }

        let digest_file = std::env::temp_dir().join(format!("cutover-digest-{}", Uuid::new_v4()));
        info!("Pushing image {}", target);
        let output = Command::new("podman")
            .arg("push")
            .arg("--digestfile")
            .arg(&digest_file)
            .arg(&target)
            .output()
            .await
            .map_err(|e| BuildError::PushDenied(format!("failed to execute podman push: {}", e)))?;

        let (exit_code, stderr) = inspect("podman push", &output);
        if !output.status.success() {
            error!("podman push of {} exited with {}", target, exit_code);
            return Err(BuildError::PushDenied(stderr));
        }

        let digest = tokio::fs::read_to_string(&digest_file)
            .await
            .map_err(|e| BuildError::PushDenied(format!("pushed but digest unreadable: {}", e)))?;
        if let Err(e) = tokio::fs::remove_file(&digest_file).await {
            debug!("Could not remove {}: {}", digest_file.display(), e);
        }

        Ok(request.image.clone().with_digest(digest.trim()))
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Runs each pool as `count` detached containers labelled with service and pool
#[derive(Default)]
pub struct PodmanLauncher {
    /// Extra arguments for `podman run`, e.g. a network
    run_args: Vec<String>,
}

impl PodmanLauncher {
    pub fn new(run_args: Vec<String>) -> Self {
        Self { run_args }
    }

    fn container_name(service: &str, pool: PoolColor, index: usize) -> String {
        format!("{}-{}-{}", service, pool, index)
    }

    async fn remove_pool(&self, service: &str, pool: PoolColor) -> Result<(), RuntimeError> {
        let stop_failed = |message: String| RuntimeError::StopFailed { pool, message };

        let output = Command::new("podman")
            .args(["ps", "-a", "-q"])
            .arg("--filter")
            .arg(format!("label=cutover.service={}", service))
            .arg("--filter")
            .arg(format!("label=cutover.pool={}", pool))
            .output()
            .await
            .map_err(|e| stop_failed(e.to_string()))?;

        let (_, stderr) = inspect("podman ps", &output);
        if !output.status.success() {
            return Err(stop_failed(stderr));
        }

        let ids: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        debug!("Removing {} container(s) of {} {}", ids.len(), service, pool);
        let output = Command::new("podman")
            .args(["rm", "-f"])
            .args(&ids)
            .output()
            .await
            .map_err(|e| stop_failed(e.to_string()))?;

        let (_, stderr) = inspect("podman rm", &output);
        if !output.status.success() {
            return Err(stop_failed(stderr));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskLauncher for PodmanLauncher {
    async fn launch(
        &self,
        service: &str,
        pool: PoolColor,
        image: &ImageRef,
        count: usize,
    ) -> Result<(), RuntimeError> {
        self.remove_pool(service, pool)
            .await
            .map_err(|e| RuntimeError::LaunchFailed {
                pool,
                message: e.to_string(),
            })?;

        for index in 0..count {
            let name = Self::container_name(service, pool, index);
            info!("Starting container {} from {}", name, image);

            let output = Command::new("podman")
                .arg("run")
                .arg("-d")
                .arg("--name")
                .arg(&name)
                .arg("--label")
                .arg(format!("cutover.service={}", service))
                .arg("--label")
                .arg(format!("cutover.pool={}", pool))
                .args(&self.run_args)
                .arg(image.pull_ref())
                .output()
                .await
                .map_err(|e| RuntimeError::LaunchFailed {
                    pool,
                    message: format!("failed to execute podman run: {}", e),
                })?;

            let (exit_code, stderr) = inspect("podman run", &output);
            if !output.status.success() {
                error!("Container {} failed to start (exit {})", name, exit_code);
                return Err(RuntimeError::LaunchFailed {
                    pool,
                    message: stderr,
                });
            }
        }

        Ok(())
    }

    async fn stop(&self, service: &str, pool: PoolColor) -> Result<(), RuntimeError> {
        info!("Stopping {} pool of {}", pool, service);
        self.remove_pool(service, pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_names_are_per_pool() {
        assert_eq!(
            PodmanLauncher::container_name("svc", PoolColor::Green, 2),
            "svc-green-2"
        );
        assert_ne!(
            PodmanLauncher::container_name("svc", PoolColor::Blue, 0),
            PodmanLauncher::container_name("svc", PoolColor::Green, 0)
        );
    }
}
