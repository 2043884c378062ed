//! Build stage
//!
//! Turns a source bundle into an image pushed to the registry. The build
//! itself is an opaque external action invoked with a fixed build
//! specification and a fixed set of named variables. Failures are returned
//! as-is; retrying is left to the operator.

use async_trait::async_trait;
use cutover_core::domain::artifact::{Artifact, ArtifactPayload, ImageRef};
use cutover_core::domain::environment::EnvironmentConfig;
use cutover_core::domain::run::StageKind;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use crate::error::BuildError;

/// Name of the build output artifact
pub const BUILD_ARTIFACT: &str = "buildArtifact";

/// Everything the external build action receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Build specification, resolved inside the source checkout
    pub spec_path: PathBuf,
    /// Source checkout used as the build context
    pub context_dir: PathBuf,
    /// Named values exposed to the build
    pub variables: BTreeMap<String, String>,
    /// Target image (tag only; the digest is known after the push)
    pub image: ImageRef,
}

/// External build action
///
/// Implementations must push the image and return its reference including
/// the registry digest.
#[async_trait]
pub trait BuildAction: Send + Sync {
    async fn run(&self, request: &BuildRequest) -> Result<ImageRef, BuildError>;
}

/// Static build settings shared by all environments
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Build specification path relative to the source root
    pub spec_path: PathBuf,
    /// Fixed image tag
    pub image_tag: String,
    /// Registry host template; `{account}` and `{region}` are substituted
    pub registry: String,
    /// Naming owner
    pub owner: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            spec_path: PathBuf::from("./buildspec.yml"),
            image_tag: "latest".to_string(),
            registry: "{account}.dkr.ecr.{region}.amazonaws.com".to_string(),
            owner: "simflexcloud".to_string(),
        }
    }
}

/// Build stage for one environment
pub struct BuildStage {
    action: Arc<dyn BuildAction>,
    settings: BuildSettings,
}

impl BuildStage {
    pub fn new(action: Arc<dyn BuildAction>, settings: BuildSettings) -> Self {
        Self { action, settings }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Registry URI of the image repository for `env`
    pub fn repository_uri(&self, env: &EnvironmentConfig) -> String {
        let host = self
            .settings
            .registry
            .replace("{account}", env.account())
            .replace("{region}", env.region());
        format!(
            "{}/{}",
            host.trim_end_matches('/'),
            EnvironmentConfig::repository_name(&self.settings.owner)
        )
    }

    /// Named values passed to the build action
    pub fn variables(&self, env: &EnvironmentConfig) -> BTreeMap<String, String> {
        let owner = &self.settings.owner;
        BTreeMap::from([
            (
                "IMAGE_REPO_NAME".to_string(),
                EnvironmentConfig::repository_name(owner),
            ),
            ("REPOSITORY_URI".to_string(), self.repository_uri(env)),
            ("IMAGE_TAG".to_string(), self.settings.image_tag.clone()),
            ("AWS_ACCOUNT_ID".to_string(), env.account().to_string()),
            ("AWS_REGION".to_string(), env.region().to_string()),
            ("TASK_EXECUTION_ARN".to_string(), env.task_role(owner)),
        ])
    }

    /// Builds and pushes the image for a source bundle
    pub async fn build(
        &self,
        source: &Artifact,
        env: &EnvironmentConfig,
    ) -> Result<Artifact, BuildError> {
        let (revision, checkout) = source
            .source()
            .ok_or_else(|| BuildError::UnexpectedArtifact(source.name.clone()))?;

        let request = BuildRequest {
            spec_path: checkout.join(&self.settings.spec_path),
            context_dir: checkout.clone(),
            variables: self.variables(env),
            image: ImageRef::new(self.repository_uri(env), &self.settings.image_tag),
        };

        info!(
            "Building revision {} for {} ({})",
            revision,
            env.stage(),
            request.image.tagged()
        );

        let image = self.action.run(&request).await.inspect_err(|e| {
            error!("Build of revision {} for {} failed: {}", revision, env.stage(), e);
        })?;

        info!("Pushed image {} for {}", image, env.stage());

        Ok(Artifact::new(
            BUILD_ARTIFACT,
            StageKind::Build,
            ArtifactPayload::Image(image),
        ))
    }
}

/// Build action that pushes nothing, for dry runs and tests
///
/// The returned digest is derived from the checkout directory name, so each
/// revision yields a distinct image.
#[derive(Default)]
pub struct InMemoryBuildAction {
    requests: Mutex<Vec<BuildRequest>>,
    fail: Mutex<bool>,
}

impl InMemoryBuildAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent builds fail
    pub fn failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn builds(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl BuildAction for InMemoryBuildAction {
    async fn run(&self, request: &BuildRequest) -> Result<ImageRef, BuildError> {
        self.requests.lock().unwrap().push(request.clone());
        if *self.fail.lock().unwrap() {
            return Err(BuildError::ActionFailed {
                exit_code: 2,
                message: "simulated build failure".to_string(),
            });
        }

        let revision = request
            .context_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(request.image.clone().with_digest(format!("sha256:{}", revision)))
    }
}
