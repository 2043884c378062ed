//! Source stage
//!
//! The source host is an external collaborator; the orchestrator only needs
//! to learn the branch head and fetch a bundle for one revision.

use async_trait::async_trait;
use cutover_core::domain::artifact::{Artifact, ArtifactPayload};
use cutover_core::domain::run::{StageKind, validate_revision};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::SourceFetchError;

/// Name of the source output artifact
pub const SOURCE_ARTIFACT: &str = "sourceArtifact";

/// Version-control collaborator
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Current head revision of the tracked branch
    async fn latest_revision(&self) -> Result<String, SourceFetchError>;

    /// Fetches the bundle for `revision` into `workspace`
    async fn fetch(&self, revision: &str, workspace: &Path) -> Result<Artifact, SourceFetchError>;
}

/// Git repository accessed through the `git` command
pub struct GitSource {
    repo_url: String,
    branch: String,
}

impl GitSource {
    pub fn new(repo_url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            branch: branch.into(),
        }
    }

    async fn git(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, SourceFetchError> {
        let mut command = Command::new("git");
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        command.args(args);

        debug!("Running git {:?}", args);
        let output = command.output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceFetchError::CommandFailed(format!(
                "git {} exited with {}: {}",
                args.first().unwrap_or(&""),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(stdout)
    }
}

#[async_trait]
impl SourceProvider for GitSource {
    async fn latest_revision(&self) -> Result<String, SourceFetchError> {
        let reference = format!("refs/heads/{}", self.branch);
        let out = self
            .git(
                None,
                &["ls-remote", "--end-of-options", &self.repo_url, &reference],
            )
            .await?;

        out.split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or(SourceFetchError::RevisionNotFound(reference))
    }

    async fn fetch(&self, revision: &str, workspace: &Path) -> Result<Artifact, SourceFetchError> {
        validate_revision(revision)?;
        let checkout: PathBuf = workspace.join(revision);
        if checkout.exists() {
            tokio::fs::remove_dir_all(&checkout).await?;
        }
        tokio::fs::create_dir_all(&checkout).await?;

        info!("Fetching revision {} from {}", revision, self.repo_url);

        self.git(Some(&checkout), &["init", "--quiet"]).await?;
        self.git(
            Some(&checkout),
            &[
                "fetch",
                "--quiet",
                "--depth",
                "1",
                "--end-of-options",
                &self.repo_url,
                revision,
            ],
        )
        .await
        .map_err(|e| match e {
            SourceFetchError::CommandFailed(msg) if msg.contains("couldn't find remote ref") => {
                SourceFetchError::RevisionNotFound(revision.to_string())
            }
            other => other,
        })?;
        self.git(Some(&checkout), &["checkout", "--quiet", "FETCH_HEAD"])
            .await?;

        Ok(Artifact::new(
            SOURCE_ARTIFACT,
            StageKind::Source,
            ArtifactPayload::SourceBundle {
                revision: revision.to_string(),
                path: checkout,
            },
        ))
    }
}

/// Source tree already on disk; every revision resolves to the same directory
///
/// Used when no repository is configured. There is no branch to watch, so
/// `latest_revision` always fails.
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SourceProvider for LocalSource {
    async fn latest_revision(&self) -> Result<String, SourceFetchError> {
        Err(SourceFetchError::CommandFailed(
            "local source has no branch to watch".to_string(),
        ))
    }

    async fn fetch(&self, revision: &str, _workspace: &Path) -> Result<Artifact, SourceFetchError> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Err(SourceFetchError::RevisionNotFound(revision.to_string()));
        }

        info!("Using {} as revision {}", self.root.display(), revision);
        Ok(Artifact::new(
            SOURCE_ARTIFACT,
            StageKind::Source,
            ArtifactPayload::SourceBundle {
                revision: revision.to_string(),
                path: self.root.clone(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_source_bundles_root() {
        let root = std::env::temp_dir();
        let source = LocalSource::new(&root);

        let artifact = source.fetch("r1", Path::new("/unused")).await.unwrap();
        let (revision, path) = artifact.source().unwrap();
        assert_eq!(revision, "r1");
        assert_eq!(path, &root);
        assert!(source.latest_revision().await.is_err());
    }

    #[tokio::test]
    async fn test_git_source_refuses_traversal_before_touching_disk() {
        let root = tempfile::tempdir().unwrap();
        let victim = root.path().join("victim");
        std::fs::create_dir_all(&victim).unwrap();
        std::fs::write(victim.join("precious.txt"), "keep").unwrap();
        let workspace = root.path().join("ws").join("dev");
        std::fs::create_dir_all(&workspace).unwrap();

        let source = GitSource::new("https://git.invalid/app.git", "main");
        let result = source.fetch("../../victim", &workspace).await;

        assert!(matches!(result, Err(SourceFetchError::InvalidRevision(_))));
        assert!(victim.join("precious.txt").exists());
    }

    #[tokio::test]
    async fn test_git_source_refuses_option_like_revision() {
        let root = tempfile::tempdir().unwrap();
        let source = GitSource::new("https://git.invalid/app.git", "main");

        let result = source.fetch("--upload-pack=touch", root.path()).await;

        assert!(matches!(result, Err(SourceFetchError::InvalidRevision(_))));
        assert!(std::fs::read_dir(root.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_local_source_missing_root() {
        let source = LocalSource::new("/nonexistent/cutover/source");
        let result = source.fetch("r1", Path::new("/unused")).await;
        assert!(matches!(result, Err(SourceFetchError::RevisionNotFound(_))));
    }
}
