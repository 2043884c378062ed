//! Artifact domain types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::run::StageKind;

/// Reference to a container image in the registry
///
/// Two references are equal only if repository, tag and digest all match, so
/// successive builds pushed under the same fixed tag stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository_uri: String,
    pub tag: String,
    pub digest: Option<String>,
}

impl ImageRef {
    pub fn new(repository_uri: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository_uri: repository_uri.into(),
            tag: tag.into(),
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// `uri:tag` form used when pushing
    pub fn tagged(&self) -> String {
        format!("{}:{}", self.repository_uri, self.tag)
    }

    /// Most specific pullable reference (`uri@digest` when the digest is known)
    pub fn pull_ref(&self) -> String {
        match &self.digest {
            Some(digest) => format!("{}@{}", self.repository_uri, digest),
            None => self.tagged(),
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.digest {
            Some(digest) => write!(f, "{} ({})", self.tagged(), digest),
            None => write!(f, "{}", self.tagged()),
        }
    }
}

/// Payload carried by an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactPayload {
    /// Checked-out source tree for one revision
    SourceBundle { revision: String, path: PathBuf },
    /// Image pushed by the build stage
    Image(ImageRef),
}

/// Opaque payload moving from one pipeline stage to the next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub name: String,
    pub produced_by: StageKind,
    pub payload: ArtifactPayload,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, produced_by: StageKind, payload: ArtifactPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            produced_by,
            payload,
            created_at: chrono::Utc::now(),
        }
    }

    /// Returns the image reference if this is a build output
    pub fn image(&self) -> Option<&ImageRef> {
        match &self.payload {
            ArtifactPayload::Image(image) => Some(image),
            ArtifactPayload::SourceBundle { .. } => None,
        }
    }

    /// Returns the revision and checkout path if this is a source bundle
    pub fn source(&self) -> Option<(&str, &PathBuf)> {
        match &self.payload {
            ArtifactPayload::SourceBundle { revision, path } => Some((revision, path)),
            ArtifactPayload::Image(_) => None,
        }
    }
}

/// Lightweight record of an artifact kept in run history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub id: Uuid,
    pub name: String,
    pub produced_by: StageKind,
    pub description: String,
}

impl From<&Artifact> for ArtifactSummary {
    fn from(artifact: &Artifact) -> Self {
        let description = match &artifact.payload {
            ArtifactPayload::SourceBundle { revision, .. } => format!("source {}", revision),
            ArtifactPayload::Image(image) => format!("image {}", image),
        };

        Self {
            id: artifact.id,
            name: artifact.name.clone(),
            produced_by: artifact.produced_by,
            description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_identity_includes_digest() {
        let a = ImageRef::new("123.dkr.ecr/acme/app", "latest").with_digest("sha256:aaa");
        let b = ImageRef::new("123.dkr.ecr/acme/app", "latest").with_digest("sha256:bbb");
        assert_ne!(a, b);
        assert_eq!(a.tagged(), b.tagged());
        assert_eq!(a.pull_ref(), "123.dkr.ecr/acme/app@sha256:aaa");
    }

    #[test]
    fn test_artifact_accessors() {
        let artifact = Artifact::new(
            "buildArtifact",
            StageKind::Build,
            ArtifactPayload::Image(ImageRef::new("repo", "latest")),
        );
        assert!(artifact.image().is_some());
        assert!(artifact.source().is_none());

        let summary = ArtifactSummary::from(&artifact);
        assert_eq!(summary.description, "image repo:latest");
    }
}
