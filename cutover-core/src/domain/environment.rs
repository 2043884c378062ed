//! Environment domain types
//!
//! An environment is one deployment target: an account, a region, a stage
//! name and a naming pattern. Every resource name the orchestrator derives for
//! a target starts with the environment's resource prefix.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Project suffix appended to every resource prefix
pub const PROJECT_NAME: &str = "ecs-fargate-blue-green-deployments";

/// Errors raised while constructing an environment
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("environment field '{0}' cannot be empty")]
    EmptyField(&'static str),

    #[error("environment field '{field}' contains whitespace: '{value}'")]
    Whitespace { field: &'static str, value: String },

    #[error("account id must be numeric: '{0}'")]
    InvalidAccount(String),

    #[error("invalid environment spec '{0}' (expected stage:account:region:pattern)")]
    InvalidSpec(String),
}

/// Immutable description of a deployment target
///
/// Fields are private so a constructed value cannot be mutated; use the
/// accessors to read them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    account: String,
    region: String,
    stage: String,
    pattern: String,
}

impl EnvironmentConfig {
    /// Creates a validated environment
    pub fn new(
        account: impl Into<String>,
        region: impl Into<String>,
        stage: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Result<Self, EnvironmentError> {
        let env = Self {
            account: account.into(),
            region: region.into(),
            stage: stage.into(),
            pattern: pattern.into(),
        };

        for (field, value) in [
            ("account", &env.account),
            ("region", &env.region),
            ("stage", &env.stage),
            ("pattern", &env.pattern),
        ] {
            if value.is_empty() {
                return Err(EnvironmentError::EmptyField(field));
            }
            if value.chars().any(char::is_whitespace) {
                return Err(EnvironmentError::Whitespace {
                    field,
                    value: value.clone(),
                });
            }
        }

        if !env.account.chars().all(|c| c.is_ascii_digit()) {
            return Err(EnvironmentError::InvalidAccount(env.account));
        }

        Ok(env)
    }

    /// Parses the compact `stage:account:region:pattern` form used in configuration
    pub fn parse(spec: &str) -> Result<Self, EnvironmentError> {
        let parts: Vec<&str> = spec.trim().split(':').collect();
        match parts.as_slice() {
            [stage, account, region, pattern] => Self::new(*account, *region, *stage, *pattern),
            _ => Err(EnvironmentError::InvalidSpec(spec.to_string())),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Resource prefix, unique per (pattern, owner, stage)
    pub fn resource_prefix(&self, owner: &str) -> String {
        format!("{}-{}-{}-{}", self.pattern, owner, self.stage, PROJECT_NAME)
    }

    /// Name of the image-build pipeline for this environment
    pub fn pipeline_name(&self, owner: &str) -> String {
        format!("master-{}", self.resource_prefix(owner))
    }

    /// Identity of the role assumed by the deployed task
    pub fn task_role(&self, owner: &str) -> String {
        format!("{}-ecs-task", self.resource_prefix(owner))
    }

    /// Image repository name shared by all stages of one owner
    pub fn repository_name(owner: &str) -> String {
        format!("{}/{}", owner, PROJECT_NAME)
    }
}

/// Cold-start phase of an environment's pipeline
///
/// The deploy stage needs a running service, and the service needs an image
/// produced by the build stage. Runs start in `Initial` with deploy disabled;
/// an operator moves the environment to `Complete` once an image exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapPhase {
    Initial,
    Complete,
}

impl BootstrapPhase {
    pub fn deploy_enabled(self) -> bool {
        matches!(self, BootstrapPhase::Complete)
    }
}

impl std::fmt::Display for EnvironmentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}/{}, pattern {})",
            self.stage, self.account, self.region, self.pattern
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev() -> EnvironmentConfig {
        EnvironmentConfig::new("123456789012", "ap-southeast-1", "dev", "sin").unwrap()
    }

    #[test]
    fn test_resource_prefix() {
        assert_eq!(
            dev().resource_prefix("simflexcloud"),
            "sin-simflexcloud-dev-ecs-fargate-blue-green-deployments"
        );
        assert_eq!(
            dev().pipeline_name("simflexcloud"),
            "master-sin-simflexcloud-dev-ecs-fargate-blue-green-deployments"
        );
        assert_eq!(
            dev().task_role("simflexcloud"),
            "sin-simflexcloud-dev-ecs-fargate-blue-green-deployments-ecs-task"
        );
    }

    #[test]
    fn test_prefix_differs_per_stage() {
        let prod = EnvironmentConfig::new("123456789012", "ap-southeast-1", "prod", "sin").unwrap();
        assert_ne!(dev().resource_prefix("acme"), prod.resource_prefix("acme"));
    }

    #[test]
    fn test_rejects_invalid_fields() {
        assert_eq!(
            EnvironmentConfig::new("", "eu-west-1", "dev", "dub"),
            Err(EnvironmentError::EmptyField("account"))
        );
        assert!(matches!(
            EnvironmentConfig::new("1234", "eu west", "dev", "dub"),
            Err(EnvironmentError::Whitespace { field: "region", .. })
        ));
        assert!(matches!(
            EnvironmentConfig::new("12ab", "eu-west-1", "dev", "dub"),
            Err(EnvironmentError::InvalidAccount(_))
        ));
    }

    #[test]
    fn test_parse_spec() {
        let env = EnvironmentConfig::parse("dev:123456789012:ap-southeast-1:sin").unwrap();
        assert_eq!(env, dev());
        assert!(matches!(
            EnvironmentConfig::parse("dev:123"),
            Err(EnvironmentError::InvalidSpec(_))
        ));
    }
}
