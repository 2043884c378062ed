//! Orchestrator configuration
//!
//! Defines the environments the orchestrator drives, the source and build
//! settings shared by all of them, listener topology, and the rollout policy.

use cutover_core::domain::deployment::RolloutPolicy;
use cutover_core::domain::environment::EnvironmentConfig;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::service::build::BuildSettings;

/// Where pool tasks run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Containers started through podman
    Podman,
    /// Nothing is started; pools, weights and builds are simulated
    Memory,
}

impl std::str::FromStr for RuntimeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "podman" => Ok(RuntimeKind::Podman),
            "memory" => Ok(RuntimeKind::Memory),
            other => anyhow::bail!("unknown runtime '{}' (expected podman or memory)", other),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address of the control plane
    pub bind_addr: String,

    /// PostgreSQL URL; run history stays in memory when unset
    pub database_url: Option<String>,

    /// Naming owner used in every resource prefix
    pub owner: String,

    /// Deployment targets, one pipeline each
    pub environments: Vec<EnvironmentConfig>,

    /// Repository watched for new revisions; no watcher when unset
    pub source_repo: Option<String>,

    pub source_branch: String,

    /// Directory receiving source checkouts
    pub workspace: PathBuf,

    pub source_poll_interval: Duration,

    pub build: BuildSettings,

    /// Host serving the prod and test listeners
    pub listener_host: String,
    pub prod_port: u16,
    pub test_port: u16,
    pub health_path: String,

    /// Tasks per pool
    pub desired_count: usize,

    pub policy: RolloutPolicy,

    pub runtime: RuntimeKind,

    /// Load balancer admin endpoint; weights stay in memory when unset
    pub router_url: Option<String>,

    /// Start with the Deploy stage already armed
    pub bootstrapped: bool,
}

impl Config {
    /// Creates and validates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - CUTOVER_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DATABASE_URL
    /// - CUTOVER_OWNER (default: simflexcloud)
    /// - CUTOVER_ENVIRONMENTS (comma list of stage:account:region:pattern)
    /// - CUTOVER_SOURCE_REPO, CUTOVER_SOURCE_BRANCH (default: master)
    /// - CUTOVER_WORKSPACE, CUTOVER_SOURCE_POLL_INTERVAL (seconds, default: 60)
    /// - CUTOVER_BUILD_SPEC, CUTOVER_IMAGE_TAG, CUTOVER_REGISTRY
    /// - CUTOVER_LISTENER_HOST, CUTOVER_PROD_PORT, CUTOVER_TEST_PORT, CUTOVER_HEALTH_PATH
    /// - CUTOVER_DESIRED_COUNT (default: 3)
    /// - CUTOVER_SHIFT_INCREMENT_PERCENT, CUTOVER_SHIFT_INTERVAL, CUTOVER_BAKE_TIME,
    ///   CUTOVER_HEALTH_TIMEOUT, CUTOVER_READY_TIMEOUT
    /// - CUTOVER_RUNTIME (podman | memory, default: podman)
    /// - CUTOVER_ROUTER_URL
    /// - CUTOVER_BOOTSTRAPPED (true | false)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::load(|key| std::env::var(key).ok())
    }

    /// Reads and validates configuration
    ///
    /// Every variable is optional, so one that is set but malformed is an
    /// error and never a reason to fall back to the defaults.
    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let config = Self::from_lookup(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environments = match var("CUTOVER_ENVIRONMENTS") {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    EnvironmentConfig::parse(s)
                        .map_err(|e| anyhow::anyhow!("CUTOVER_ENVIRONMENTS: {}", e))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => defaults.environments,
        };

        let mut build = defaults.build;
        if let Some(spec) = var("CUTOVER_BUILD_SPEC") {
            build.spec_path = PathBuf::from(spec);
        }
        if let Some(tag) = var("CUTOVER_IMAGE_TAG") {
            build.image_tag = tag;
        }
        if let Some(registry) = var("CUTOVER_REGISTRY") {
            build.registry = registry;
        }
        let owner = var("CUTOVER_OWNER").unwrap_or(defaults.owner);
        build.owner = owner.clone();

        let policy = RolloutPolicy {
            shift_increment_percent: parse(&var, "CUTOVER_SHIFT_INCREMENT_PERCENT")?
                .unwrap_or(defaults.policy.shift_increment_percent),
            shift_interval_secs: parse(&var, "CUTOVER_SHIFT_INTERVAL")?
                .unwrap_or(defaults.policy.shift_interval_secs),
            bake_time_secs: parse(&var, "CUTOVER_BAKE_TIME")?
                .unwrap_or(defaults.policy.bake_time_secs),
            health_check_timeout_secs: parse(&var, "CUTOVER_HEALTH_TIMEOUT")?
                .unwrap_or(defaults.policy.health_check_timeout_secs),
            ready_timeout_secs: parse(&var, "CUTOVER_READY_TIMEOUT")?
                .unwrap_or(defaults.policy.ready_timeout_secs),
        };

        Ok(Self {
            bind_addr: var("CUTOVER_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: var("DATABASE_URL"),
            owner,
            environments,
            source_repo: var("CUTOVER_SOURCE_REPO"),
            source_branch: var("CUTOVER_SOURCE_BRANCH").unwrap_or(defaults.source_branch),
            workspace: var("CUTOVER_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace),
            source_poll_interval: parse(&var, "CUTOVER_SOURCE_POLL_INTERVAL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.source_poll_interval),
            build,
            listener_host: var("CUTOVER_LISTENER_HOST").unwrap_or(defaults.listener_host),
            prod_port: parse(&var, "CUTOVER_PROD_PORT")?.unwrap_or(defaults.prod_port),
            test_port: parse(&var, "CUTOVER_TEST_PORT")?.unwrap_or(defaults.test_port),
            health_path: var("CUTOVER_HEALTH_PATH").unwrap_or(defaults.health_path),
            desired_count: parse(&var, "CUTOVER_DESIRED_COUNT")?.unwrap_or(defaults.desired_count),
            policy,
            runtime: parse(&var, "CUTOVER_RUNTIME")?.unwrap_or(defaults.runtime),
            router_url: var("CUTOVER_ROUTER_URL"),
            bootstrapped: parse(&var, "CUTOVER_BOOTSTRAPPED")?.unwrap_or(defaults.bootstrapped),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.environments.is_empty() {
            anyhow::bail!("at least one environment is required");
        }

        let mut stages = HashSet::new();
        for env in &self.environments {
            if !stages.insert(env.stage()) {
                anyhow::bail!("environment '{}' is configured twice", env.stage());
            }
        }

        if self.prod_port == self.test_port {
            anyhow::bail!("prod and test listeners must use different ports");
        }

        if !self.health_path.starts_with('/') {
            anyhow::bail!("health_path must start with '/'");
        }

        if self.desired_count == 0 {
            anyhow::bail!("desired_count must be greater than 0");
        }

        if self.source_poll_interval.as_secs() == 0 {
            anyhow::bail!("source_poll_interval must be greater than 0");
        }

        if let Some(url) = &self.router_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("router_url must start with http:// or https://");
            }
        }

        self.policy
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid rollout policy: {}", e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let dev = EnvironmentConfig::new("000000000000", "us-east-1", "dev", "local");
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            owner: "simflexcloud".to_string(),
            environments: dev.into_iter().collect(),
            source_repo: None,
            source_branch: "master".to_string(),
            workspace: std::env::temp_dir().join("cutover"),
            source_poll_interval: Duration::from_secs(60),
            build: BuildSettings::default(),
            listener_host: "localhost".to_string(),
            prod_port: 80,
            test_port: 8080,
            health_path: "/".to_string(),
            desired_count: 3,
            policy: RolloutPolicy::default(),
            runtime: RuntimeKind::Podman,
            router_url: None,
            bootstrapped: false,
        }
    }
}

/// Parses an optional variable, failing on a present but malformed value
fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{}: invalid value '{}': {}", key, raw, e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.prod_port, 80);
        assert_eq!(config.test_port, 8080);
        assert_eq!(config.desired_count, 3);
        assert_eq!(config.policy.shift_increment_percent, 10);
        assert_eq!(config.policy.shift_interval_secs, 60);
        assert_eq!(config.environments.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            (
                "CUTOVER_ENVIRONMENTS",
                "dev:123456789012:ap-southeast-1:sin, prod:210987654321:eu-west-1:irl",
            ),
            ("CUTOVER_OWNER", "acme"),
            ("CUTOVER_BAKE_TIME", "120"),
            ("CUTOVER_RUNTIME", "memory"),
            ("CUTOVER_BOOTSTRAPPED", "true"),
        ]))
        .unwrap();

        assert_eq!(config.environments.len(), 2);
        assert_eq!(config.environments[1].stage(), "prod");
        assert_eq!(config.owner, "acme");
        assert_eq!(config.build.owner, "acme");
        assert_eq!(config.policy.bake_time_secs, 120);
        assert_eq!(config.runtime, RuntimeKind::Memory);
        assert!(config.bootstrapped);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("CUTOVER_PROD_PORT", "eighty")])).is_err());
        assert!(Config::from_lookup(lookup(&[("CUTOVER_ENVIRONMENTS", "dev:abc:us-east-1:x")])).is_err());
        assert!(Config::from_lookup(lookup(&[("CUTOVER_RUNTIME", "k8s")])).is_err());
    }

    #[test]
    fn test_load_fails_instead_of_dropping_settings() {
        let result = Config::load(lookup(&[
            ("CUTOVER_ENVIRONMENTS", "prod:210987654321:eu-west-1:irl"),
            ("CUTOVER_ROUTER_URL", "http://lb.internal:9000"),
            ("DATABASE_URL", "postgres://cutover@db/cutover"),
            ("CUTOVER_RUNTIME", "memory"),
            ("CUTOVER_BOOTSTRAPPED", "yes"),
        ]));
        assert!(result.is_err());

        let config = Config::load(lookup(&[
            ("CUTOVER_ENVIRONMENTS", "prod:210987654321:eu-west-1:irl"),
            ("CUTOVER_ROUTER_URL", "http://lb.internal:9000"),
            ("CUTOVER_RUNTIME", "memory"),
            ("CUTOVER_BOOTSTRAPPED", "true"),
        ]))
        .unwrap();
        assert_eq!(config.environments[0].stage(), "prod");
        assert_eq!(config.router_url.as_deref(), Some("http://lb.internal:9000"));
        assert_eq!(config.runtime, RuntimeKind::Memory);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.test_port = config.prod_port;
        assert!(config.validate().is_err());
        config.test_port = 8080;

        config.policy.health_check_timeout_secs = 90;
        assert!(config.validate().is_err());
        config.policy.health_check_timeout_secs = 5;

        config.environments.push(config.environments[0].clone());
        assert!(config.validate().is_err());
        config.environments.truncate(1);

        config.router_url = Some("lb.local".to_string());
        assert!(config.validate().is_err());
    }
}
