//! Harness configuration
//!
//! Defines the runtime parameters shared by every context: which backend
//! and namespace to use, polling and rendering intervals, local deadlines,
//! and where in-cluster processes find their descriptor and termination log.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which cluster backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Kube,
    Podman,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Kube => "kube",
            Backend::Podman => "podman",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kube" | "kubernetes" => Ok(Backend::Kube),
            "podman" => Ok(Backend::Podman),
            other => anyhow::bail!("unknown backend '{}' (expected kube or podman)", other),
        }
    }
}

/// Harness configuration
///
/// Defaults, overridden by environment variables, overridden by CLI flags.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Namespace the coordinator job runs in
    pub namespace: String,

    pub backend: Backend,

    /// ReadinessPoller interval
    pub poll_interval: Duration,

    /// Minimum spacing between status renders
    pub status_interval: Duration,

    /// Local deadline for jobs without a timeout
    pub wait_timeout: Option<Duration>,

    /// Added to a job timeout to form its local deadline
    pub startup_grace: Duration,

    /// Descriptor location inside a unit
    pub config_path: PathBuf,

    /// Termination message location inside a unit
    pub termination_log: PathBuf,
}

impl HarnessConfig {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - KUBETEST_NAMESPACE (optional, default: kubetest)
    /// - KUBETEST_BACKEND (optional, kube or podman, default: kube)
    /// - KUBETEST_POLL_INTERVAL_MS (optional, default: 100)
    /// - KUBETEST_STATUS_INTERVAL_MS (optional, default: 500)
    /// - KUBETEST_WAIT_TIMEOUT (optional, seconds, default: none)
    /// - KUBETEST_STARTUP_GRACE (optional, seconds, default: 300)
    /// - KUBETEST_CONFIG_PATH (optional, default: /config/config.json)
    /// - KUBETEST_TERMINATION_LOG (optional, default: /dev/termination-log)
    ///
    /// `TEST_CONTEXT` is not part of it: the process context is read once
    /// by `ProcessContext::from_env`, before any configuration is loaded.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let namespace = std::env::var("KUBETEST_NAMESPACE")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.namespace);

        let backend = match std::env::var("KUBETEST_BACKEND") {
            Ok(value) if !value.is_empty() => value.parse()?,
            _ => defaults.backend,
        };

        let poll_interval = std::env::var("KUBETEST_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let status_interval = std::env::var("KUBETEST_STATUS_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.status_interval);

        let wait_timeout = std::env::var("KUBETEST_WAIT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let startup_grace = std::env::var("KUBETEST_STARTUP_GRACE")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.startup_grace);

        let config_path = std::env::var_os("KUBETEST_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.config_path);

        let termination_log = std::env::var_os(kubetest_core::labels::TERMINATION_LOG_ENV)
            .map(PathBuf::from)
            .unwrap_or(defaults.termination_log);

        Ok(Self {
            namespace,
            backend,
            poll_interval,
            status_interval,
            wait_timeout,
            startup_grace,
            config_path,
            termination_log,
        })
    }

    /// Overrides the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.namespace.is_empty() {
            anyhow::bail!("namespace cannot be empty");
        }

        if self.namespace.len() > 63
            || !self
                .namespace
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            anyhow::bail!("namespace '{}' is not a valid DNS label", self.namespace);
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.config_path.as_os_str().is_empty() {
            anyhow::bail!("config_path cannot be empty");
        }

        Ok(())
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            namespace: "kubetest".to_string(),
            backend: Backend::Kube,
            poll_interval: Duration::from_millis(100),
            status_interval: Duration::from_millis(500),
            wait_timeout: None,
            startup_grace: Duration::from_secs(300),
            config_path: PathBuf::from("/config/config.json"),
            termination_log: PathBuf::from("/dev/termination-log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.namespace, "kubetest");
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.status_interval, Duration::from_millis(500));
        assert_eq!(config.startup_grace, Duration::from_secs(300));
        assert!(config.wait_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = HarnessConfig::default();

        config.namespace = String::new();
        assert!(config.validate().is_err());

        config.namespace = "Not_A_Label".to_string();
        assert!(config.validate().is_err());

        config.namespace = "onos-1".to_string();
        assert!(config.validate().is_ok());

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("kube".parse::<Backend>().unwrap(), Backend::Kube);
        assert_eq!("Podman".parse::<Backend>().unwrap(), Backend::Podman);
        assert!("docker".parse::<Backend>().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = HarnessConfig::default()
            .with_namespace("ci")
            .with_backend(Backend::Podman);
        assert_eq!(config.namespace, "ci");
        assert_eq!(config.backend, Backend::Podman);
    }
}
