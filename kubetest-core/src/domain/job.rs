//! Job domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DomainError, Result};

/// Longest name a namespace or workload may carry
const MAX_ID_LEN: usize = 63;

/// Whether a job runs test suites or benchmark suites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Test,
    Benchmark,
}

impl JobKind {
    /// Value used for the `type` selection label
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Test => "test",
            JobKind::Benchmark => "benchmark",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "test" | "tests" => Ok(JobKind::Test),
            "bench" | "benchmark" | "benchmarks" => Ok(JobKind::Benchmark),
            _ => Err(DomainError::UnknownKind(s.to_string())),
        }
    }
}

/// Image pull policy handed to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PullPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Always" | "always" => Ok(PullPolicy::Always),
            "IfNotPresent" | "if-not-present" | "ifnotpresent" => Ok(PullPolicy::IfNotPresent),
            "Never" | "never" => Ok(PullPolicy::Never),
            _ => Err(DomainError::UnknownPullPolicy(s.to_string())),
        }
    }
}

/// A logical request to run one suite (or every registered suite)
///
/// Built by the request-expansion step, consumed once by a runner.
/// Never mutated after submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Unique per run; doubles as the namespace/workload name
    pub test_id: String,
    pub kind: JobKind,
    /// `None` means every suite registered for `kind`
    pub suite: Option<String>,
    /// Restricts the run to a single entry of `suite`
    pub test_name: Option<String>,
    pub image: String,
    pub pull_policy: PullPolicy,
    /// Zero means unbounded
    pub timeout: Duration,
}

impl JobSpec {
    /// Creates a spec with a freshly generated test ID
    pub fn new(kind: JobKind, image: impl Into<String>) -> Self {
        Self {
            test_id: generate_test_id(kind),
            kind,
            suite: None,
            test_name: None,
            image: image.into(),
            pull_policy: PullPolicy::default(),
            timeout: Duration::ZERO,
        }
    }

    pub fn with_test_id(mut self, test_id: impl Into<String>) -> Self {
        self.test_id = test_id.into();
        self
    }

    pub fn with_suite(mut self, suite: impl Into<String>) -> Self {
        self.suite = Some(suite.into());
        self
    }

    pub fn with_test_name(mut self, test_name: impl Into<String>) -> Self {
        self.test_name = Some(test_name.into());
        self
    }

    pub fn with_pull_policy(mut self, pull_policy: PullPolicy) -> Self {
        self.pull_policy = pull_policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the platform should enforce a deadline for this job
    pub fn is_bounded(&self) -> bool {
        !self.timeout.is_zero()
    }

    /// Derives the spec for one suite of an expanded request
    ///
    /// The child ID is `<test_id>-<suite>`; the test name filter is only
    /// carried over when the parent already targeted this suite.
    pub fn for_suite(&self, suite: &str) -> JobSpec {
        let test_name = match self.suite.as_deref() {
            Some(requested) if requested == suite => self.test_name.clone(),
            _ => None,
        };
        JobSpec {
            test_id: job_id(&self.test_id, suite),
            kind: self.kind,
            suite: Some(suite.to_string()),
            test_name,
            image: self.image.clone(),
            pull_policy: self.pull_policy,
            timeout: self.timeout,
        }
    }

    /// Validates the fields required before anything is submitted
    pub fn validate(&self) -> Result<()> {
        validate_id(&self.test_id)?;

        if self.image.trim().is_empty() {
            return Err(DomainError::InvalidJob(format!(
                "job {} has no image",
                self.test_id
            )));
        }

        if let Some(suite) = &self.suite {
            if suite.trim().is_empty() {
                return Err(DomainError::InvalidJob("suite name cannot be blank".into()));
            }
        }

        if self.test_name.is_some() && self.suite.is_none() {
            return Err(DomainError::InvalidJob(
                "a test name filter requires a suite".into(),
            ));
        }

        Ok(())
    }
}

/// Builds the ID of a job expanded from `base` for `suite`
pub fn job_id(base: &str, suite: &str) -> String {
    format!("{}-{}", base, suite)
}

/// Generates a short, DNS-safe run identifier such as `test-3f9c2a1b`
pub fn generate_test_id(kind: JobKind) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", kind.as_str(), &id[..8])
}

/// Test IDs name namespaces and workloads, so they must be DNS labels
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(DomainError::InvalidJob("test ID cannot be empty".into()));
    }

    if id.len() > MAX_ID_LEN {
        return Err(DomainError::InvalidJob(format!(
            "test ID '{}' is longer than {} characters",
            id, MAX_ID_LEN
        )));
    }

    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || id.starts_with('-') || id.ends_with('-') {
        return Err(DomainError::InvalidJob(format!(
            "test ID '{}' must consist of lowercase letters, digits and inner dashes",
            id
        )));
    }

    Ok(())
}

/// Stable status vocabulary used for results and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Succeeded,
    Failed,
    Running,
    Pending,
    Unknown,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Terminal outcome of a job, read from its workload unit
///
/// A non-zero exit code is a legitimate result ("the test failed"),
/// not an orchestration error ("the harness failed").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub message: String,
    pub exit_code: i32,
}

impl JobResult {
    /// Builds a result from a terminated container
    pub fn from_termination(exit_code: i32, message: impl Into<String>) -> Self {
        let status = if exit_code == 0 {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };
        Self {
            status,
            message: message.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("test".parse::<JobKind>().unwrap(), JobKind::Test);
        assert_eq!("benchmarks".parse::<JobKind>().unwrap(), JobKind::Benchmark);
        assert_eq!("Bench".parse::<JobKind>().unwrap(), JobKind::Benchmark);
        assert!("suite".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_generated_ids_are_valid() {
        let spec = JobSpec::new(JobKind::Test, "onos/tests:latest");
        assert!(spec.test_id.starts_with("test-"));
        assert!(spec.validate().is_ok());

        let other = JobSpec::new(JobKind::Test, "onos/tests:latest");
        assert_ne!(spec.test_id, other.test_id);
    }

    #[test]
    fn test_validation() {
        let spec = JobSpec::new(JobKind::Test, "img").with_test_id("t-ab12");
        assert!(spec.validate().is_ok());

        assert!(spec.clone().with_test_id("").validate().is_err());
        assert!(spec.clone().with_test_id("Upper").validate().is_err());
        assert!(spec.clone().with_test_id("trailing-").validate().is_err());
        assert!(spec.clone().with_test_id("x".repeat(64)).validate().is_err());

        let no_image = JobSpec::new(JobKind::Test, " ");
        assert!(no_image.validate().is_err());

        let orphan_filter = spec.clone().with_test_name("ping");
        assert!(orphan_filter.validate().is_err());
        assert!(orphan_filter.with_suite("smoke").validate().is_ok());
    }

    #[test]
    fn test_for_suite() {
        let parent = JobSpec::new(JobKind::Test, "img")
            .with_test_id("t-ab12")
            .with_timeout(Duration::from_secs(60));

        let child = parent.for_suite("smoke");
        assert_eq!(child.test_id, "t-ab12-smoke");
        assert_eq!(child.suite.as_deref(), Some("smoke"));
        assert_eq!(child.timeout, Duration::from_secs(60));
        assert_eq!(child.test_name, None);

        let filtered = parent.with_suite("ha").with_test_name("failover");
        let child = filtered.for_suite("ha");
        assert_eq!(child.test_id, "t-ab12-ha");
        assert_eq!(child.test_name.as_deref(), Some("failover"));
    }

    #[test]
    fn test_result_from_termination() {
        let result = JobResult::from_termination(137, "oom");
        assert_eq!(
            result,
            JobResult {
                status: JobStatus::Failed,
                message: "oom".to_string(),
                exit_code: 137,
            }
        );
        assert!(JobResult::from_termination(0, "").success());
    }
}
