//! Error types for orchestration
//!
//! Remote job failures are not errors: a non-zero exit is a legitimate
//! `JobResult`. Everything here is a failure of the harness itself.

use kubetest_cluster::ClusterError;
use kubetest_core::DomainError;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::poller::WaitError;

/// Result type alias for orchestration
pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Missing or invalid job fields, caught before submission
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Creating a remote object failed
    #[error("failed to create {resource} for {test_id}: {source}")]
    Submission {
        resource: &'static str,
        test_id: String,
        #[source]
        source: ClusterError,
    },

    /// No workload unit carries the job's label
    #[error("no workload unit found matching test {0}")]
    WorkloadNotFound(String),

    /// Output stream broke before EOF
    #[error("output stream of {test_id} broke: {source}")]
    Stream {
        test_id: String,
        #[source]
        source: io::Error,
    },

    /// First error surfaced by one of several concurrent jobs
    #[error("job {test_id} failed: {source}")]
    Aggregation {
        test_id: String,
        #[source]
        source: Box<RunnerError>,
    },

    /// A platform query failed
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("timed out after {elapsed:?} waiting for {test_id}")]
    TimedOut { test_id: String, elapsed: Duration },

    #[error("cancelled")]
    Cancelled,

    /// A job task panicked or was aborted
    #[error("job task failed: {0}")]
    Task(String),
}

impl RunnerError {
    /// Converts the outcome of a readiness wait
    pub fn from_wait(err: WaitError<RunnerError>, test_id: &str) -> Self {
        match err {
            WaitError::Predicate(e) => e,
            WaitError::Cancelled => RunnerError::Cancelled,
            WaitError::TimedOut(elapsed) => RunnerError::TimedOut {
                test_id: test_id.to_string(),
                elapsed,
            },
        }
    }

    pub fn submission(resource: &'static str, test_id: &str, source: ClusterError) -> Self {
        RunnerError::Submission {
            resource,
            test_id: test_id.to_string(),
            source,
        }
    }

    /// The innermost error, looking through aggregation
    pub fn root(&self) -> &RunnerError {
        match self {
            RunnerError::Aggregation { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<DomainError> for RunnerError {
    fn from(err: DomainError) -> Self {
        RunnerError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wait() {
        let err = RunnerError::from_wait(WaitError::TimedOut(Duration::from_secs(3)), "t-1");
        assert!(matches!(err, RunnerError::TimedOut { ref test_id, .. } if test_id == "t-1"));

        let err = RunnerError::from_wait(
            WaitError::Predicate(RunnerError::WorkloadNotFound("t-1".to_string())),
            "t-1",
        );
        assert!(matches!(err, RunnerError::WorkloadNotFound(_)));
    }

    #[test]
    fn test_root_looks_through_aggregation() {
        let err = RunnerError::Aggregation {
            test_id: "t-1-ha".to_string(),
            source: Box::new(RunnerError::WorkloadNotFound("t-1-ha".to_string())),
        };
        assert!(matches!(err.root(), RunnerError::WorkloadNotFound(_)));
        assert_eq!(
            err.to_string(),
            "job t-1-ha failed: no workload unit found matching test t-1-ha"
        );
    }
}
