//! Workload domain types
//!
//! `WorkloadSpec` is what gets submitted to the platform; `WorkloadUnit` is
//! what the platform reports back about the unit it created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::domain::job::{JobKind, PullPolicy};
use crate::error::{DomainError, Result};
use crate::labels::{TEST_LABEL, TYPE_LABEL};

/// Lifecycle phase of a workload unit
///
/// Phases only move forward: Pending -> Running -> Succeeded | Failed.
/// `Unknown` is what the platform reports when it lost track of the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Phase {
    /// Parses a platform phase string; anything unrecognised is `Unknown`
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Phase::Pending,
            "Running" => Phase::Running,
            "Succeeded" => Phase::Succeeded,
            "Failed" => Phase::Failed,
            _ => Phase::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }

    /// Whether a unit in this phase may next be observed in `next`
    pub fn can_transition_to(&self, next: Phase) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Phase::Pending => true,
            Phase::Running | Phase::Unknown => next != Phase::Pending,
            Phase::Succeeded | Phase::Failed => false,
        }
    }

    /// Moves to `next`, refusing regressions
    pub fn advance(self, next: Phase) -> Result<Phase> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::PhaseRegression {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Exit information of a terminated container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    pub exit_code: i32,
    pub message: String,
}

/// State of a single container inside a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Waiting { reason: Option<String> },
    Running,
    Terminated(Termination),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub ready: bool,
    pub state: ContainerState,
}

/// A remote execution unit as reported by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadUnit {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub image: String,
    pub phase: Phase,
    /// Primary container first
    pub containers: Vec<ContainerStatus>,
    pub started_at: Option<DateTime<Utc>>,
}

impl WorkloadUnit {
    pub fn primary(&self) -> Option<&ContainerStatus> {
        self.containers.first()
    }

    /// Running with its primary container ready
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Running && self.primary().is_some_and(|c| c.ready)
    }

    /// Ready, or already finished (very fast jobs never look ready)
    pub fn has_started(&self) -> bool {
        self.is_ready() || self.phase.is_terminal()
    }

    /// Exit information, once the primary container terminated
    pub fn termination(&self) -> Option<&Termination> {
        match self.primary().map(|c| &c.state) {
            Some(ContainerState::Terminated(termination)) => Some(termination),
            _ => None,
        }
    }

    pub fn test_id(&self) -> Option<&str> {
        self.labels.get(TEST_LABEL).map(String::as_str)
    }

    pub fn kind(&self) -> Option<JobKind> {
        self.labels.get(TYPE_LABEL).and_then(|t| t.parse().ok())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Where the keyed configuration entry is mounted inside the unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMount {
    /// Name of the shared configuration resource
    pub resource: String,
    /// Entry inside the resource (the test ID)
    pub key: String,
    /// Absolute file path the entry appears at
    pub path: String,
}

/// Everything the platform needs to create a single-replica,
/// zero-restart workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub image: String,
    pub pull_policy: PullPolicy,
    pub env: BTreeMap<String, String>,
    pub service_account: String,
    pub config: ConfigMount,
    /// Platform-side deadline; the only bound on a hung unit
    pub active_deadline: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(phase: Phase, state: ContainerState, ready: bool) -> WorkloadUnit {
        WorkloadUnit {
            name: "t-1-abcde".to_string(),
            namespace: "kubetest".to_string(),
            labels: BTreeMap::from([
                (TYPE_LABEL.to_string(), "test".to_string()),
                (TEST_LABEL.to_string(), "t-1".to_string()),
            ]),
            annotations: BTreeMap::new(),
            image: "img".to_string(),
            phase,
            containers: vec![ContainerStatus {
                name: "test".to_string(),
                ready,
                state,
            }],
            started_at: None,
        }
    }

    #[test]
    fn test_phase_transitions_are_monotonic() {
        assert!(Phase::Pending.can_transition_to(Phase::Running));
        assert!(Phase::Pending.can_transition_to(Phase::Failed));
        assert!(Phase::Running.can_transition_to(Phase::Succeeded));
        assert!(Phase::Running.can_transition_to(Phase::Running));

        assert!(!Phase::Running.can_transition_to(Phase::Pending));
        assert!(!Phase::Succeeded.can_transition_to(Phase::Running));
        assert!(!Phase::Failed.can_transition_to(Phase::Succeeded));

        assert!(Phase::Succeeded.advance(Phase::Pending).is_err());
        assert_eq!(Phase::Pending.advance(Phase::Running).unwrap(), Phase::Running);
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!(Phase::parse("Running"), Phase::Running);
        assert_eq!(Phase::parse("Evicted"), Phase::Unknown);
    }

    #[test]
    fn test_readiness() {
        assert!(unit(Phase::Running, ContainerState::Running, true).is_ready());
        assert!(!unit(Phase::Running, ContainerState::Running, false).is_ready());
        let waiting = ContainerState::Waiting { reason: None };
        assert!(!unit(Phase::Pending, waiting, false).has_started());

        let done = unit(
            Phase::Failed,
            ContainerState::Terminated(Termination {
                exit_code: 137,
                message: "oom".to_string(),
            }),
            false,
        );
        assert!(done.has_started());
        assert_eq!(done.termination().map(|t| t.exit_code), Some(137));
        assert_eq!(done.test_id(), Some("t-1"));
        assert_eq!(done.kind(), Some(JobKind::Test));
    }
}
