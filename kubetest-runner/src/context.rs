//! Process context
//!
//! The same binary runs in three places. `TEST_CONTEXT` tells it which:
//! - unset: invoked by an operator, submits a coordinator job and follows it
//! - `coordinator`: inside the cluster, expands the request and runs one
//!   worker job per suite
//! - `worker`: inside a worker job, runs the suite's entries in-process

use std::fmt;

use kubetest_core::labels::CONTEXT_ENV;

use crate::error::{Result, RunnerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessContext {
    #[default]
    Operator,
    Coordinator,
    Worker,
}

impl ProcessContext {
    /// Reads the context from `TEST_CONTEXT`
    pub fn from_env() -> Result<Self> {
        Self::parse(std::env::var(CONTEXT_ENV).ok().as_deref())
    }

    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") | Some("operator") => Ok(ProcessContext::Operator),
            Some("coordinator") => Ok(ProcessContext::Coordinator),
            Some("worker") => Ok(ProcessContext::Worker),
            Some(other) => Err(RunnerError::Configuration(format!(
                "unknown {} value '{}'",
                CONTEXT_ENV, other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessContext::Operator => "operator",
            ProcessContext::Coordinator => "coordinator",
            ProcessContext::Worker => "worker",
        }
    }

    pub fn in_cluster(&self) -> bool {
        !matches!(self, ProcessContext::Operator)
    }
}

impl fmt::Display for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
