//! Kubetest Runner
//!
//! Orchestration of test and benchmark jobs on a cluster.
//!
//! Architecture:
//! - Config / Context: harness settings and the process role, from the environment
//! - Runner: drives one job from setup to its terminal state
//! - Coordinator: fans a request out into one job per suite and reduces the outcomes
//! - Worker: runs a suite's entries inside the job's own unit
//! - History: read-only listing of submitted jobs
//! - Status: single-actor progress reporting
//!
//! All cluster access goes through the `Cluster` trait of `kubetest-cluster`.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod poller;
pub mod runner;
pub mod status;
pub mod worker;

pub use config::{Backend, HarnessConfig};
pub use context::ProcessContext;
pub use coordinator::{AggregateOutcome, Coordinator, ReporterFactory};
pub use error::{Result, RunnerError};
pub use history::History;
pub use runner::{Runner, RunnerOptions};
pub use status::StatusReporter;
pub use worker::Worker;
