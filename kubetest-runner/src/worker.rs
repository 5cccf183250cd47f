//! Worker
//!
//! Runs inside a worker job: loads the job descriptor, resolves the suite in
//! the registry and runs its entries in order, one line per entry. The
//! summary goes to the termination log, where the coordinator reads it.

use colored::Colorize;
use kubetest_core::domain::job::{JobKind, JobSpec};
use kubetest_core::dto::descriptor::JobDescriptor;
use kubetest_core::registry::{Entry, SuiteRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::{Result, RunnerError};

/// Outcome of one entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOutcome {
    pub name: String,
    pub elapsed: Duration,
    /// Failure message, if the entry failed
    pub error: Option<String>,
}

impl EntryOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a whole suite run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerReport {
    pub outcomes: Vec<EntryOutcome>,
}

impl WorkerReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    /// Termination message
    pub fn summary(&self) -> String {
        format!("{} passed, {} failed", self.passed(), self.failed())
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed() == 0 { 0 } else { 1 }
    }
}

pub struct Worker {
    registry: Arc<SuiteRegistry>,
    config_path: PathBuf,
    termination_log: PathBuf,
}

impl Worker {
    pub fn new(registry: Arc<SuiteRegistry>, config: &HarnessConfig) -> Self {
        Self {
            registry,
            config_path: config.config_path.clone(),
            termination_log: config.termination_log.clone(),
        }
    }

    /// Loads the descriptor mounted into the unit
    pub async fn load_spec(&self) -> Result<JobSpec> {
        load_spec(&self.config_path).await
    }

    /// Runs the job described by the mounted descriptor
    ///
    /// Returns the process exit code: 0 when every entry passed.
    pub async fn run<W>(&self, output: &mut W) -> Result<i32>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let spec = self.load_spec().await?;
        let report = self.run_spec(&spec, output).await?;
        let summary = report.summary();

        info!("Job {} finished: {}", spec.test_id, summary);
        write_termination_log(&self.termination_log, &summary).await;
        Ok(report.exit_code())
    }

    /// Runs the entries `spec` selects, writing one line per entry
    pub async fn run_spec<W>(&self, spec: &JobSpec, output: &mut W) -> Result<WorkerReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let suite_name = spec.suite.as_deref().ok_or_else(|| {
            RunnerError::Configuration(format!("job {} names no suite", spec.test_id))
        })?;
        let suite = self.registry.get(spec.kind, suite_name).ok_or_else(|| {
            RunnerError::Configuration(format!("unknown {} suite '{}'", spec.kind, suite_name))
        })?;

        let entries: Vec<&Entry> = match &spec.test_name {
            Some(name) => vec![suite.entry(name).ok_or_else(|| {
                RunnerError::Configuration(format!(
                    "suite '{}' has no entry '{}'",
                    suite_name, name
                ))
            })?],
            None => suite.entries().iter().collect(),
        };

        let mut report = WorkerReport::default();
        for entry in entries {
            let outcome = run_entry(entry).await;
            let line = format_outcome(&outcome, spec.kind);
            output
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .map_err(|source| RunnerError::Stream {
                    test_id: spec.test_id.clone(),
                    source,
                })?;
            report.outcomes.push(outcome);
        }
        output.flush().await.map_err(|source| RunnerError::Stream {
            test_id: spec.test_id.clone(),
            source,
        })?;

        Ok(report)
    }
}

/// Reads and parses a descriptor file
pub async fn load_spec(path: &Path) -> Result<JobSpec> {
    let document = tokio::fs::read_to_string(path).await.map_err(|e| {
        RunnerError::Configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(JobDescriptor::from_document(&document)?.into())
}

/// Writes the termination message; failures are only logged
pub async fn write_termination_log(path: &Path, message: &str) {
    if let Err(e) = tokio::fs::write(path, message).await {
        warn!(
            "Failed to write termination message to {}: {}",
            path.display(),
            e
        );
    }
}

/// Runs one entry in its own task so a panic fails only that entry
async fn run_entry(entry: &Entry) -> EntryOutcome {
    let started = Instant::now();
    let error = match tokio::spawn(entry.run()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{:#}", e)),
        Err(e) => Some(format!("panicked: {}", e)),
    };
    EntryOutcome {
        name: entry.name().to_string(),
        elapsed: started.elapsed(),
        error,
    }
}

fn format_outcome(outcome: &EntryOutcome, kind: JobKind) -> String {
    let mark = if outcome.passed() {
        "✓".green()
    } else {
        "✗".red()
    };
    let mut line = format!("{} {}", mark, outcome.name);
    if kind == JobKind::Benchmark {
        line.push_str(&format!(" ({:.2?})", outcome.elapsed));
    }
    if let Some(error) = &outcome.error {
        line.push_str(&format!(": {}", error));
    }
    line
}
