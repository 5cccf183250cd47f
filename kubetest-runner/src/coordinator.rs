//! Coordinator
//!
//! Expands one request into a job per suite and runs them concurrently.
//!
//! Each job runs in its own task and reports into one of two channels, both
//! buffered to the job count: errors, or exit codes. A supervisor task holds
//! the original senders, waits for every job task, then drops them so both
//! drains terminate.
//!
//! Aggregation takes the first error from any job as the outcome and returns
//! at once, cancelling the local waits of the jobs still in flight. Their
//! remote workloads keep running, bounded by their platform deadline. With
//! no error, the outcome is the first non-zero exit code received, or 0.

use kubetest_cluster::Cluster;
use kubetest_core::domain::job::JobSpec;
use kubetest_core::registry::SuiteRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RunnerError};
use crate::runner::{Runner, RunnerOptions};
use crate::status::{LogRender, StatusReporter};

/// Builds the status reporter of each job
pub type ReporterFactory = Arc<dyn Fn(&JobSpec) -> StatusReporter + Send + Sync>;

/// Reduced outcome of a coordinated run
///
/// `error` set means the run failed whatever `exit_code` says.
#[derive(Debug)]
pub struct AggregateOutcome {
    pub error: Option<RunnerError>,
    pub exit_code: i32,
}

impl AggregateOutcome {
    pub fn failed(error: RunnerError) -> Self {
        Self {
            error: Some(error),
            exit_code: 1,
        }
    }

    pub fn exited(exit_code: i32) -> Self {
        Self {
            error: None,
            exit_code,
        }
    }

    /// Exit code for the calling process
    pub fn process_exit_code(&self) -> i32 {
        if self.error.is_some() {
            1
        } else {
            self.exit_code
        }
    }

    pub fn success(&self) -> bool {
        self.process_exit_code() == 0
    }
}

pub struct Coordinator {
    cluster: Arc<dyn Cluster>,
    registry: Arc<SuiteRegistry>,
    options: RunnerOptions,
    cancel: CancellationToken,
    reporters: ReporterFactory,
}

impl Coordinator {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        registry: Arc<SuiteRegistry>,
        options: RunnerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            registry,
            options,
            cancel,
            reporters: log_reporters(Duration::from_millis(500)),
        }
    }

    /// Replaces how each job's status reporter is built
    pub fn with_reporters(mut self, reporters: ReporterFactory) -> Self {
        self.reporters = reporters;
        self
    }

    /// Expands `request` into concrete jobs
    ///
    /// Without a suite, one job per registered suite of the requested kind,
    /// in suite name order. With a suite, exactly one job. Every job gets the
    /// test ID `<base>-<suite>`, so it never shares an ID with the request.
    pub fn expand(&self, request: &JobSpec) -> Result<Vec<JobSpec>> {
        let jobs = match &request.suite {
            Some(suite) => {
                if self.registry.get(request.kind, suite).is_none() {
                    return Err(RunnerError::Configuration(format!(
                        "unknown {} suite '{}'",
                        request.kind, suite
                    )));
                }
                vec![request.for_suite(suite)]
            }
            None => {
                let names = self.registry.suite_names(request.kind);
                if names.is_empty() {
                    return Err(RunnerError::Configuration(format!(
                        "no {} suites registered",
                        request.kind
                    )));
                }
                names
                    .into_iter()
                    .map(|suite| request.for_suite(suite))
                    .collect()
            }
        };

        let mut seen = HashSet::new();
        for job in &jobs {
            job.validate()?;
            if !seen.insert(job.test_id.as_str()) {
                return Err(RunnerError::Configuration(format!(
                    "duplicate test ID {}",
                    job.test_id
                )));
            }
        }
        Ok(jobs)
    }

    /// Runs every job of `request` and reduces their outcomes
    ///
    /// `sink` provides the output sink of each job.
    pub async fn run<W, F>(&self, request: &JobSpec, sink: F) -> AggregateOutcome
    where
        F: Fn(&JobSpec) -> W,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let jobs = match self.expand(request) {
            Ok(jobs) => jobs,
            Err(e) => return AggregateOutcome::failed(e),
        };
        let count = jobs.len();
        info!(
            "Running {} {} job(s) for {}",
            count, request.kind, request.test_id
        );

        let cancel = self.cancel.child_token();
        let (error_tx, mut error_rx) = mpsc::channel::<RunnerError>(count);
        let (exit_tx, mut exit_rx) = mpsc::channel::<i32>(count);

        let mut handles = Vec::with_capacity(count);
        for spec in jobs {
            let runner = Runner::new(
                Arc::clone(&self.cluster),
                self.options.clone(),
                cancel.clone(),
            );
            let mut status = (self.reporters)(&spec);
            let mut output = sink(&spec);
            let error_tx = error_tx.clone();
            let exit_tx = exit_tx.clone();
            let test_id = spec.test_id.clone();

            let handle = tokio::spawn(async move {
                match runner.run(&spec, &mut status, &mut output).await {
                    Ok(result) => {
                        info!(
                            "Job {} exited with {}: {}",
                            spec.test_id, result.exit_code, result.message
                        );
                        let _ = exit_tx.send(result.exit_code).await;
                    }
                    Err(e) => {
                        error!("Job {} failed: {}", spec.test_id, e);
                        let _ = error_tx
                            .send(RunnerError::Aggregation {
                                test_id: spec.test_id.clone(),
                                source: Box::new(e),
                            })
                            .await;
                    }
                }
            });
            handles.push((test_id, handle));
        }

        tokio::spawn(async move {
            for (test_id, handle) in handles {
                if let Err(e) = handle.await {
                    warn!("Job task {} panicked: {}", test_id, e);
                    let _ = error_tx
                        .send(RunnerError::Aggregation {
                            test_id,
                            source: Box::new(RunnerError::Task(e.to_string())),
                        })
                        .await;
                }
            }
            debug!("All job tasks finished");
            drop(error_tx);
            drop(exit_tx);
        });

        if let Some(err) = error_rx.recv().await {
            cancel.cancel();
            return AggregateOutcome::failed(err);
        }

        let mut exit_code = 0;
        while let Some(code) = exit_rx.recv().await {
            if exit_code == 0 && code != 0 {
                exit_code = code;
            }
        }
        AggregateOutcome::exited(exit_code)
    }
}

/// Status as log lines prefixed with each job's test ID
pub fn log_reporters(interval: Duration) -> ReporterFactory {
    Arc::new(move |spec: &JobSpec| {
        StatusReporter::new(LogRender::new(spec.test_id.clone()), interval)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubetest_cluster::MemoryCluster;
    use kubetest_core::domain::job::JobKind;
    use kubetest_core::registry::{Entry, EntryFuture};

    use crate::config::HarnessConfig;

    fn pass() -> EntryFuture {
        Box::pin(async { Ok(()) })
    }

    fn coordinator(registry: SuiteRegistry) -> Coordinator {
        let options = RunnerOptions {
            poll_interval: Duration::from_millis(1),
            ..RunnerOptions::workers(&HarnessConfig::default())
        };
        Coordinator::new(
            Arc::new(MemoryCluster::new()),
            Arc::new(registry),
            options,
            CancellationToken::new(),
        )
    }

    fn registry() -> SuiteRegistry {
        SuiteRegistry::builder()
            .test_suite("smoke", [Entry::new("ping", pass)])
            .test_suite("ha", [Entry::new("failover", pass)])
            .benchmark_suite("map", [Entry::new("put", pass)])
            .build()
    }

    #[test]
    fn test_expand_all_suites_in_name_order() {
        let request = JobSpec::new(JobKind::Test, "img").with_test_id("t-ab12");
        let jobs = coordinator(registry()).expand(&request).unwrap();

        let ids: Vec<&str> = jobs.iter().map(|j| j.test_id.as_str()).collect();
        assert_eq!(ids, vec!["t-ab12-ha", "t-ab12-smoke"]);
        assert_eq!(jobs[0].suite.as_deref(), Some("ha"));
    }

    #[test]
    fn test_expand_single_suite() {
        let request = JobSpec::new(JobKind::Benchmark, "img")
            .with_test_id("b-1")
            .with_suite("map");
        let jobs = coordinator(registry()).expand(&request).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].test_id, "b-1-map");
        assert_eq!(jobs[0].suite.as_deref(), Some("map"));
    }

    #[test]
    fn test_expand_single_suite_keeps_test_filter() {
        let request = JobSpec::new(JobKind::Test, "img")
            .with_test_id("t-1")
            .with_suite("smoke")
            .with_test_name("ping");
        let jobs = coordinator(registry()).expand(&request).unwrap();
        assert_eq!(jobs[0].test_id, "t-1-smoke");
        assert_eq!(jobs[0].test_name.as_deref(), Some("ping"));
    }

    #[test]
    fn test_expand_rejects_unknown_suite() {
        let request = JobSpec::new(JobKind::Test, "img")
            .with_test_id("t-1")
            .with_suite("map");
        let err = coordinator(registry()).expand(&request).unwrap_err();
        assert!(matches!(err, RunnerError::Configuration(_)));
    }

    #[test]
    fn test_expand_rejects_empty_registry() {
        let request = JobSpec::new(JobKind::Benchmark, "img").with_test_id("b-1");
        let err = coordinator(SuiteRegistry::default()).expand(&request).unwrap_err();
        assert!(matches!(err, RunnerError::Configuration(_)));
    }

    #[test]
    fn test_outcome_exit_code() {
        assert_eq!(AggregateOutcome::exited(3).process_exit_code(), 3);
        assert!(AggregateOutcome::exited(0).success());

        let failed = AggregateOutcome {
            error: Some(RunnerError::Cancelled),
            exit_code: 0,
        };
        assert_eq!(failed.process_exit_code(), 1);
        assert!(!failed.success());
    }
}
