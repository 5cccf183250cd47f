//! Run command handlers
//!
//! Submits a coordinator job for the request and follows it: its output is
//! copied to stdout, then its termination message is printed and its exit
//! code becomes ours.
//!
//! Podman containers cannot reach the podman that started them, so with
//! that backend the coordinator runs here and submits the workers itself.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;
use kubetest_core::domain::job::{JobKind, JobSpec, PullPolicy};
use kubetest_core::registry::SuiteRegistry;
use kubetest_runner::coordinator::log_reporters;
use kubetest_runner::status::TerminalRender;
use kubetest_runner::{
    Backend, Coordinator, HarnessConfig, Runner, RunnerError, RunnerOptions, StatusReporter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Run test suites
    #[command(alias = "suite")]
    Test {
        /// Suite to run; every test suite when omitted
        suite: Option<String>,

        #[command(flatten)]
        args: RunArgs,
    },
    /// Run benchmark suites
    #[command(alias = "benchmark")]
    Bench {
        /// Suite to run; every benchmark suite when omitted
        suite: Option<String>,

        #[command(flatten)]
        args: RunArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Image carrying the test binary
    #[arg(long, env = "KUBETEST_IMAGE")]
    pub image: Option<String>,

    /// Always, IfNotPresent or Never
    #[arg(long = "image-pull-policy")]
    pub pull_policy: Option<PullPolicy>,

    /// Run only this entry of the suite
    #[arg(long = "test")]
    pub test_name: Option<String>,

    /// Platform deadline in seconds; 0 means none
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Delete the coordinator namespace once the result is read
    #[arg(long)]
    pub teardown: bool,
}

pub async fn handle_run_command(
    command: RunCommands,
    config: &HarnessConfig,
    registry: Arc<SuiteRegistry>,
    cancel: CancellationToken,
) -> Result<i32> {
    let (kind, suite, args) = match command {
        RunCommands::Test { suite, args } => (JobKind::Test, suite, args),
        RunCommands::Bench { suite, args } => (JobKind::Benchmark, suite, args),
    };

    let spec = match build_spec(kind, suite, &args) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            return Ok(1);
        }
    };

    let cluster = config::connect(config.backend).await?;
    if config.backend == Backend::Podman {
        info!("Coordinating {} {} on the host", kind, spec.test_id);
        let coordinator = Coordinator::new(
            cluster,
            registry,
            RunnerOptions::workers(config).with_teardown(args.teardown),
            cancel,
        )
        .with_reporters(log_reporters(config.status_interval));
        return Ok(coordinate(&coordinator, &spec).await);
    }

    let options = RunnerOptions::coordinator(config)
        .with_teardown(args.teardown)
        .with_env("KUBETEST_BACKEND", config.backend.as_str());
    let runner = Runner::new(cluster, options, cancel);
    let mut status = StatusReporter::new(TerminalRender::new(), config.status_interval);

    info!("Submitting {} {}", kind, spec.test_id);
    Ok(follow(&runner, &spec, &mut status, &mut tokio::io::stdout()).await)
}

/// Follows one job: its output, then its termination message
///
/// Returns the job's exit code, or 1 when it could not be run.
async fn follow<W>(
    runner: &Runner,
    spec: &JobSpec,
    status: &mut StatusReporter,
    output: &mut W,
) -> i32
where
    W: AsyncWrite + Unpin + Send,
{
    match runner.run(spec, status, output).await {
        Ok(result) => {
            if !result.message.is_empty() {
                let line = format!("{}\n", result.message);
                if let Err(e) = write_line(output, &line).await {
                    warn!("Failed to print result of {}: {}", spec.test_id, e);
                }
            }
            result.exit_code
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            1
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> std::io::Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.flush().await
}

/// Runs the workers from this process; worker output goes to stdout
async fn coordinate(coordinator: &Coordinator, spec: &JobSpec) -> i32 {
    let outcome = coordinator.run(spec, |_| tokio::io::stdout()).await;
    if let Some(e) = &outcome.error {
        eprintln!("{} {}", "✗".red(), e);
    }
    outcome.process_exit_code()
}

/// Builds the request from the command line
fn build_spec(
    kind: JobKind,
    suite: Option<String>,
    args: &RunArgs,
) -> std::result::Result<JobSpec, RunnerError> {
    let image = args
        .image
        .as_deref()
        .filter(|image| !image.trim().is_empty())
        .ok_or_else(|| RunnerError::Configuration("--image is required".to_string()))?;

    let mut spec = JobSpec::new(kind, image)
        .with_pull_policy(args.pull_policy.unwrap_or_default())
        .with_timeout(Duration::from_secs(args.timeout));
    if let Some(suite) = suite {
        spec = spec.with_suite(suite);
    }
    if let Some(test_name) = &args.test_name {
        spec = spec.with_test_name(test_name.clone());
    }

    spec.validate()?;
    Ok(spec)
}
