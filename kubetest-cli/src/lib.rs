//! Kubetest CLI
//!
//! Entrypoint shared by the `kubetest` binary and by test images, which call
//! [`main_with`] with their own suite registry. The process context decides
//! what runs:
//! - operator: parses the command line, submits a coordinator job and follows it;
//!   with the podman backend the coordinator runs in this process instead
//! - coordinator: runs one worker job per suite and aggregates their exits
//! - worker: runs the suite's entries in-process

mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use kubetest_core::registry::SuiteRegistry;
use kubetest_runner::coordinator::log_reporters;
use kubetest_runner::worker::{load_spec, write_termination_log};
use kubetest_runner::{Backend, Coordinator, HarnessConfig, ProcessContext, RunnerOptions, Worker};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{Commands, handle_command};

#[derive(Parser)]
#[command(name = "kubetest")]
#[command(about = "Run test and benchmark suites on a cluster", long_about = None)]
struct Cli {
    /// Namespace the coordinator job runs in
    #[arg(long = "cluster", global = true)]
    cluster: Option<String>,

    /// Cluster backend: kube or podman
    #[arg(long, global = true)]
    backend: Option<Backend>,

    #[command(subcommand)]
    command: Commands,
}

/// Runs the process in whatever context it was started in
///
/// Returns the exit code; the caller exits with it.
pub async fn main_with(registry: SuiteRegistry) -> i32 {
    let context = ProcessContext::from_env();
    init_tracing(context.as_ref().map(|c| c.in_cluster()).unwrap_or(false));

    let result = match context {
        Ok(context) => run(context, registry).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red(), e);
            1
        }
    }
}

async fn run(context: ProcessContext, registry: SuiteRegistry) -> Result<i32> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; submitted jobs keep running on the cluster");
            interrupt.cancel();
        }
    });

    match context {
        ProcessContext::Operator => {
            let cli = Cli::parse();
            let config = config::resolve(cli.cluster, cli.backend)?;
            handle_command(cli.command, &config, Arc::new(registry), cancel).await
        }
        ProcessContext::Coordinator => {
            let config = config::resolve(None, None)?;
            run_coordinator(registry, &config, cancel).await
        }
        ProcessContext::Worker => {
            let config = config::resolve(None, None)?;
            run_worker(registry, &config).await
        }
    }
}

/// In-cluster: one worker job per suite, first error or non-zero exit wins
async fn run_coordinator(
    registry: SuiteRegistry,
    config: &HarnessConfig,
    cancel: CancellationToken,
) -> Result<i32> {
    let spec = load_spec(&config.config_path)
        .await
        .context("Failed to load job descriptor")?;
    info!("Coordinating {} {}", spec.kind, spec.test_id);

    let cluster = config::connect(config.backend).await?;
    let coordinator = Coordinator::new(
        cluster,
        Arc::new(registry),
        RunnerOptions::workers(config),
        cancel,
    )
    .with_reporters(log_reporters(config.status_interval));

    let outcome = coordinator.run(&spec, |_| tokio::io::stdout()).await;
    let message = match &outcome.error {
        Some(e) => {
            error!("Run {} failed: {}", spec.test_id, e);
            e.to_string()
        }
        None if outcome.exit_code == 0 => "all jobs passed".to_string(),
        None => format!("a job exited with code {}", outcome.exit_code),
    };
    write_termination_log(&config.termination_log, &message).await;
    Ok(outcome.process_exit_code())
}

/// In-cluster: runs the suite's entries in this process
async fn run_worker(registry: SuiteRegistry, config: &HarnessConfig) -> Result<i32> {
    let worker = Worker::new(Arc::new(registry), config);
    match worker.run(&mut tokio::io::stdout()).await {
        Ok(code) => Ok(code),
        Err(e) => {
            write_termination_log(&config.termination_log, &e.to_string()).await;
            Err(e.into())
        }
    }
}

/// Logs go to stderr; stdout carries job output and tables
fn init_tracing(in_cluster: bool) {
    let default_filter = if in_cluster { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
