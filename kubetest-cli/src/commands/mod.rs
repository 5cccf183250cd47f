//! Commands module
//!
//! Defines the operator commands and their handlers.

mod get;
mod run;

pub use get::GetCommands;
pub use run::RunCommands;

use anyhow::Result;
use clap::Subcommand;
use kubetest_core::registry::SuiteRegistry;
use kubetest_runner::HarnessConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run tests or benchmarks on the cluster
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Show submitted tests or benchmarks
    Get {
        #[command(subcommand)]
        command: GetCommands,
    },
}

/// Routes the command to its handler
///
/// Returns the exit code for the process.
pub async fn handle_command(
    command: Commands,
    config: &HarnessConfig,
    registry: Arc<SuiteRegistry>,
    cancel: CancellationToken,
) -> Result<i32> {
    match command {
        Commands::Run { command } => {
            run::handle_run_command(command, config, registry, cancel).await
        }
        Commands::Get { command } => get::handle_get_command(command, config).await,
    }
}
