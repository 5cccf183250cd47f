//! Get command handlers
//!
//! Lists submitted jobs from the cluster as a tab-aligned table.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use kubetest_core::domain::job::{JobKind, JobStatus};
use kubetest_core::domain::record::JobRecord;
use kubetest_runner::{HarnessConfig, History, RunnerError};

use crate::config;

/// Get subcommands
#[derive(Subcommand)]
pub enum GetCommands {
    /// List test jobs
    #[command(alias = "test")]
    Tests {
        /// Test ID or job name
        name: Option<String>,
    },
    /// List benchmark jobs
    #[command(alias = "benchmark", alias = "bench")]
    Benchmarks {
        /// Test ID or job name
        name: Option<String>,
    },
}

const HEADERS: [&str; 6] = [
    "Job Name",
    "Status",
    "Type",
    "Image",
    "Suite/Benchmark",
    "Test/Benchmark Name",
];

pub async fn handle_get_command(command: GetCommands, config: &HarnessConfig) -> Result<i32> {
    let (kind, name) = match command {
        GetCommands::Tests { name } => (JobKind::Test, name),
        GetCommands::Benchmarks { name } => (JobKind::Benchmark, name),
    };

    let cluster = config::connect(config.backend).await?;
    let history = History::new(cluster);

    let records = match name {
        Some(name) => match history.get(kind, &name).await {
            Ok(record) => vec![record],
            Err(RunnerError::WorkloadNotFound(_)) => {
                eprintln!("{} No {} named {}", "✗".red(), kind, name);
                return Ok(1);
            }
            Err(e) => return Err(e.into()),
        },
        None => history.list(kind).await?,
    };

    if records.is_empty() {
        println!("{}", format!("No {} jobs found.", kind).yellow());
    } else {
        print!("{}", render_table(&records));
    }
    Ok(0)
}

fn row(record: &JobRecord) -> [String; 6] {
    [
        record.job_name.clone(),
        record.status.to_string(),
        record.kind_column().to_string(),
        record.image.clone(),
        record.suite_column().to_string(),
        record.test_name_column().to_string(),
    ]
}

/// Columns padded to their widest cell, separated by a tab
fn render_table(records: &[JobRecord]) -> String {
    let rows: Vec<[String; 6]> = records.iter().map(row).collect();

    let mut widths = HEADERS.map(str::len);
    for cells in &rows {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let headers = HEADERS.map(|h| h.bold().to_string());
    let mut table = format_line(&headers, &HEADERS.map(str::len), &widths);
    for (cells, record) in rows.iter().zip(records) {
        let lengths = cells.clone().map(|c| c.chars().count());
        let mut styled = cells.clone();
        styled[1] = colorize_status(record.status, &styled[1]);
        table.push_str(&format_line(&styled, &lengths, &widths));
    }
    table
}

/// Pads by visible length so colour codes do not skew the columns
fn format_line(cells: &[String; 6], lengths: &[usize; 6], widths: &[usize; 6]) -> String {
    let mut line = String::new();
    for (i, cell) in cells.iter().enumerate() {
        line.push_str(cell);
        if i + 1 < cells.len() {
            line.push_str(&" ".repeat(widths[i] - lengths[i]));
            line.push('\t');
        }
    }
    line.push('\n');
    line
}

fn colorize_status(status: JobStatus, text: &str) -> String {
    match status {
        JobStatus::Succeeded => text.green().to_string(),
        JobStatus::Failed => text.red().to_string(),
        JobStatus::Running => text.blue().to_string(),
        JobStatus::Pending => text.yellow().to_string(),
        JobStatus::Unknown => text.dimmed().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(job_name: &str, status: JobStatus, suite: Option<&str>) -> JobRecord {
        JobRecord {
            job_name: job_name.to_string(),
            test_id: job_name.to_string(),
            status,
            kind: Some(JobKind::Test),
            image: "onos/tests:1".to_string(),
            suite: suite.map(str::to_string),
            test_name: None,
            message: None,
            exit_code: None,
            started_at: None,
        }
    }

    #[test]
    fn test_table_is_aligned() {
        colored::control::set_override(false);
        let table = render_table(&[
            record("t-1-smoke", JobStatus::Succeeded, Some("smoke")),
            record("t-22-ha", JobStatus::Running, None),
        ]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Job Name \tStatus   \tType\t"));
        assert!(lines[1].starts_with("t-1-smoke\tSucceeded\ttest\tonos/tests:1\tsmoke"));
        assert!(lines[2].starts_with("t-22-ha  \tRunning  \ttest\t"));

        // Every line has the same tab positions
        let tabs = |line: &str| line.match_indices('\t').map(|(i, _)| i).collect::<Vec<_>>();
        assert_eq!(tabs(lines[0]), tabs(lines[1]));
        assert_eq!(tabs(lines[1]), tabs(lines[2]));
    }
}
