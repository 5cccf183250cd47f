//! History record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::{JobKind, JobStatus};

/// Reporting view of one workload unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Name of the unit on the platform
    pub job_name: String,
    pub test_id: String,
    pub status: JobStatus,
    pub kind: Option<JobKind>,
    pub image: String,
    pub suite: Option<String>,
    pub test_name: Option<String>,
    /// Termination message, once terminated
    pub message: Option<String>,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Column value for the suite; empty when the job covered every suite
    pub fn suite_column(&self) -> &str {
        self.suite.as_deref().unwrap_or("")
    }

    pub fn test_name_column(&self) -> &str {
        self.test_name.as_deref().unwrap_or("")
    }

    pub fn kind_column(&self) -> &str {
        self.kind.map(|k| k.as_str()).unwrap_or("")
    }
}
