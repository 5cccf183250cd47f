//! Job history
//!
//! Read-only view of submitted jobs for reporting. Units are found by their
//! `type` label only; nothing is mutated or retried.

use kubetest_cluster::Cluster;
use kubetest_core::domain::job::{JobKind, JobStatus};
use kubetest_core::domain::record::JobRecord;
use kubetest_core::domain::workload::{Phase, WorkloadUnit};
use kubetest_core::labels::{
    LabelSelector, SUITE_ANNOTATION, TEST_ID_ANNOTATION, TEST_NAME_ANNOTATION,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, RunnerError};

/// Maps a unit onto the stable reporting status
///
/// A terminated primary container wins over the reported phase.
pub fn status_of(unit: &WorkloadUnit) -> JobStatus {
    if let Some(termination) = unit.termination() {
        return if termination.exit_code == 0 {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };
    }
    match unit.phase {
        Phase::Pending => JobStatus::Pending,
        Phase::Running => JobStatus::Running,
        Phase::Succeeded => JobStatus::Succeeded,
        Phase::Failed => JobStatus::Failed,
        Phase::Unknown => JobStatus::Unknown,
    }
}

pub fn record_of(unit: &WorkloadUnit) -> JobRecord {
    let termination = unit.termination();
    JobRecord {
        job_name: unit.name.clone(),
        test_id: unit
            .test_id()
            .or_else(|| unit.annotation(TEST_ID_ANNOTATION))
            .unwrap_or_default()
            .to_string(),
        status: status_of(unit),
        kind: unit.kind(),
        image: unit.image.clone(),
        suite: unit.annotation(SUITE_ANNOTATION).map(str::to_string),
        test_name: unit.annotation(TEST_NAME_ANNOTATION).map(str::to_string),
        message: termination.map(|t| t.message.clone()),
        exit_code: termination.map(|t| t.exit_code),
        started_at: unit.started_at,
    }
}

pub struct History {
    cluster: Arc<dyn Cluster>,
    namespace: Option<String>,
}

impl History {
    /// History across every namespace
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self {
            cluster,
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub async fn list_tests(&self) -> Result<Vec<JobRecord>> {
        self.list(JobKind::Test).await
    }

    pub async fn list_benchmarks(&self) -> Result<Vec<JobRecord>> {
        self.list(JobKind::Benchmark).await
    }

    pub async fn tests_by_id(&self) -> Result<BTreeMap<String, JobRecord>> {
        Ok(by_id(self.list_tests().await?))
    }

    pub async fn benchmarks_by_id(&self) -> Result<BTreeMap<String, JobRecord>> {
        Ok(by_id(self.list_benchmarks().await?))
    }

    /// Records of `kind`, ordered by job name
    pub async fn list(&self, kind: JobKind) -> Result<Vec<JobRecord>> {
        let units = self
            .cluster
            .list_units(self.namespace.as_deref(), &LabelSelector::for_kind(kind))
            .await?;
        debug!("Found {} {} unit(s)", units.len(), kind);

        let mut records: Vec<JobRecord> = units.iter().map(record_of).collect();
        records.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        Ok(records)
    }

    /// One record, by test ID or job name
    pub async fn get(&self, kind: JobKind, name: &str) -> Result<JobRecord> {
        self.list(kind)
            .await?
            .into_iter()
            .find(|r| r.test_id == name || r.job_name == name)
            .ok_or_else(|| RunnerError::WorkloadNotFound(name.to_string()))
    }
}

fn by_id(records: Vec<JobRecord>) -> BTreeMap<String, JobRecord> {
    records
        .into_iter()
        .map(|r| (r.test_id.clone(), r))
        .collect()
}
