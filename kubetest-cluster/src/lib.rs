//! Kubetest Cluster
//!
//! The seam between orchestration and the platform that actually runs
//! workloads.
//!
//! Everything the runner needs from a cluster is expressed by the [`Cluster`]
//! trait: create a namespace and the access objects a coordinator needs,
//! publish a configuration entry, submit a workload, list units by label,
//! stream a unit's output and tear a namespace down.
//!
//! Backends:
//! - [`KubeCluster`]: a real Kubernetes API server
//! - [`PodmanCluster`]: local containers, for running suites without a cluster
//! - [`MemoryCluster`]: a scripted in-process simulation used by tests
//!
//! # Example
//!
//! ```no_run
//! use kubetest_cluster::{Cluster, KubeCluster};
//! use kubetest_core::labels::LabelSelector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cluster = KubeCluster::connect().await?;
//!     let units = cluster.list_units(Some("kubetest"), &LabelSelector::for_test("t-1")).await?;
//!     println!("{} unit(s)", units.len());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod kubernetes;
pub mod memory;
pub mod podman;

pub use error::{ClusterError, Result};
pub use kubernetes::KubeCluster;
pub use memory::{MemoryCluster, Script};
pub use podman::PodmanCluster;

use async_trait::async_trait;
use kubetest_core::domain::workload::{WorkloadSpec, WorkloadUnit};
use kubetest_core::labels::LabelSelector;
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Name of the container that runs the test process inside a unit
pub const PRIMARY_CONTAINER: &str = "test";

/// Live output of a unit; ends when the unit's process exits
pub type OutputStream = Pin<Box<dyn AsyncRead + Send>>;

/// Objects that grant a coordinator the right to manage workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessObject {
    Role,
    RoleBinding,
    ServiceAccount,
}

impl AccessObject {
    /// Creation order
    pub const ALL: [AccessObject; 3] = [
        AccessObject::Role,
        AccessObject::RoleBinding,
        AccessObject::ServiceAccount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessObject::Role => "role",
            AccessObject::RoleBinding => "role binding",
            AccessObject::ServiceAccount => "service account",
        }
    }
}

impl fmt::Display for AccessObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform operations used by the runner
///
/// Creation methods return [`ClusterError::AlreadyExists`] when the object is
/// already present; callers decide whether that matters.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Short backend name, used in logs
    fn name(&self) -> &'static str;

    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Creates one access object for `account` in `namespace`
    async fn create_access(&self, namespace: &str, account: &str, object: AccessObject)
    -> Result<()>;

    /// Creates the configuration resource if missing, then sets `key` to `document`
    ///
    /// Entries under other keys are left untouched.
    async fn upsert_config(
        &self,
        namespace: &str,
        resource: &str,
        key: &str,
        document: &str,
    ) -> Result<()>;

    /// Submits a single-replica, zero-restart workload
    async fn submit(&self, workload: &WorkloadSpec) -> Result<()>;

    /// Lists units matching `selector`, in `namespace` or everywhere
    async fn list_units(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<WorkloadUnit>>;

    /// Follows the primary container output of a unit
    async fn stream_output(&self, namespace: &str, unit: &str) -> Result<OutputStream>;

    async fn delete_namespace(&self, namespace: &str) -> Result<()>;
}
