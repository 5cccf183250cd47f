//! Configuration module
//!
//! Resolves the harness configuration and connects the selected backend.

use anyhow::{Context, Result};
use kubetest_cluster::{Cluster, KubeCluster, PodmanCluster};
use kubetest_runner::{Backend, HarnessConfig};
use std::sync::Arc;
use tracing::debug;

/// Environment configuration, overridden by the global CLI flags
pub fn resolve(cluster: Option<String>, backend: Option<Backend>) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::from_env().context("Failed to load configuration")?;
    if let Some(namespace) = cluster {
        config = config.with_namespace(namespace);
    }
    if let Some(backend) = backend {
        config = config.with_backend(backend);
    }
    config.validate()?;
    debug!("Using {:?}", config);
    Ok(config)
}

/// Connects the configured backend
pub async fn connect(backend: Backend) -> Result<Arc<dyn Cluster>> {
    let cluster: Arc<dyn Cluster> = match backend {
        Backend::Kube => Arc::new(
            KubeCluster::connect()
                .await
                .context("Failed to connect to Kubernetes")?,
        ),
        Backend::Podman => Arc::new(
            PodmanCluster::connect()
                .await
                .context("Failed to set up podman backend")?,
        ),
    };
    Ok(cluster)
}
