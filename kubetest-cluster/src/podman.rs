//! Podman backend
//!
//! Runs each workload as a detached local container so suites can be
//! exercised without a cluster:
//! - Namespaces are directories under a state directory
//! - Configuration entries are files mounted read-only into the container
//! - Labels carry the namespace, and annotations under a prefix
//! - A mounted directory stands in for the termination log
//!
//! There is no API server reachable from inside these containers, so the
//! coordinator runs on the host, in the operator process.

use async_trait::async_trait;
use chrono::DateTime;
use kubetest_core::domain::job::PullPolicy;
use kubetest_core::domain::workload::{
    ContainerState, ContainerStatus, Phase, Termination, WorkloadSpec, WorkloadUnit,
};
use kubetest_core::labels::{LabelSelector, TERMINATION_LOG_ENV};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{ClusterError, Result};
use crate::{AccessObject, Cluster, OutputStream, PRIMARY_CONTAINER};

const NAMESPACE_LABEL: &str = "kubetest.namespace";
const ANNOTATION_PREFIX: &str = "kubetest.annotation.";
const TERMINATION_MOUNT: &str = "/kubetest/termination";
const TERMINATION_FILE: &str = "message";

/// Checks if podman is installed and available
pub async fn check_podman_available() -> Result<()> {
    let output = Command::new("podman")
        .arg("--version")
        .output()
        .await
        .map_err(|e| {
            ClusterError::CommandFailed(format!(
                "Failed to execute 'podman --version'. Is podman installed? {}",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(ClusterError::CommandFailed(
            "Podman is not working correctly".to_string(),
        ));
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Podman is available: {}", version.trim());
    Ok(())
}

/// Runs podman and returns its stdout
async fn podman(args: &[String]) -> Result<String> {
    let output = Command::new("podman")
        .args(args)
        .output()
        .await
        .map_err(|e| ClusterError::CommandFailed(format!("Failed to execute podman: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !stderr.trim().is_empty() {
        debug!(
            "podman {} stderr: {}",
            args.first().map(String::as_str).unwrap_or(""),
            stderr.trim()
        );
    }

    if !output.status.success() {
        let exit_code = output.status.code().unwrap_or(-1);
        let error_msg = format!(
            "podman {} failed: exit_code={}, stderr='{}'",
            args.join(" "),
            exit_code,
            stderr.trim()
        );
        error!("{}", error_msg);
        return Err(ClusterError::CommandFailed(error_msg));
    }

    Ok(stdout)
}

fn pull_flag(policy: PullPolicy) -> &'static str {
    match policy {
        PullPolicy::Always => "always",
        PullPolicy::IfNotPresent => "missing",
        PullPolicy::Never => "never",
    }
}

/// Resolves once the process behind a stream has exited
type ExitCheck = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Output of a following process
///
/// End of output is only reported once the process exited cleanly; a
/// failed exit turns into a read error. Dropping the stream early drops
/// the process with it.
struct FollowedOutput<R> {
    reader: R,
    exit: Option<ExitCheck>,
}

impl<R> FollowedOutput<R> {
    fn new(reader: R, exit: ExitCheck) -> Self {
        Self {
            reader,
            exit: Some(exit),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for FollowedOutput<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let filled = buf.filled().len();
        ready!(Pin::new(&mut this.reader).poll_read(cx, buf))?;
        if buf.filled().len() > filled || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let Some(exit) = this.exit.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(exit.as_mut().poll(cx));
        this.exit = None;
        Poll::Ready(result)
    }
}

/// One entry of `podman ps --format json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsEntry {
    names: Vec<String>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    state: String,
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    image: String,
    #[serde(default)]
    started_at: i64,
}

/// Cluster backend running workloads as local podman containers
#[derive(Debug, Clone)]
pub struct PodmanCluster {
    state_dir: PathBuf,
}

impl PodmanCluster {
    /// Checks podman and uses the default state directory
    pub async fn connect() -> Result<Self> {
        check_podman_available().await?;
        let base = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Ok(Self::with_state_dir(base.join("kubetest")))
    }

    /// Uses `state_dir` for namespaces, config entries and termination logs
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.state_dir.join(namespace)
    }

    fn config_file(&self, namespace: &str, resource: &str, key: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join("config")
            .join(resource)
            .join(key)
    }

    fn termination_dir(&self, namespace: &str, container: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join("termination")
            .join(container)
    }

    /// Container names are global, so the namespace is folded in
    fn container_name(namespace: &str, name: &str) -> String {
        format!("{}-{}", namespace, name)
    }

    async fn require_namespace(&self, namespace: &str) -> Result<()> {
        if tokio::fs::try_exists(self.namespace_dir(namespace)).await? {
            Ok(())
        } else {
            Err(ClusterError::not_found("namespace", namespace))
        }
    }

    async fn read_termination_message(&self, namespace: &str, container: &str) -> String {
        let path = self
            .termination_dir(namespace, container)
            .join(TERMINATION_FILE);
        tokio::fs::read_to_string(&path)
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    async fn unit_from_entry(&self, entry: PsEntry) -> Option<WorkloadUnit> {
        let name = entry.names.into_iter().next()?;
        let mut labels = BTreeMap::new();
        let mut annotations = BTreeMap::new();
        let mut namespace = String::new();
        for (key, value) in entry.labels.unwrap_or_default() {
            if key == NAMESPACE_LABEL {
                namespace = value;
            } else if let Some(annotation) = key.strip_prefix(ANNOTATION_PREFIX) {
                annotations.insert(annotation.to_string(), value);
            } else {
                labels.insert(key, value);
            }
        }

        let (phase, state, ready) = match entry.state.as_str() {
            "created" | "configured" | "initialized" => {
                (Phase::Pending, ContainerState::Waiting { reason: None }, false)
            }
            "running" | "paused" | "stopping" => (Phase::Running, ContainerState::Running, true),
            "exited" | "stopped" => {
                let message = self.read_termination_message(&namespace, &name).await;
                let phase = if entry.exit_code == 0 {
                    Phase::Succeeded
                } else {
                    Phase::Failed
                };
                let termination = Termination {
                    exit_code: entry.exit_code,
                    message,
                };
                (phase, ContainerState::Terminated(termination), false)
            }
            other => (
                Phase::Unknown,
                ContainerState::Waiting {
                    reason: Some(other.to_string()),
                },
                false,
            ),
        };

        Some(WorkloadUnit {
            name,
            namespace,
            labels,
            annotations,
            image: entry.image,
            phase,
            containers: vec![ContainerStatus {
                name: PRIMARY_CONTAINER.to_string(),
                ready,
                state,
            }],
            started_at: if entry.started_at > 0 {
                DateTime::from_timestamp(entry.started_at, 0)
            } else {
                None
            },
        })
    }

    fn run_args(&self, workload: &WorkloadSpec, container: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            container.to_string(),
            format!("--pull={}", pull_flag(workload.pull_policy)),
            "--label".to_string(),
            format!("{}={}", NAMESPACE_LABEL, workload.namespace),
        ];
        for (key, value) in &workload.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &workload.annotations {
            args.push("--label".to_string());
            args.push(format!("{}{}={}", ANNOTATION_PREFIX, key, value));
        }
        for (key, value) in &workload.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("-e".to_string());
        args.push(format!(
            "{}={}/{}",
            TERMINATION_LOG_ENV, TERMINATION_MOUNT, TERMINATION_FILE
        ));
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:ro",
            self.config_file(&workload.namespace, &workload.config.resource, &workload.config.key)
                .display(),
            workload.config.path
        ));
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            self.termination_dir(&workload.namespace, container).display(),
            TERMINATION_MOUNT
        ));
        if let Some(deadline) = workload.active_deadline {
            args.push(format!("--timeout={}", deadline.as_secs()));
        }
        args.push(workload.image.clone());
        args
    }
}

async fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl Cluster for PodmanCluster {
    fn name(&self) -> &'static str {
        "podman"
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        if tokio::fs::try_exists(&dir).await? {
            return Err(ClusterError::already_exists("namespace", namespace));
        }
        tokio::fs::create_dir_all(&dir).await?;
        info!("Created namespace {} at {}", namespace, dir.display());
        Ok(())
    }

    async fn create_access(
        &self,
        namespace: &str,
        account: &str,
        object: AccessObject,
    ) -> Result<()> {
        // Local containers run with the invoking user's rights
        self.require_namespace(namespace).await?;
        debug!("No {} needed for {}/{} on podman", object, namespace, account);
        Ok(())
    }

    async fn upsert_config(
        &self,
        namespace: &str,
        resource: &str,
        key: &str,
        document: &str,
    ) -> Result<()> {
        self.require_namespace(namespace).await?;
        let path = self.config_file(namespace, resource, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomically(&path, document).await?;
        debug!("Stored entry {} in {}/{}", key, namespace, resource);
        Ok(())
    }

    async fn submit(&self, workload: &WorkloadSpec) -> Result<()> {
        self.require_namespace(&workload.namespace).await?;
        let container = Self::container_name(&workload.namespace, &workload.name);

        let existing = self
            .list_units(
                Some(&workload.namespace),
                &LabelSelector::new(),
            )
            .await?;
        if existing.iter().any(|u| u.name == container) {
            return Err(ClusterError::already_exists("container", container));
        }

        tokio::fs::create_dir_all(self.termination_dir(&workload.namespace, &container)).await?;

        let id = podman(&self.run_args(workload, &container)).await?;
        info!(
            "Container {} started successfully with ID: {}",
            container,
            id.trim()
        );
        Ok(())
    }

    async fn list_units(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<WorkloadUnit>> {
        let mut args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];
        if let Some(ns) = namespace {
            args.push("--filter".to_string());
            args.push(format!("label={}={}", NAMESPACE_LABEL, ns));
        } else {
            args.push("--filter".to_string());
            args.push(format!("label={}", NAMESPACE_LABEL));
        }
        for (key, value) in selector.requirements() {
            args.push("--filter".to_string());
            args.push(format!("label={}={}", key, value));
        }

        let stdout = podman(&args).await?;
        let entries: Vec<PsEntry> = if stdout.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&stdout)
                .map_err(|e| ClusterError::ParseError(format!("podman ps output: {}", e)))?
        };

        let mut units = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(unit) = self.unit_from_entry(entry).await {
                // podman filters are the first pass; labels decide
                if selector.matches(&unit.labels) {
                    units.push(unit);
                }
            }
        }
        Ok(units)
    }

    async fn stream_output(&self, namespace: &str, unit: &str) -> Result<OutputStream> {
        debug!("Following logs of {}/{}", namespace, unit);
        let mut child = Command::new("podman")
            .arg("logs")
            .arg("-f")
            .arg(unit)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClusterError::CommandFailed(format!("Failed to execute podman logs: {}", e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClusterError::CommandFailed("podman logs has no stdout".to_string()))?;

        let unit = unit.to_string();
        let exit: ExitCheck = Box::pin(async move {
            let status = child.wait().await?;
            if status.success() {
                Ok(())
            } else {
                Err(io::Error::other(format!(
                    "podman logs {} failed: exit_code={}",
                    unit,
                    status.code().unwrap_or(-1)
                )))
            }
        });
        Ok(Box::pin(FollowedOutput::new(stdout, exit)))
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        self.require_namespace(namespace).await?;
        let units = self.list_units(Some(namespace), &LabelSelector::new()).await?;

        info!("Cleaning up {} container(s) in {}", units.len(), namespace);
        for unit in &units {
            let args = ["rm".to_string(), "-f".to_string(), unit.name.clone()];
            match podman(&args).await {
                Ok(_) => debug!("Container {} removed", unit.name),
                Err(e) => warn!("Failed to remove container {}: {}", unit.name, e),
            }
        }

        tokio::fs::remove_dir_all(self.namespace_dir(namespace)).await?;
        info!("Deleted namespace {}", namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubetest_core::domain::job::JobKind;
    use kubetest_core::domain::workload::ConfigMount;
    use kubetest_core::labels::job_labels;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn workload() -> WorkloadSpec {
        WorkloadSpec {
            name: "t-1".to_string(),
            namespace: "kubetest".to_string(),
            labels: job_labels(JobKind::Test, "t-1"),
            annotations: BTreeMap::from([("suite".to_string(), "smoke".to_string())]),
            image: "onos/tests:1".to_string(),
            pull_policy: PullPolicy::IfNotPresent,
            env: BTreeMap::from([("TEST_CONTEXT".to_string(), "worker".to_string())]),
            service_account: "kubetest".to_string(),
            config: ConfigMount {
                resource: "tests".to_string(),
                key: "t-1".to_string(),
                path: "/config/config.json".to_string(),
            },
            active_deadline: Some(Duration::from_secs(30)),
        }
    }

    #[test]
    fn test_run_args() {
        let cluster = PodmanCluster::with_state_dir("/run/kubetest");
        let args = cluster.run_args(&workload(), "kubetest-t-1");

        assert!(args.contains(&"--pull=missing".to_string()));
        assert!(args.contains(&"type=test".to_string()));
        assert!(args.contains(&"kubetest.namespace=kubetest".to_string()));
        assert!(args.contains(&"kubetest.annotation.suite=smoke".to_string()));
        assert!(args.contains(&"TEST_CONTEXT=worker".to_string()));
        let mount = "/run/kubetest/kubetest/config/tests/t-1:/config/config.json:ro";
        assert!(args.contains(&mount.to_string()));
        assert!(args.contains(&"--timeout=30".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("onos/tests:1"));
    }

    #[tokio::test]
    async fn test_unit_from_exited_entry() {
        let dir = std::env::temp_dir().join(format!("kubetest-podman-{}", std::process::id()));
        let cluster = PodmanCluster::with_state_dir(&dir);
        let termination = cluster.termination_dir("kubetest", "kubetest-t-1");
        tokio::fs::create_dir_all(&termination).await.unwrap();
        tokio::fs::write(termination.join(TERMINATION_FILE), "3 passed, 1 failed\n")
            .await
            .unwrap();

        let entry: PsEntry = serde_json::from_str(
            r#"{
                "Names": ["kubetest-t-1"],
                "Labels": {"type": "test", "test": "t-1",
                           "kubetest.namespace": "kubetest",
                           "kubetest.annotation.suite": "smoke"},
                "State": "exited",
                "ExitCode": 1,
                "Image": "onos/tests:1",
                "StartedAt": 1700000000
            }"#,
        )
        .unwrap();

        let unit = cluster.unit_from_entry(entry).await.unwrap();
        tokio::fs::remove_dir_all(&dir).await.unwrap();

        assert_eq!(unit.namespace, "kubetest");
        assert_eq!(unit.phase, Phase::Failed);
        assert_eq!(unit.annotation("suite"), Some("smoke"));
        assert!(!unit.labels.contains_key(NAMESPACE_LABEL));
        let termination = unit.termination().unwrap();
        assert_eq!(termination.exit_code, 1);
        assert_eq!(termination.message, "3 passed, 1 failed");
        assert!(unit.started_at.is_some());
    }

    #[test]
    fn test_created_entry_is_pending() {
        let entry: PsEntry =
            serde_json::from_str(r#"{"Names": ["x"], "Labels": null, "State": "created"}"#)
                .unwrap();
        assert_eq!(entry.state, "created");
        assert!(entry.labels.is_none());
    }

    #[tokio::test]
    async fn test_followed_output_ends_on_clean_exit() {
        let exit: ExitCheck = Box::pin(async { Ok(()) });
        let mut stream = FollowedOutput::new(std::io::Cursor::new(b"\xE2\x9C\x93 ping\n".to_vec()), exit);

        let mut output = Vec::new();
        stream.read_to_end(&mut output).await.unwrap();
        assert_eq!(output, "✓ ping\n".as_bytes());
    }

    #[tokio::test]
    async fn test_followed_output_fails_on_failed_exit() {
        let exit: ExitCheck = Box::pin(async { Err(io::Error::other("no such container")) });
        let mut stream = FollowedOutput::new(std::io::Cursor::new(b"partial".to_vec()), exit);

        let mut output = Vec::new();
        let err = stream.read_to_end(&mut output).await.unwrap_err();
        assert_eq!(output, b"partial");
        assert!(err.to_string().contains("no such container"));
    }

    #[tokio::test]
    async fn test_followed_output_drops_process_with_stream() {
        let (dropped_tx, dropped_rx) = tokio::sync::oneshot::channel::<()>();
        let exit: ExitCheck = Box::pin(async move {
            let _guard = dropped_tx;
            std::future::pending::<()>().await;
            Ok(())
        });
        let stream = FollowedOutput::new(std::io::Cursor::new(Vec::<u8>::new()), exit);

        drop(stream);
        assert!(dropped_rx.await.is_err());
    }
}
