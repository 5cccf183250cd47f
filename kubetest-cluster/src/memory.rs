//! In-memory backend
//!
//! A scripted simulation of a cluster. Each submitted workload follows a
//! [`Script`]: a list of lifecycle steps, one of which is applied every time
//! the unit is observed through `list_units`. The last step repeats forever.
//!
//! Phases never move backwards; a script step that would regress is ignored.

use async_trait::async_trait;
use kubetest_core::domain::workload::{
    ContainerState, ContainerStatus, Phase, Termination, WorkloadSpec, WorkloadUnit,
};
use kubetest_core::labels::{LabelSelector, TEST_LABEL};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::{debug, warn};

use crate::error::{ClusterError, Result};
use crate::{AccessObject, Cluster, OutputStream, PRIMARY_CONTAINER};

/// Backend operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateNamespace,
    CreateAccess,
    UpsertConfig,
    Submit,
    ListUnits,
    StreamOutput,
    DeleteNamespace,
}

/// One observed lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Pending,
    Running { ready: bool },
    Exited { exit_code: i32, message: String },
    /// The platform lost track of the unit
    Lost,
}

/// How a simulated workload behaves
#[derive(Debug, Clone)]
pub struct Script {
    steps: Vec<Step>,
    output: Vec<u8>,
    broken_stream: bool,
    rejection: Option<String>,
}

impl Script {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let mut steps: Vec<Step> = steps.into_iter().collect();
        if steps.is_empty() {
            steps.push(Step::Pending);
        }
        Self {
            steps,
            output: Vec::new(),
            broken_stream: false,
            rejection: None,
        }
    }

    /// Pending, then ready, then exits
    pub fn completes(exit_code: i32, message: impl Into<String>) -> Self {
        Self::new([
            Step::Pending,
            Step::Running { ready: true },
            Step::Exited {
                exit_code,
                message: message.into(),
            },
        ])
    }

    /// Already terminated on first observation
    pub fn exits_immediately(exit_code: i32, message: impl Into<String>) -> Self {
        Self::new([Step::Exited {
            exit_code,
            message: message.into(),
        }])
    }

    /// Never gets scheduled
    pub fn hangs() -> Self {
        Self::new([Step::Pending])
    }

    /// Becomes ready and never exits
    pub fn runs_forever() -> Self {
        Self::new([Step::Pending, Step::Running { ready: true }])
    }

    /// Submission is refused by the platform
    pub fn rejected(message: impl Into<String>) -> Self {
        let mut script = Self::hangs();
        script.rejection = Some(message.into());
        script
    }

    /// Bytes the unit writes to its output
    pub fn with_output(mut self, output: impl Into<Vec<u8>>) -> Self {
        self.output = output.into();
        self
    }

    /// The output stream fails after the scripted bytes
    pub fn with_broken_stream(mut self) -> Self {
        self.broken_stream = true;
        self
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::completes(0, "")
    }
}

struct SimUnit {
    unit: WorkloadUnit,
    script: Script,
    cursor: usize,
}

impl SimUnit {
    /// Applies the next scripted step and returns what an observer sees
    fn observe(&mut self) -> WorkloadUnit {
        let index = self.cursor.min(self.script.steps.len() - 1);
        self.cursor += 1;

        let (phase, state, ready) = match &self.script.steps[index] {
            Step::Pending => (
                Phase::Pending,
                ContainerState::Waiting {
                    reason: Some("ContainerCreating".to_string()),
                },
                false,
            ),
            Step::Running { ready } => (Phase::Running, ContainerState::Running, *ready),
            Step::Exited { exit_code, message } => (
                if *exit_code == 0 {
                    Phase::Succeeded
                } else {
                    Phase::Failed
                },
                ContainerState::Terminated(Termination {
                    exit_code: *exit_code,
                    message: message.clone(),
                }),
                false,
            ),
            Step::Lost => (
                Phase::Unknown,
                ContainerState::Waiting { reason: None },
                false,
            ),
        };

        match self.unit.phase.advance(phase) {
            Ok(next) => {
                self.unit.phase = next;
                self.unit.containers = vec![ContainerStatus {
                    name: PRIMARY_CONTAINER.to_string(),
                    ready,
                    state,
                }];
            }
            Err(e) => warn!("Ignoring scripted step for {}: {}", self.unit.name, e),
        }
        self.unit.clone()
    }
}

/// Output reader that fails on first use
struct BrokenStream;

impl AsyncRead for BrokenStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "output stream reset",
        )))
    }
}

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    access: BTreeSet<(String, String, AccessObject)>,
    configs: BTreeMap<(String, String), BTreeMap<String, String>>,
    scripts: HashMap<String, Script>,
    default_script: Option<Script>,
    units: Vec<SimUnit>,
    submitted: Vec<WorkloadSpec>,
    failures: HashMap<Operation, String>,
    observed: HashMap<String, Vec<Phase>>,
}

impl State {
    fn check(&self, operation: Operation) -> Result<()> {
        match self.failures.get(&operation) {
            Some(message) => Err(ClusterError::api_error(500, message.clone())),
            None => Ok(()),
        }
    }

    fn require_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(ClusterError::not_found("namespace", namespace))
        }
    }
}

/// Scripted in-process cluster
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scripts the workload submitted for `test_id`
    pub fn set_script(&self, test_id: impl Into<String>, script: Script) {
        self.state().scripts.insert(test_id.into(), script);
    }

    /// Script used for test IDs without their own
    pub fn set_default_script(&self, script: Script) {
        self.state().default_script = Some(script);
    }

    /// Makes every call of `operation` fail with a server error
    pub fn fail_operation(&self, operation: Operation, message: impl Into<String>) {
        self.state().failures.insert(operation, message.into());
    }

    /// Pre-creates a namespace
    pub fn add_namespace(&self, namespace: impl Into<String>) {
        self.state().namespaces.insert(namespace.into());
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.state().namespaces.contains(namespace)
    }

    pub fn has_access(&self, namespace: &str, account: &str, object: AccessObject) -> bool {
        self.state()
            .access
            .contains(&(namespace.to_string(), account.to_string(), object))
    }

    pub fn config_entry(&self, namespace: &str, resource: &str, key: &str) -> Option<String> {
        self.state()
            .configs
            .get(&(namespace.to_string(), resource.to_string()))
            .and_then(|entries| entries.get(key).cloned())
    }

    /// Every workload accepted so far, in submission order
    pub fn submitted(&self) -> Vec<WorkloadSpec> {
        self.state().submitted.clone()
    }

    /// Phases observers saw for the units of `test_id`, in order
    pub fn observed_phases(&self, test_id: &str) -> Vec<Phase> {
        self.state()
            .observed
            .get(test_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let mut state = self.state();
        state.check(Operation::CreateNamespace)?;
        if !state.namespaces.insert(namespace.to_string()) {
            return Err(ClusterError::already_exists("namespace", namespace));
        }
        Ok(())
    }

    async fn create_access(
        &self,
        namespace: &str,
        account: &str,
        object: AccessObject,
    ) -> Result<()> {
        let mut state = self.state();
        state.check(Operation::CreateAccess)?;
        state.require_namespace(namespace)?;
        if !state
            .access
            .insert((namespace.to_string(), account.to_string(), object))
        {
            return Err(ClusterError::already_exists(object.as_str(), account));
        }
        Ok(())
    }

    async fn upsert_config(
        &self,
        namespace: &str,
        resource: &str,
        key: &str,
        document: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.check(Operation::UpsertConfig)?;
        state.require_namespace(namespace)?;
        state
            .configs
            .entry((namespace.to_string(), resource.to_string()))
            .or_default()
            .insert(key.to_string(), document.to_string());
        Ok(())
    }

    async fn submit(&self, workload: &WorkloadSpec) -> Result<()> {
        let mut state = self.state();
        state.check(Operation::Submit)?;
        state.require_namespace(&workload.namespace)?;

        if state
            .submitted
            .iter()
            .any(|w| w.namespace == workload.namespace && w.name == workload.name)
        {
            return Err(ClusterError::already_exists("job", workload.name.clone()));
        }

        let test_id = workload.labels.get(TEST_LABEL).cloned().unwrap_or_default();
        let script = state
            .scripts
            .get(&test_id)
            .or(state.default_script.as_ref())
            .cloned()
            .unwrap_or_default();
        if let Some(message) = &script.rejection {
            return Err(ClusterError::api_error(422, message.clone()));
        }

        let unit = WorkloadUnit {
            name: format!("{}-{:05x}", workload.name, state.units.len() + 1),
            namespace: workload.namespace.clone(),
            labels: workload.labels.clone(),
            annotations: workload.annotations.clone(),
            image: workload.image.clone(),
            phase: Phase::Pending,
            containers: Vec::new(),
            started_at: Some(chrono::Utc::now()),
        };
        debug!("Accepted {} as unit {}", workload.name, unit.name);

        state.units.push(SimUnit {
            unit,
            script,
            cursor: 0,
        });
        state.submitted.push(workload.clone());
        Ok(())
    }

    async fn list_units(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<WorkloadUnit>> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.check(Operation::ListUnits)?;

        let mut found = Vec::new();
        for sim in state.units.iter_mut() {
            if namespace.is_some_and(|ns| ns != sim.unit.namespace) {
                continue;
            }
            if !selector.matches(&sim.unit.labels) {
                continue;
            }
            let unit = sim.observe();
            if let Some(test_id) = unit.test_id() {
                state
                    .observed
                    .entry(test_id.to_string())
                    .or_default()
                    .push(unit.phase);
            }
            found.push(unit);
        }
        Ok(found)
    }

    async fn stream_output(&self, namespace: &str, unit: &str) -> Result<OutputStream> {
        let state = self.state();
        state.check(Operation::StreamOutput)?;

        let sim = state
            .units
            .iter()
            .find(|s| s.unit.namespace == namespace && s.unit.name == unit)
            .ok_or_else(|| ClusterError::not_found("unit", unit))?;

        let output = Cursor::new(sim.script.output.clone());
        if sim.script.broken_stream {
            Ok(Box::pin(output.chain(BrokenStream)))
        } else {
            Ok(Box::pin(output))
        }
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let mut state = self.state();
        state.check(Operation::DeleteNamespace)?;
        if !state.namespaces.remove(namespace) {
            return Err(ClusterError::not_found("namespace", namespace));
        }
        state.units.retain(|s| s.unit.namespace != namespace);
        state.configs.retain(|(ns, _), _| ns != namespace);
        state.access.retain(|(ns, _, _)| ns != namespace);
        Ok(())
    }
}
