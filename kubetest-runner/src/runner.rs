//! Job runner
//!
//! Drives a single job from setup to its terminal result:
//! 1. Ensure the namespace and access objects exist
//! 2. Publish the job descriptor into the shared configuration resource
//! 3. Submit the workload
//! 4. Wait for the unit to start
//! 5. Copy its output to the caller's sink until EOF
//! 6. Wait for the primary container to terminate and read its exit
//!
//! Every step depends on the previous one; any error aborts the run and is
//! returned unchanged. Nothing is retried.

use kubetest_cluster::{AccessObject, Cluster, ClusterError};
use kubetest_core::domain::job::{JobResult, JobSpec};
use kubetest_core::domain::workload::{ConfigMount, WorkloadSpec, WorkloadUnit};
use kubetest_core::dto::descriptor::JobDescriptor;
use kubetest_core::labels::{
    CONTEXT_ENV, LabelSelector, SUITE_ANNOTATION, TEST_ID_ANNOTATION, TEST_NAME_ANNOTATION,
    job_labels,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::context::ProcessContext;
use crate::error::{Result, RunnerError};
use crate::poller::ReadinessPoller;
use crate::status::StatusReporter;

pub const CONFIG_RESOURCE: &str = "tests";
pub const SERVICE_ACCOUNT: &str = "kubetest";

/// Where and how a runner submits its workload
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Fixed namespace; `None` uses a namespace named after each job's test ID
    pub namespace: Option<String>,
    pub config_resource: String,
    pub service_account: String,
    /// `TEST_CONTEXT` given to the submitted workload
    pub workload_context: ProcessContext,
    /// Where the descriptor is mounted inside the unit
    pub config_path: String,
    /// Delete the job namespace once the result is read
    pub teardown: bool,
    pub poll_interval: Duration,
    pub startup_grace: Duration,
    pub wait_timeout: Option<Duration>,
    /// Extra environment passed to the workload
    pub env: BTreeMap<String, String>,
}

impl RunnerOptions {
    /// An operator submitting a coordinator into the cluster namespace
    pub fn coordinator(config: &HarnessConfig) -> Self {
        Self {
            namespace: Some(config.namespace.clone()),
            workload_context: ProcessContext::Coordinator,
            ..Self::from_config(config)
        }
    }

    /// A coordinator submitting workers, one namespace per job
    pub fn workers(config: &HarnessConfig) -> Self {
        Self {
            namespace: None,
            workload_context: ProcessContext::Worker,
            ..Self::from_config(config)
        }
    }

    fn from_config(config: &HarnessConfig) -> Self {
        Self {
            namespace: None,
            config_resource: CONFIG_RESOURCE.to_string(),
            service_account: SERVICE_ACCOUNT.to_string(),
            workload_context: ProcessContext::Worker,
            config_path: config.config_path.to_string_lossy().to_string(),
            teardown: false,
            poll_interval: config.poll_interval,
            startup_grace: config.startup_grace,
            wait_timeout: config.wait_timeout,
            env: BTreeMap::new(),
        }
    }

    pub fn with_teardown(mut self, teardown: bool) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn namespace_for(&self, spec: &JobSpec) -> String {
        self.namespace
            .clone()
            .unwrap_or_else(|| spec.test_id.clone())
    }

    /// Local bound on all waits of a job
    ///
    /// A job timeout plus the startup grace, else the configured wait
    /// timeout, else none.
    pub fn local_deadline(&self, spec: &JobSpec) -> Option<Duration> {
        if spec.is_bounded() {
            Some(spec.timeout + self.startup_grace)
        } else {
            self.wait_timeout
        }
    }
}

/// Drives one job to its `JobResult`
pub struct Runner {
    cluster: Arc<dyn Cluster>,
    options: RunnerOptions,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        options: RunnerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            options,
            cancel,
        }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Runs `spec` to completion, copying its output into `output`
    ///
    /// A non-zero exit is returned as a failed `JobResult`, not an error.
    pub async fn run<W>(
        &self,
        spec: &JobSpec,
        status: &mut StatusReporter,
        output: &mut W,
    ) -> Result<JobResult>
    where
        W: AsyncWrite + Unpin + Send,
    {
        spec.validate()?;
        let namespace = self.options.namespace_for(spec);
        let poller = ReadinessPoller::new(self.options.poll_interval, self.cancel.clone())
            .with_deadline(self.options.local_deadline(spec).map(|d| Instant::now() + d));

        info!(
            "Running {} {} in namespace {} on {}",
            spec.kind,
            spec.test_id,
            namespace,
            self.cluster.name()
        );

        let unit = match self.setup(spec, &namespace, &poller, status).await {
            Ok(unit) => {
                status.succeed();
                status.drain().await;
                unit
            }
            Err(e) => {
                status.fail(&e);
                status.drain().await;
                return Err(e);
            }
        };

        self.stream_output(spec, &unit, output).await?;
        let result = self.await_terminal(spec, &namespace, &poller).await?;

        info!(
            "Job {} finished: status={}, exit_code={}",
            spec.test_id, result.status, result.exit_code
        );

        if self.options.teardown {
            self.teardown(&namespace).await;
        }

        Ok(result)
    }

    async fn setup(
        &self,
        spec: &JobSpec,
        namespace: &str,
        poller: &ReadinessPoller,
        status: &mut StatusReporter,
    ) -> Result<WorkloadUnit> {
        status.start("Setting up access");
        self.ensure_access(spec, namespace).await?;

        status.start("Publishing job configuration");
        self.publish_config(spec, namespace).await?;

        status.start("Submitting job");
        self.submit(spec, namespace).await?;

        status.start("Waiting for job to start");
        self.await_running(spec, namespace, poller).await
    }

    /// Creates the namespace and access objects; existing ones are fine
    pub async fn ensure_access(&self, spec: &JobSpec, namespace: &str) -> Result<()> {
        tolerate_existing(self.cluster.create_namespace(namespace).await)
            .map_err(|e| RunnerError::submission("namespace", &spec.test_id, e))?;

        for object in AccessObject::ALL {
            tolerate_existing(
                self.cluster
                    .create_access(namespace, &self.options.service_account, object)
                    .await,
            )
            .map_err(|e| RunnerError::submission(object.as_str(), &spec.test_id, e))?;
        }
        debug!("Access ready in {}", namespace);
        Ok(())
    }

    /// Upserts the job's descriptor under its test ID
    pub async fn publish_config(&self, spec: &JobSpec, namespace: &str) -> Result<()> {
        let document = JobDescriptor::from(spec).to_document()?;
        self.cluster
            .upsert_config(
                namespace,
                &self.options.config_resource,
                &spec.test_id,
                &document,
            )
            .await
            .map_err(|e| RunnerError::submission("configuration", &spec.test_id, e))
    }

    pub async fn submit(&self, spec: &JobSpec, namespace: &str) -> Result<()> {
        let workload = self.workload(spec, namespace);
        match self.cluster.submit(&workload).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                warn!("Job {} already exists, following it", spec.test_id);
                Ok(())
            }
            Err(e) => Err(RunnerError::submission("job", &spec.test_id, e)),
        }
    }

    /// The workload submitted for `spec`
    pub fn workload(&self, spec: &JobSpec, namespace: &str) -> WorkloadSpec {
        let mut annotations =
            BTreeMap::from([(TEST_ID_ANNOTATION.to_string(), spec.test_id.clone())]);
        if let Some(suite) = &spec.suite {
            annotations.insert(SUITE_ANNOTATION.to_string(), suite.clone());
        }
        if let Some(test_name) = &spec.test_name {
            annotations.insert(TEST_NAME_ANNOTATION.to_string(), test_name.clone());
        }

        let mut env = self.options.env.clone();
        env.insert(
            CONTEXT_ENV.to_string(),
            self.options.workload_context.as_str().to_string(),
        );
        env.insert(
            "KUBETEST_CONFIG_PATH".to_string(),
            self.options.config_path.clone(),
        );

        WorkloadSpec {
            name: spec.test_id.clone(),
            namespace: namespace.to_string(),
            labels: job_labels(spec.kind, &spec.test_id),
            annotations,
            image: spec.image.clone(),
            pull_policy: spec.pull_policy,
            env,
            service_account: self.options.service_account.clone(),
            config: ConfigMount {
                resource: self.options.config_resource.clone(),
                key: spec.test_id.clone(),
                path: self.options.config_path.clone(),
            },
            active_deadline: spec.is_bounded().then_some(spec.timeout),
        }
    }

    /// Waits until the unit is ready or already terminated
    pub async fn await_running(
        &self,
        spec: &JobSpec,
        namespace: &str,
        poller: &ReadinessPoller,
    ) -> Result<WorkloadUnit> {
        let selector = &LabelSelector::for_test(&spec.test_id);
        poller
            .wait_until(|| async move {
                let units = self.cluster.list_units(Some(namespace), selector).await?;
                Ok::<_, RunnerError>(units.into_iter().find(WorkloadUnit::has_started))
            })
            .await
            .map_err(|e| RunnerError::from_wait(e, &spec.test_id))
    }

    /// Copies the unit's output into `output` until EOF
    async fn stream_output<W>(
        &self,
        spec: &JobSpec,
        unit: &WorkloadUnit,
        output: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut stream = match self.cluster.stream_output(&unit.namespace, &unit.name).await {
            Ok(stream) => stream,
            Err(e) if e.is_not_found() => {
                return Err(RunnerError::WorkloadNotFound(spec.test_id.clone()));
            }
            Err(ClusterError::Io(source)) => {
                return Err(RunnerError::Stream {
                    test_id: spec.test_id.clone(),
                    source,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let copied = tokio::select! {
            _ = self.cancel.cancelled() => return Err(RunnerError::Cancelled),
            copied = tokio::io::copy(&mut stream, &mut *output) => copied,
        };
        let stream_error = |source| RunnerError::Stream {
            test_id: spec.test_id.clone(),
            source,
        };
        let bytes = copied.map_err(stream_error)?;
        output.flush().await.map_err(stream_error)?;
        debug!("Streamed {} bytes from {}", bytes, unit.name);
        Ok(())
    }

    /// Waits for the primary container to terminate
    pub async fn await_terminal(
        &self,
        spec: &JobSpec,
        namespace: &str,
        poller: &ReadinessPoller,
    ) -> Result<JobResult> {
        let selector = &LabelSelector::for_test(&spec.test_id);
        poller
            .wait_until(|| async move {
                let units = self.cluster.list_units(Some(namespace), selector).await?;
                let Some(unit) = units.into_iter().next() else {
                    return Err(RunnerError::WorkloadNotFound(spec.test_id.clone()));
                };
                Ok::<_, RunnerError>(unit
                    .termination()
                    .map(|t| JobResult::from_termination(t.exit_code, t.message.clone())))
            })
            .await
            .map_err(|e| RunnerError::from_wait(e, &spec.test_id))
    }

    async fn teardown(&self, namespace: &str) {
        match self.cluster.delete_namespace(namespace).await {
            Ok(()) => info!("Deleted namespace {}", namespace),
            Err(e) => warn!("Failed to delete namespace {}: {}", namespace, e),
        }
    }
}

fn tolerate_existing(result: kubetest_cluster::Result<()>) -> kubetest_cluster::Result<()> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}
