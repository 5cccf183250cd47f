//! Kubernetes backend
//!
//! Units are pods created by single-completion Jobs. Manifests are built as
//! JSON and deserialized into the typed API objects.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kubetest_core::domain::workload::{
    ContainerState, ContainerStatus, Phase, Termination, WorkloadSpec, WorkloadUnit,
};
use kubetest_core::labels::LabelSelector;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info};

use crate::error::{ClusterError, Result};
use crate::{AccessObject, Cluster, OutputStream, PRIMARY_CONTAINER};

const CONFIG_VOLUME: &str = "config";

/// Cluster backend talking to a Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connects using the ambient configuration
    ///
    /// In-cluster service account credentials when running in a pod,
    /// otherwise the current kubeconfig context.
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::ConnectionFailed(e.to_string()))?;
        info!("Connected to Kubernetes API server");
        Ok(Self { client })
    }

    /// Wraps an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Maps a client error onto the backend-neutral error
fn map_kube_error(err: kube::Error, kind: &'static str, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 409 => {
            ClusterError::already_exists(kind, name)
        }
        kube::Error::Api(response) if response.code == 404 => ClusterError::not_found(kind, name),
        kube::Error::Api(response) => ClusterError::api_error(response.code, response.message),
        other => ClusterError::ConnectionFailed(other.to_string()),
    }
}

fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

fn manifest<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ClusterError::ParseError(e.to_string()))
}

fn job_manifest(workload: &WorkloadSpec) -> serde_json::Value {
    let env: Vec<serde_json::Value> = workload
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut spec = json!({
        "parallelism": 1,
        "completions": 1,
        "backoffLimit": 0,
        "template": {
            "metadata": {
                "labels": workload.labels,
                "annotations": workload.annotations,
            },
            "spec": {
                "serviceAccountName": workload.service_account,
                "restartPolicy": "Never",
                "containers": [{
                    "name": PRIMARY_CONTAINER,
                    "image": workload.image,
                    "imagePullPolicy": workload.pull_policy.as_str(),
                    "env": env,
                    "volumeMounts": [{
                        "name": CONFIG_VOLUME,
                        "mountPath": workload.config.path,
                        "subPath": workload.config.key,
                        "readOnly": true,
                    }],
                }],
                "volumes": [{
                    "name": CONFIG_VOLUME,
                    "configMap": { "name": workload.config.resource },
                }],
            },
        },
    });
    if let Some(deadline) = workload.active_deadline {
        spec["activeDeadlineSeconds"] = json!(deadline.as_secs());
    }

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": workload.name,
            "namespace": workload.namespace,
            "labels": workload.labels,
            "annotations": workload.annotations,
        },
        "spec": spec,
    })
}

fn unit_from_pod(pod: Pod) -> WorkloadUnit {
    let metadata = pod.metadata;
    let status = pod.status.unwrap_or_default();

    let image = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.iter().find(|c| c.name == PRIMARY_CONTAINER))
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    let mut containers: Vec<ContainerStatus> = status
        .container_statuses
        .unwrap_or_default()
        .into_iter()
        .map(|cs| {
            let state = match cs.state {
                Some(state) => {
                    if let Some(terminated) = state.terminated {
                        ContainerState::Terminated(Termination {
                            exit_code: terminated.exit_code,
                            message: terminated.message.unwrap_or_default(),
                        })
                    } else if state.running.is_some() {
                        ContainerState::Running
                    } else {
                        ContainerState::Waiting {
                            reason: state.waiting.and_then(|w| w.reason),
                        }
                    }
                }
                None => ContainerState::Waiting { reason: None },
            };
            ContainerStatus {
                name: cs.name,
                ready: cs.ready,
                state,
            }
        })
        .collect();
    // Primary container first
    containers.sort_by_key(|c| c.name != PRIMARY_CONTAINER);

    WorkloadUnit {
        name: metadata.name.unwrap_or_default(),
        namespace: metadata.namespace.unwrap_or_default(),
        labels: metadata.labels.unwrap_or_default(),
        annotations: metadata.annotations.unwrap_or_default(),
        image,
        // A pod the kubelet has not looked at yet has no phase
        phase: status.phase.as_deref().map(Phase::parse).unwrap_or(Phase::Pending),
        containers,
        started_at: status.start_time.map(|t| t.0),
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let object: Namespace = manifest(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": namespace },
        }))?;

        api.create(&PostParams::default(), &object)
            .await
            .map_err(|e| map_kube_error(e, "namespace", namespace))?;
        info!("Created namespace {}", namespace);
        Ok(())
    }

    async fn create_access(
        &self,
        namespace: &str,
        account: &str,
        object: AccessObject,
    ) -> Result<()> {
        let params = PostParams::default();
        match object {
            AccessObject::Role => {
                let api: Api<ClusterRole> = Api::all(self.client.clone());
                let role: ClusterRole = manifest(json!({
                    "apiVersion": "rbac.authorization.k8s.io/v1",
                    "kind": "ClusterRole",
                    "metadata": { "name": namespace },
                    "rules": [
                        {
                            "apiGroups": [""],
                            "resources": ["pods", "pods/log", "pods/exec", "services",
                                          "endpoints", "configmaps", "secrets", "namespaces",
                                          "serviceaccounts", "persistentvolumeclaims"],
                            "verbs": ["*"],
                        },
                        { "apiGroups": ["apps"], "resources": ["*"], "verbs": ["*"] },
                        { "apiGroups": ["batch"], "resources": ["jobs"], "verbs": ["*"] },
                        { "apiGroups": ["policy"], "resources": ["*"], "verbs": ["*"] },
                        {
                            "apiGroups": ["rbac.authorization.k8s.io"],
                            "resources": ["clusterroles", "clusterrolebindings"],
                            "verbs": ["*"],
                        },
                    ],
                }))?;
                api.create(&params, &role)
                    .await
                    .map_err(|e| map_kube_error(e, "cluster role", namespace))?;
            }
            AccessObject::RoleBinding => {
                let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
                let binding: ClusterRoleBinding = manifest(json!({
                    "apiVersion": "rbac.authorization.k8s.io/v1",
                    "kind": "ClusterRoleBinding",
                    "metadata": { "name": namespace },
                    "subjects": [{
                        "kind": "ServiceAccount",
                        "name": account,
                        "namespace": namespace,
                    }],
                    "roleRef": {
                        "apiGroup": "rbac.authorization.k8s.io",
                        "kind": "ClusterRole",
                        "name": namespace,
                    },
                }))?;
                api.create(&params, &binding)
                    .await
                    .map_err(|e| map_kube_error(e, "cluster role binding", namespace))?;
            }
            AccessObject::ServiceAccount => {
                let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
                let sa: ServiceAccount = manifest(json!({
                    "apiVersion": "v1",
                    "kind": "ServiceAccount",
                    "metadata": { "name": account, "namespace": namespace },
                }))?;
                api.create(&params, &sa)
                    .await
                    .map_err(|e| map_kube_error(e, "service account", account))?;
            }
        }
        debug!("Created {} for {}/{}", object, namespace, account);
        Ok(())
    }

    async fn upsert_config(
        &self,
        namespace: &str,
        resource: &str,
        key: &str,
        document: &str,
    ) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);

        let existing = api
            .get_opt(resource)
            .await
            .map_err(|e| map_kube_error(e, "config map", resource))?;

        let mut config = match existing {
            Some(config) => config,
            None => {
                let empty: ConfigMap = manifest(json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": { "name": resource, "namespace": namespace },
                    "data": {},
                }))?;
                match api.create(&PostParams::default(), &empty).await {
                    Ok(created) => created,
                    // Another job created it concurrently
                    Err(kube::Error::Api(response)) if response.code == 409 => api
                        .get(resource)
                        .await
                        .map_err(|e| map_kube_error(e, "config map", resource))?,
                    Err(e) => return Err(map_kube_error(e, "config map", resource)),
                }
            }
        };

        config
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), document.to_string());

        api.replace(resource, &PostParams::default(), &config)
            .await
            .map_err(|e| map_kube_error(e, "config map", resource))?;
        debug!("Stored entry {} in config map {}/{}", key, namespace, resource);
        Ok(())
    }

    async fn submit(&self, workload: &WorkloadSpec) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &workload.namespace);
        let job: Job = manifest(job_manifest(workload))?;

        api.create(&PostParams::default(), &job)
            .await
            .map_err(|e| map_kube_error(e, "job", &workload.name))?;
        info!("Submitted job {}/{}", workload.namespace, workload.name);
        Ok(())
    }

    async fn list_units(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<WorkloadUnit>> {
        let params = ListParams::default().labels(&selector.to_string());
        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(|e| map_kube_error(e, "pods", &selector.to_string()))?;

        Ok(pods.items.into_iter().map(unit_from_pod).collect())
    }

    async fn stream_output(&self, namespace: &str, unit: &str) -> Result<OutputStream> {
        let params = LogParams {
            follow: true,
            container: Some(PRIMARY_CONTAINER.to_string()),
            ..Default::default()
        };
        let stream = self
            .pods(Some(namespace))
            .log_stream(unit, &params)
            .await
            .map_err(|e| map_kube_error(e, "pod", unit))?;

        Ok(Box::pin(stream.compat()))
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(namespace, &DeleteParams::background())
            .await
            .map_err(|e| map_kube_error(e, "namespace", namespace))?;

        // Cluster-scoped access objects are named after the namespace
        let bindings: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        ignore_not_found(
            bindings
                .delete(namespace, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error(e, "cluster role binding", namespace)),
        )?;
        let roles: Api<ClusterRole> = Api::all(self.client.clone());
        ignore_not_found(
            roles
                .delete(namespace, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error(e, "cluster role", namespace)),
        )?;

        info!("Deleted namespace {}", namespace);
        Ok(())
    }
}
