use anyhow::{Context, Result};
use futures::future::BoxFuture;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Endpoints, Event, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
    PodStatus, Secret, Service,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::{Api, Client, Config, Resource, ResourceExt, discovery};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::path::Path;
use tracing::debug;

use crate::error::ResourceError;
use crate::model::{BuiltinKind, PLACEHOLDER, ResourceRow};

pub const FIELD_MANAGER: &str = "kubeboard";
pub const ENDPOINT_COLUMNS: [&str; 4] = ["Namespace", "Name", "Endpoints", "Age"];
const LOG_TAIL_LINES: i64 = 500;

/// Typed cluster operations the registry and plugin bridge build on.
pub trait ClusterClient: Send + Sync {
    fn list(
        &self,
        kind: BuiltinKind,
        namespace: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<ResourceRow>, ResourceError>>;

    fn delete(
        &self,
        kind: BuiltinKind,
        namespace: Option<String>,
        name: String,
    ) -> BoxFuture<'_, Result<(), ResourceError>>;

    /// Manifest of one object as YAML, suitable for editing and re-applying.
    fn describe(
        &self,
        kind: BuiltinKind,
        namespace: Option<String>,
        name: String,
    ) -> BoxFuture<'_, Result<String, ResourceError>>;

    fn apply_yaml(&self, manifest: String) -> BoxFuture<'_, Result<String, ResourceError>>;

    fn pod_logs(
        &self,
        namespace: String,
        name: String,
    ) -> BoxFuture<'_, Result<String, ResourceError>>;

    fn list_endpoints(
        &self,
        namespace: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<ResourceRow>, ResourceError>>;
}

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
    default_namespace: String,
    contexts: Vec<String>,
}

impl KubeGateway {
    pub async fn connect(kubeconfig_path: Option<&Path>, context: Option<String>) -> Result<Self> {
        let kubeconfig = match kubeconfig_path {
            Some(path) => Some(
                Kubeconfig::read_from(path)
                    .with_context(|| format!("failed to read kubeconfig {}", path.display()))?,
            ),
            None => Kubeconfig::read().ok(),
        };

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            let options = KubeConfigOptions {
                context: context.clone(),
                cluster: None,
                user: None,
            };
            Config::from_custom_kubeconfig(kubeconfig_value, &options)
                .await
                .context("failed to infer Kubernetes configuration")?
        } else {
            if context.is_some() {
                anyhow::bail!("kubeconfig not found; context switching is unavailable");
            }
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;

        let mut contexts = kubeconfig
            .as_ref()
            .map(|cfg| {
                cfg.contexts
                    .iter()
                    .map(|named| named.name.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        contexts.sort();
        contexts.dedup();

        let active_context = context
            .or_else(|| {
                kubeconfig
                    .as_ref()
                    .and_then(|cfg| cfg.current_context.clone())
            })
            .unwrap_or_else(|| "in-cluster".to_string());
        debug!(context = %active_context, "connected to cluster");

        Ok(Self {
            client,
            context: active_context,
            default_namespace,
            contexts,
        })
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    async fn list_rows(
        &self,
        kind: BuiltinKind,
        namespace: Option<&str>,
    ) -> Result<Vec<ResourceRow>, ResourceError> {
        let mut rows: Vec<ResourceRow> = match kind {
            BuiltinKind::Pod => rows_of(self.list_namespaced::<Pod>(namespace).await?, pod_row),
            BuiltinKind::Deployment => rows_of(
                self.list_namespaced::<Deployment>(namespace).await?,
                deployment_row,
            ),
            BuiltinKind::StatefulSet => rows_of(
                self.list_namespaced::<StatefulSet>(namespace).await?,
                statefulset_row,
            ),
            BuiltinKind::DaemonSet => rows_of(
                self.list_namespaced::<DaemonSet>(namespace).await?,
                daemonset_row,
            ),
            BuiltinKind::ReplicaSet => rows_of(
                self.list_namespaced::<ReplicaSet>(namespace).await?,
                replicaset_row,
            ),
            BuiltinKind::Job => rows_of(self.list_namespaced::<Job>(namespace).await?, job_row),
            BuiltinKind::CronJob => {
                rows_of(self.list_namespaced::<CronJob>(namespace).await?, cronjob_row)
            }
            BuiltinKind::Service => {
                rows_of(self.list_namespaced::<Service>(namespace).await?, service_row)
            }
            BuiltinKind::Ingress => {
                rows_of(self.list_namespaced::<Ingress>(namespace).await?, ingress_row)
            }
            BuiltinKind::NetworkPolicy => rows_of(
                self.list_namespaced::<NetworkPolicy>(namespace).await?,
                network_policy_row,
            ),
            BuiltinKind::ConfigMap => rows_of(
                self.list_namespaced::<ConfigMap>(namespace).await?,
                configmap_row,
            ),
            BuiltinKind::Secret => {
                rows_of(self.list_namespaced::<Secret>(namespace).await?, secret_row)
            }
            BuiltinKind::PersistentVolumeClaim => rows_of(
                self.list_namespaced::<PersistentVolumeClaim>(namespace)
                    .await?,
                pvc_row,
            ),
            BuiltinKind::Event => {
                rows_of(self.list_namespaced::<Event>(namespace).await?, event_row)
            }
            BuiltinKind::Node => rows_of(self.list_cluster::<Node>().await?, node_row),
            BuiltinKind::Namespace => {
                rows_of(self.list_cluster::<Namespace>().await?, namespace_row)
            }
            BuiltinKind::PersistentVolume => rows_of(
                self.list_cluster::<PersistentVolume>().await?,
                persistent_volume_row,
            ),
            BuiltinKind::StorageClass => rows_of(
                self.list_cluster::<StorageClass>().await?,
                storage_class_row,
            ),
        };

        sort_rows(&mut rows);
        Ok(rows)
    }

    async fn delete_object(
        &self,
        kind: BuiltinKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ResourceError> {
        match kind {
            BuiltinKind::Pod => self.delete_namespaced::<Pod>(kind, namespace, name).await,
            BuiltinKind::Deployment => {
                self.delete_namespaced::<Deployment>(kind, namespace, name)
                    .await
            }
            BuiltinKind::StatefulSet => {
                self.delete_namespaced::<StatefulSet>(kind, namespace, name)
                    .await
            }
            BuiltinKind::DaemonSet => {
                self.delete_namespaced::<DaemonSet>(kind, namespace, name)
                    .await
            }
            BuiltinKind::ReplicaSet => {
                self.delete_namespaced::<ReplicaSet>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Job => self.delete_namespaced::<Job>(kind, namespace, name).await,
            BuiltinKind::CronJob => {
                self.delete_namespaced::<CronJob>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Service => {
                self.delete_namespaced::<Service>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Ingress => {
                self.delete_namespaced::<Ingress>(kind, namespace, name)
                    .await
            }
            BuiltinKind::NetworkPolicy => {
                self.delete_namespaced::<NetworkPolicy>(kind, namespace, name)
                    .await
            }
            BuiltinKind::ConfigMap => {
                self.delete_namespaced::<ConfigMap>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Secret => {
                self.delete_namespaced::<Secret>(kind, namespace, name)
                    .await
            }
            BuiltinKind::PersistentVolumeClaim => {
                self.delete_namespaced::<PersistentVolumeClaim>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Event => {
                self.delete_namespaced::<Event>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Node => self.delete_cluster::<Node>(name).await,
            BuiltinKind::Namespace => self.delete_cluster::<Namespace>(name).await,
            BuiltinKind::PersistentVolume => self.delete_cluster::<PersistentVolume>(name).await,
            BuiltinKind::StorageClass => self.delete_cluster::<StorageClass>(name).await,
        }
    }

    async fn manifest(
        &self,
        kind: BuiltinKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<String, ResourceError> {
        match kind {
            BuiltinKind::Pod => self.manifest_namespaced::<Pod>(kind, namespace, name).await,
            BuiltinKind::Deployment => {
                self.manifest_namespaced::<Deployment>(kind, namespace, name)
                    .await
            }
            BuiltinKind::StatefulSet => {
                self.manifest_namespaced::<StatefulSet>(kind, namespace, name)
                    .await
            }
            BuiltinKind::DaemonSet => {
                self.manifest_namespaced::<DaemonSet>(kind, namespace, name)
                    .await
            }
            BuiltinKind::ReplicaSet => {
                self.manifest_namespaced::<ReplicaSet>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Job => self.manifest_namespaced::<Job>(kind, namespace, name).await,
            BuiltinKind::CronJob => {
                self.manifest_namespaced::<CronJob>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Service => {
                self.manifest_namespaced::<Service>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Ingress => {
                self.manifest_namespaced::<Ingress>(kind, namespace, name)
                    .await
            }
            BuiltinKind::NetworkPolicy => {
                self.manifest_namespaced::<NetworkPolicy>(kind, namespace, name)
                    .await
            }
            BuiltinKind::ConfigMap => {
                self.manifest_namespaced::<ConfigMap>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Secret => {
                self.manifest_namespaced::<Secret>(kind, namespace, name)
                    .await
            }
            BuiltinKind::PersistentVolumeClaim => {
                self.manifest_namespaced::<PersistentVolumeClaim>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Event => {
                self.manifest_namespaced::<Event>(kind, namespace, name)
                    .await
            }
            BuiltinKind::Node => self.manifest_cluster::<Node>(name).await,
            BuiltinKind::Namespace => self.manifest_cluster::<Namespace>(name).await,
            BuiltinKind::PersistentVolume => self.manifest_cluster::<PersistentVolume>(name).await,
            BuiltinKind::StorageClass => self.manifest_cluster::<StorageClass>(name).await,
        }
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<String, ResourceError> {
        let object: DynamicObject =
            serde_yaml::from_str(manifest).map_err(|error| ResourceError::Decode(error.to_string()))?;
        let gvk = object
            .types
            .as_ref()
            .ok_or_else(|| ResourceError::Decode("manifest is missing apiVersion/kind".to_string()))
            .and_then(|types| {
                GroupVersionKind::try_from(types)
                    .map_err(|error| ResourceError::Decode(error.to_string()))
            })?;
        let name = object.name_any();
        let (resource, _caps) = discovery::pinned_kind(&self.client, &gvk).await?;

        let api: Api<DynamicObject> = match object.metadata.namespace.as_deref() {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        };

        let mut data = serde_json::to_value(&object)
            .map_err(|error| ResourceError::Decode(error.to_string()))?;
        if let Some(metadata) = data
            .get_mut("metadata")
            .and_then(serde_json::Value::as_object_mut)
        {
            metadata.remove("managedFields");
        }

        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&name, &params, &Patch::Apply(data)).await?;
        Ok(format!("{}/{name} applied", resource.plural))
    }

    async fn fetch_pod_logs(&self, namespace: &str, pod_name: &str) -> Result<String, ResourceError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods.get(pod_name).await?;
        let params = LogParams {
            container: first_pod_container(&pod),
            tail_lines: Some(LOG_TAIL_LINES),
            timestamps: true,
            ..LogParams::default()
        };

        Ok(pods.logs(pod_name, &params).await?)
    }

    async fn fetch_endpoints(&self, namespace: Option<&str>) -> Result<Vec<ResourceRow>, ResourceError> {
        let mut rows = rows_of(
            self.list_namespaced::<Endpoints>(namespace).await?,
            endpoints_row,
        );
        sort_rows(&mut rows);
        Ok(rows)
    }

    fn namespaced_api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match namespace.map(str::trim).filter(|value| !value.is_empty()) {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    async fn list_namespaced<K>(&self, namespace: Option<&str>) -> Result<Vec<K>, ResourceError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = self.namespaced_api(namespace);
        Ok(api.list(&list_params()).await?.items)
    }

    async fn list_cluster<K>(&self) -> Result<Vec<K>, ResourceError>
    where
        K: Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        Ok(api.list(&list_params()).await?.items)
    }

    async fn delete_namespaced<K>(
        &self,
        kind: BuiltinKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ResourceError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let namespace = required_namespace(kind, namespace)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let _ = api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn delete_cluster<K>(&self, name: &str) -> Result<(), ResourceError>
    where
        K: Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let _ = api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn manifest_namespaced<K>(
        &self,
        kind: BuiltinKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<String, ResourceError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Serialize,
        K::DynamicType: Default,
    {
        let namespace = required_namespace(kind, namespace)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let object = api.get(name).await?;
        manifest_yaml(object)
    }

    async fn manifest_cluster<K>(&self, name: &str) -> Result<String, ResourceError>
    where
        K: Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Debug + Serialize,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let object = api.get(name).await?;
        manifest_yaml(object)
    }
}

impl ClusterClient for KubeGateway {
    fn list(
        &self,
        kind: BuiltinKind,
        namespace: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<ResourceRow>, ResourceError>> {
        Box::pin(async move { self.list_rows(kind, namespace.as_deref()).await })
    }

    fn delete(
        &self,
        kind: BuiltinKind,
        namespace: Option<String>,
        name: String,
    ) -> BoxFuture<'_, Result<(), ResourceError>> {
        Box::pin(async move { self.delete_object(kind, namespace.as_deref(), &name).await })
    }

    fn describe(
        &self,
        kind: BuiltinKind,
        namespace: Option<String>,
        name: String,
    ) -> BoxFuture<'_, Result<String, ResourceError>> {
        Box::pin(async move { self.manifest(kind, namespace.as_deref(), &name).await })
    }

    fn apply_yaml(&self, manifest: String) -> BoxFuture<'_, Result<String, ResourceError>> {
        Box::pin(async move { self.apply_manifest(&manifest).await })
    }

    fn pod_logs(
        &self,
        namespace: String,
        name: String,
    ) -> BoxFuture<'_, Result<String, ResourceError>> {
        Box::pin(async move { self.fetch_pod_logs(&namespace, &name).await })
    }

    fn list_endpoints(
        &self,
        namespace: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<ResourceRow>, ResourceError>> {
        Box::pin(async move { self.fetch_endpoints(namespace.as_deref()).await })
    }
}

fn rows_of<K>(items: Vec<K>, build: fn(K) -> ResourceRow) -> Vec<ResourceRow> {
    items.into_iter().map(build).collect()
}

fn sort_rows(rows: &mut [ResourceRow]) {
    rows.sort_by(|left, right| {
        left.namespace
            .cmp(&right.namespace)
            .then_with(|| left.name.cmp(&right.name))
    });
}

fn required_namespace(kind: BuiltinKind, namespace: Option<&str>) -> Result<&str, ResourceError> {
    namespace
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ResourceError::Unsupported(format!("{kind} operations need a namespace")))
}

fn manifest_yaml<K>(mut object: K) -> Result<String, ResourceError>
where
    K: Resource + Serialize,
{
    object.managed_fields_mut().clear();
    serde_yaml::to_string(&object).map_err(|error| ResourceError::Decode(error.to_string()))
}

fn namespaced_row(name: String, namespace: Option<String>, rest: Vec<String>) -> ResourceRow {
    let mut columns = Vec::with_capacity(rest.len() + 2);
    columns.push(namespace.clone().unwrap_or_else(|| PLACEHOLDER.to_string()));
    columns.push(name.clone());
    columns.extend(rest);
    ResourceRow::new(name, namespace, columns)
}

fn cluster_row(name: String, rest: Vec<String>) -> ResourceRow {
    let mut columns = Vec::with_capacity(rest.len() + 1);
    columns.push(name.clone());
    columns.extend(rest);
    ResourceRow::new(name, None, columns)
}

fn or_placeholder(value: Option<String>) -> String {
    value
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

pub(crate) fn pod_row(pod: Pod) -> ResourceRow {
    let status = pod_status_text(&pod);
    let (ready, total, restarts) = pod.status.as_ref().map(pod_readiness).unwrap_or((0, 0, 0));
    let age = human_age(pod.metadata.creation_timestamp.as_ref());

    namespaced_row(
        pod.name_any(),
        pod.namespace(),
        vec![
            format!("{ready}/{total}"),
            status,
            restarts.to_string(),
            age,
        ],
    )
}

fn deployment_row(deployment: Deployment) -> ResourceRow {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let status = deployment.status.as_ref();
    let ready = status.and_then(|status| status.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|status| status.updated_replicas).unwrap_or(0);
    let available = status
        .and_then(|status| status.available_replicas)
        .unwrap_or(0);
    let age = human_age(deployment.metadata.creation_timestamp.as_ref());

    namespaced_row(
        deployment.name_any(),
        deployment.namespace(),
        vec![
            format!("{ready}/{desired}"),
            updated.to_string(),
            available.to_string(),
            age,
        ],
    )
}

fn statefulset_row(statefulset: StatefulSet) -> ResourceRow {
    let desired = statefulset
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let ready = statefulset
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0);
    let age = human_age(statefulset.metadata.creation_timestamp.as_ref());

    namespaced_row(
        statefulset.name_any(),
        statefulset.namespace(),
        vec![format!("{ready}/{desired}"), age],
    )
}

fn daemonset_row(daemonset: DaemonSet) -> ResourceRow {
    let (desired, current, ready) = daemonset
        .status
        .as_ref()
        .map(|status| {
            (
                status.desired_number_scheduled,
                status.current_number_scheduled,
                status.number_ready,
            )
        })
        .unwrap_or((0, 0, 0));
    let age = human_age(daemonset.metadata.creation_timestamp.as_ref());

    namespaced_row(
        daemonset.name_any(),
        daemonset.namespace(),
        vec![
            desired.to_string(),
            current.to_string(),
            ready.to_string(),
            age,
        ],
    )
}

fn replicaset_row(replicaset: ReplicaSet) -> ResourceRow {
    let desired = replicaset
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let current = replicaset
        .status
        .as_ref()
        .map(|status| status.replicas)
        .unwrap_or(0);
    let ready = replicaset
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0);
    let age = human_age(replicaset.metadata.creation_timestamp.as_ref());

    namespaced_row(
        replicaset.name_any(),
        replicaset.namespace(),
        vec![
            desired.to_string(),
            current.to_string(),
            ready.to_string(),
            age,
        ],
    )
}

fn job_row(job: Job) -> ResourceRow {
    let desired = job
        .spec
        .as_ref()
        .and_then(|spec| spec.completions)
        .unwrap_or(1);
    let succeeded = job
        .status
        .as_ref()
        .and_then(|status| status.succeeded)
        .unwrap_or(0);
    let duration = job
        .status
        .as_ref()
        .and_then(|status| {
            let start = status.start_time.as_ref()?;
            let end = status
                .completion_time
                .as_ref()
                .map(|time| time.0.as_second())
                .unwrap_or_else(|| k8s_openapi::jiff::Timestamp::now().as_second());
            Some(format_elapsed_seconds((end - start.0.as_second()).max(0)))
        })
        .unwrap_or_else(|| PLACEHOLDER.to_string());
    let age = human_age(job.metadata.creation_timestamp.as_ref());

    namespaced_row(
        job.name_any(),
        job.namespace(),
        vec![format!("{succeeded}/{desired}"), duration, age],
    )
}

fn cronjob_row(cronjob: CronJob) -> ResourceRow {
    let schedule = cronjob
        .spec
        .as_ref()
        .map(|spec| spec.schedule.clone())
        .unwrap_or_else(|| PLACEHOLDER.to_string());
    let suspended = cronjob
        .spec
        .as_ref()
        .and_then(|spec| spec.suspend)
        .unwrap_or(false);
    let active = cronjob
        .status
        .as_ref()
        .and_then(|status| status.active.as_ref())
        .map(|entries| entries.len())
        .unwrap_or(0);
    let last = cronjob
        .status
        .as_ref()
        .and_then(|status| status.last_schedule_time.as_ref())
        .map_or_else(|| PLACEHOLDER.to_string(), |time| human_age(Some(time)));
    let age = human_age(cronjob.metadata.creation_timestamp.as_ref());

    namespaced_row(
        cronjob.name_any(),
        cronjob.namespace(),
        vec![
            truncate(&schedule, 28),
            if suspended { "True" } else { "False" }.to_string(),
            active.to_string(),
            last,
            age,
        ],
    )
}

fn service_row(service: Service) -> ResourceRow {
    let spec = service.spec.as_ref();
    let service_type = spec
        .and_then(|spec| spec.type_.clone())
        .unwrap_or_else(|| "ClusterIP".to_string());
    let cluster_ip = or_placeholder(spec.and_then(|spec| spec.cluster_ip.clone()));
    let ports = service_ports_summary(&service);
    let age = human_age(service.metadata.creation_timestamp.as_ref());

    namespaced_row(
        service.name_any(),
        service.namespace(),
        vec![service_type, cluster_ip, ports, age],
    )
}

fn ingress_row(ingress: Ingress) -> ResourceRow {
    let class = or_placeholder(
        ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.ingress_class_name.clone()),
    );
    let hosts = ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.rules.as_ref())
        .map(|rules| {
            rules
                .iter()
                .filter_map(|rule| rule.host.clone())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let hosts = if hosts.is_empty() {
        "*".to_string()
    } else {
        truncate(&hosts.join(","), 28)
    };
    let address = ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|entries| {
            entries
                .first()
                .and_then(|entry| entry.ip.clone().or_else(|| entry.hostname.clone()))
        });
    let age = human_age(ingress.metadata.creation_timestamp.as_ref());

    namespaced_row(
        ingress.name_any(),
        ingress.namespace(),
        vec![class, hosts, truncate(&or_placeholder(address), 20), age],
    )
}

fn network_policy_row(policy: NetworkPolicy) -> ResourceRow {
    let selector = policy
        .spec
        .as_ref()
        .and_then(|spec| spec.pod_selector.as_ref())
        .and_then(|selector| selector.match_labels.as_ref())
        .filter(|labels| !labels.is_empty())
        .map(|labels| {
            labels
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_else(|| "<all>".to_string());
    let age = human_age(policy.metadata.creation_timestamp.as_ref());

    namespaced_row(
        policy.name_any(),
        policy.namespace(),
        vec![truncate(&selector, 32), age],
    )
}

fn configmap_row(configmap: ConfigMap) -> ResourceRow {
    let data = configmap.data.as_ref().map(|entries| entries.len()).unwrap_or(0)
        + configmap
            .binary_data
            .as_ref()
            .map(|entries| entries.len())
            .unwrap_or(0);
    let age = human_age(configmap.metadata.creation_timestamp.as_ref());

    namespaced_row(
        configmap.name_any(),
        configmap.namespace(),
        vec![data.to_string(), age],
    )
}

fn secret_row(secret: Secret) -> ResourceRow {
    let secret_type = secret.type_.clone().unwrap_or_else(|| "Opaque".to_string());
    let data = secret.data.as_ref().map(|map| map.len()).unwrap_or(0);
    let age = human_age(secret.metadata.creation_timestamp.as_ref());

    namespaced_row(
        secret.name_any(),
        secret.namespace(),
        vec![truncate(&secret_type, 36), data.to_string(), age],
    )
}

fn pvc_row(pvc: PersistentVolumeClaim) -> ResourceRow {
    let status = or_placeholder(pvc.status.as_ref().and_then(|status| status.phase.clone()));
    let volume = or_placeholder(pvc.spec.as_ref().and_then(|spec| spec.volume_name.clone()));
    let capacity = or_placeholder(
        pvc.status
            .as_ref()
            .and_then(|status| status.capacity.as_ref())
            .and_then(|capacity| capacity.get("storage"))
            .map(|quantity| quantity.0.clone()),
    );
    let age = human_age(pvc.metadata.creation_timestamp.as_ref());

    namespaced_row(
        pvc.name_any(),
        pvc.namespace(),
        vec![status, truncate(&volume, 24), capacity, age],
    )
}

fn event_row(event: Event) -> ResourceRow {
    let event_type = or_placeholder(event.type_.clone());
    let reason = or_placeholder(event.reason.clone());
    let object = format!(
        "{}/{}",
        event
            .involved_object
            .kind
            .as_deref()
            .unwrap_or(PLACEHOLDER)
            .to_ascii_lowercase(),
        event.involved_object.name.as_deref().unwrap_or(PLACEHOLDER)
    );
    let message = or_placeholder(event.message.clone());
    let age = event_age(&event);

    namespaced_row(
        event.name_any(),
        event.namespace(),
        vec![
            event_type,
            reason,
            truncate(&object, 40),
            truncate(&message, 72),
            age,
        ],
    )
}

fn node_row(node: Node) -> ResourceRow {
    let mut status = node
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|condition| condition.type_ == "Ready")
        })
        .map(|condition| match condition.status.as_str() {
            "True" => "Ready".to_string(),
            "False" => "NotReady".to_string(),
            _ => "Unknown".to_string(),
        })
        .unwrap_or_else(|| "Unknown".to_string());
    if node
        .spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false)
    {
        status.push_str(",SchedulingDisabled");
    }
    let version = or_placeholder(
        node.status
            .as_ref()
            .and_then(|status| status.node_info.as_ref())
            .map(|info| info.kubelet_version.clone()),
    );
    let roles = node_roles(&node);
    let age = human_age(node.metadata.creation_timestamp.as_ref());

    cluster_row(node.name_any(), vec![status, roles, version, age])
}

fn namespace_row(namespace: Namespace) -> ResourceRow {
    let phase = namespace
        .status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_else(|| "Active".to_string());
    let age = human_age(namespace.metadata.creation_timestamp.as_ref());

    cluster_row(namespace.name_any(), vec![phase, age])
}

fn persistent_volume_row(pv: PersistentVolume) -> ResourceRow {
    let spec = pv.spec.as_ref();
    let capacity = or_placeholder(
        spec.and_then(|spec| spec.capacity.as_ref())
            .and_then(|capacity| capacity.get("storage"))
            .map(|quantity| quantity.0.clone()),
    );
    let reclaim = or_placeholder(spec.and_then(|spec| spec.persistent_volume_reclaim_policy.clone()));
    let status = or_placeholder(pv.status.as_ref().and_then(|status| status.phase.clone()));
    let claim = spec
        .and_then(|spec| spec.claim_ref.as_ref())
        .map(|claim| {
            format!(
                "{}/{}",
                claim.namespace.as_deref().unwrap_or(PLACEHOLDER),
                claim.name.as_deref().unwrap_or(PLACEHOLDER)
            )
        })
        .unwrap_or_else(|| PLACEHOLDER.to_string());
    let age = human_age(pv.metadata.creation_timestamp.as_ref());

    cluster_row(
        pv.name_any(),
        vec![capacity, reclaim, status, truncate(&claim, 32), age],
    )
}

fn storage_class_row(class: StorageClass) -> ResourceRow {
    let mut name = class.name_any();
    let is_default = class.metadata.annotations.as_ref().is_some_and(|annotations| {
        annotations
            .get("storageclass.kubernetes.io/is-default-class")
            .is_some_and(|value| value == "true")
    });
    let reclaim = class
        .reclaim_policy
        .clone()
        .unwrap_or_else(|| "Delete".to_string());
    let age = human_age(class.metadata.creation_timestamp.as_ref());
    let provisioner = truncate(&class.provisioner, 32);

    let mut row = cluster_row(name.clone(), vec![provisioner, reclaim, age]);
    if is_default {
        name.push_str(" (default)");
        row.columns[0] = name;
    }
    row
}

fn endpoints_row(endpoints: Endpoints) -> ResourceRow {
    let addresses = endpoints
        .subsets
        .as_ref()
        .map(|subsets| {
            subsets
                .iter()
                .flat_map(|subset| {
                    let ports = subset.ports.as_deref().unwrap_or(&[]);
                    subset
                        .addresses
                        .as_deref()
                        .unwrap_or(&[])
                        .iter()
                        .flat_map(move |address| {
                            if ports.is_empty() {
                                vec![address.ip.clone()]
                            } else {
                                ports
                                    .iter()
                                    .map(|port| format!("{}:{}", address.ip, port.port))
                                    .collect()
                            }
                        })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let addresses = if addresses.is_empty() {
        "<none>".to_string()
    } else {
        truncate(&addresses.join(","), 48)
    };
    let age = human_age(endpoints.metadata.creation_timestamp.as_ref());

    namespaced_row(
        endpoints.name_any(),
        endpoints.namespace(),
        vec![addresses, age],
    )
}

fn list_params() -> ListParams {
    ListParams::default().limit(500)
}

fn pod_status_text(pod: &Pod) -> String {
    if pod.metadata.deletion_timestamp.is_some() {
        return "Terminating".to_string();
    }

    let waiting_reason = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .and_then(|statuses| {
            statuses.iter().find_map(|container| {
                let state = container.state.as_ref()?;
                state
                    .waiting
                    .as_ref()
                    .and_then(|waiting| waiting.reason.clone())
                    .or_else(|| {
                        state
                            .terminated
                            .as_ref()
                            .and_then(|terminated| terminated.reason.clone())
                    })
            })
        });

    waiting_reason
        .or_else(|| pod.status.as_ref().and_then(|status| status.phase.clone()))
        .unwrap_or_else(|| "Unknown".to_string())
}

fn pod_readiness(status: &PodStatus) -> (usize, usize, i32) {
    let container_statuses = status.container_statuses.as_deref().unwrap_or(&[]);
    let total = container_statuses.len();
    let ready = container_statuses
        .iter()
        .filter(|container| container.ready)
        .count();
    let restarts = container_statuses
        .iter()
        .map(|container| container.restart_count)
        .sum();

    (ready, total, restarts)
}

fn first_pod_container(pod: &Pod) -> Option<String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .map(|container| container.name.clone())
}

fn service_ports_summary(service: &Service) -> String {
    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|port| {
                    let protocol = port.protocol.as_deref().unwrap_or("TCP");
                    match port.node_port {
                        Some(node_port) => format!("{}:{node_port}/{protocol}", port.port),
                        None => format!("{}/{protocol}", port.port),
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if ports.is_empty() {
        "<none>".to_string()
    } else {
        truncate(&ports.join(","), 32)
    }
}

fn node_roles(node: &Node) -> String {
    let Some(labels) = node.metadata.labels.as_ref() else {
        return "<none>".to_string();
    };

    let mut roles = labels
        .keys()
        .filter_map(|key| key.strip_prefix("node-role.kubernetes.io/"))
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();

    if roles.is_empty()
        && let Some(role) = labels.get("kubernetes.io/role")
    {
        roles.push(role.clone());
    }

    if roles.is_empty() {
        "<none>".to_string()
    } else {
        roles.sort();
        roles.dedup();
        roles.join(",")
    }
}

fn event_age(event: &Event) -> String {
    if let Some(event_time) = event.event_time.as_ref() {
        return human_age_timestamp(event_time.0);
    }

    if let Some(last_timestamp) = event.last_timestamp.as_ref() {
        return human_age(Some(last_timestamp));
    }

    if let Some(first_timestamp) = event.first_timestamp.as_ref() {
        return human_age(Some(first_timestamp));
    }

    human_age(event.metadata.creation_timestamp.as_ref())
}

pub(crate) fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }

    let mut out = value
        .chars()
        .take(max.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn human_age(timestamp: Option<&Time>) -> String {
    let Some(timestamp) = timestamp else {
        return PLACEHOLDER.to_string();
    };

    human_age_timestamp(timestamp.0)
}

fn human_age_timestamp(ts: k8s_openapi::jiff::Timestamp) -> String {
    let elapsed_seconds = (k8s_openapi::jiff::Timestamp::now().as_second() - ts.as_second()).max(0);
    format_elapsed_seconds(elapsed_seconds)
}

pub(crate) fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}

#[cfg(test)]
mod tests {
    use super::{format_elapsed_seconds, node_roles, pod_row, service_row, truncate};
    use crate::model::BuiltinKind;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, Node, Pod, PodStatus, Service,
        ServicePort, ServiceSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;

    fn pod(restarts: i32, waiting: Option<&str>) -> Pod {
        let created = k8s_openapi::jiff::Timestamp::now()
            - k8s_openapi::jiff::SignedDuration::from_secs(7_200);
        Pod {
            metadata: ObjectMeta {
                name: Some("api-0".to_string()),
                namespace: Some("shop".to_string()),
                creation_timestamp: Some(Time(created)),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![
                    ContainerStatus {
                        name: "api".to_string(),
                        ready: true,
                        restart_count: restarts,
                        state: waiting.map(|reason| ContainerState {
                            waiting: Some(ContainerStateWaiting {
                                reason: Some(reason.to_string()),
                                ..ContainerStateWaiting::default()
                            }),
                            ..ContainerState::default()
                        }),
                        ..ContainerStatus::default()
                    },
                    ContainerStatus {
                        name: "sidecar".to_string(),
                        ready: false,
                        restart_count: 1,
                        ..ContainerStatus::default()
                    },
                ]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn pod_row_matches_schema() {
        let row = pod_row(pod(4, None));

        assert_eq!(row.columns.len(), BuiltinKind::Pod.columns().len());
        assert_eq!(row.name, "api-0");
        assert_eq!(row.namespace.as_deref(), Some("shop"));
        assert_eq!(row.columns[0], "shop");
        assert_eq!(row.columns[1], "api-0");
        assert_eq!(row.columns[2], "1/2");
        assert_eq!(row.columns[3], "Running");
        assert_eq!(row.columns[4], "5");
        assert!(row.columns[4].parse::<u64>().is_ok());
        assert_eq!(row.columns[5], "2h");
    }

    #[test]
    fn pod_status_prefers_waiting_reason() {
        let row = pod_row(pod(0, Some("CrashLoopBackOff")));
        assert_eq!(row.columns[3], "CrashLoopBackOff");
    }

    #[test]
    fn pod_without_timestamp_still_has_age() {
        let row = pod_row(Pod::default());
        assert_eq!(row.columns.len(), 6);
        assert_eq!(row.columns[5], "-");
        assert_eq!(row.columns[2], "0/0");
    }

    #[test]
    fn service_row_summarises_ports() {
        let service = Service {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("shop".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                cluster_ip: Some("10.0.0.7".to_string()),
                ports: Some(vec![ServicePort {
                    port: 80,
                    node_port: Some(30080),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        };

        let row = service_row(service);
        assert_eq!(row.columns.len(), BuiltinKind::Service.columns().len());
        assert_eq!(row.columns[2], "NodePort");
        assert_eq!(row.columns[3], "10.0.0.7");
        assert_eq!(row.columns[4], "80:30080/TCP");
    }

    #[test]
    fn node_roles_read_role_labels() {
        let mut labels = BTreeMap::new();
        labels.insert(
            "node-role.kubernetes.io/control-plane".to_string(),
            String::new(),
        );
        labels.insert("node-role.kubernetes.io/etcd".to_string(), String::new());
        let node = Node {
            metadata: ObjectMeta {
                labels: Some(labels),
                ..ObjectMeta::default()
            },
            ..Node::default()
        };

        assert_eq!(node_roles(&node), "control-plane,etcd");
        assert_eq!(node_roles(&Node::default()), "<none>");
    }

    #[test]
    fn elapsed_seconds_use_largest_unit() {
        assert_eq!(format_elapsed_seconds(42), "42s");
        assert_eq!(format_elapsed_seconds(125), "2m");
        assert_eq!(format_elapsed_seconds(3 * 3_600 + 5), "3h");
        assert_eq!(format_elapsed_seconds(2 * 86_400), "2d");
    }

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
