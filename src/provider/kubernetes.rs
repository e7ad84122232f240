//! Kubernetes cluster driver

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment as KubeDeployment, StatefulSet};
use k8s_openapi::api::core::v1::{Event, Namespace, Node, Pod, Service as KubeService};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::driver::{ClusterDriver, DriverError, DriverResult};
use super::manifest::{Workload, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SERVICE_LABEL};
use super::resources::{node_resources, NodeResources};

impl From<kube::Error> for DriverError {
    fn from(e: kube::Error) -> Self {
        DriverError::Api(e.to_string())
    }
}

/// Driver backed by a Kubernetes API server
#[derive(Clone)]
pub struct KubeDriver {
    client: Client,
}

impl KubeDriver {
    /// Create a new driver around an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using a kubeconfig file, or the in-cluster / default
    /// configuration when no path is given
    pub async fn connect(kube_config_path: Option<&str>) -> DriverResult<Self> {
        let client = match kube_config_path.filter(|p| !p.is_empty()) {
            Some(path) => {
                let path = shellexpand::tilde(path).into_owned();
                info!("Loading kubeconfig from {}", path);
                let kubeconfig = Kubeconfig::read_from(&path)
                    .map_err(|e| DriverError::Config(format!("{}: {}", path, e)))?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| DriverError::Config(e.to_string()))?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };

        Ok(Self::new(client))
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn managed_selector() -> String {
    format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE)
}

/// Get the object; replace it keeping the server's resource version when it
/// exists, create it otherwise. `merge` copies over fields the server owns.
async fn apply_object<K, F>(api: &Api<K>, mut object: K, merge: F) -> DriverResult<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    F: FnOnce(&K, &mut K),
{
    let name = object
        .meta()
        .name
        .clone()
        .ok_or_else(|| DriverError::Api("object without a name".to_string()))?;

    match api.get_opt(&name).await? {
        Some(existing) => {
            object.meta_mut().resource_version = existing.meta().resource_version.clone();
            merge(&existing, &mut object);
            api.replace(&name, &PostParams::default(), &object).await?;
            debug!("Replaced {}", name);
        }
        None => {
            api.create(&PostParams::default(), &object).await?;
            debug!("Created {}", name);
        }
    }

    Ok(())
}

fn namespace_of<K: Resource>(object: &K) -> DriverResult<String> {
    object
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| DriverError::Api("object without a namespace".to_string()))
}

fn is_stale<K: Resource>(object: &K, keep: &[String]) -> bool {
    object
        .meta()
        .labels
        .as_ref()
        .and_then(|l| l.get(SERVICE_LABEL))
        .is_some_and(|svc| !keep.contains(svc))
}

async fn prune_kind<K>(api: &Api<K>, keep: &[String]) -> DriverResult<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let objects = api.list(&ListParams::default().labels(SERVICE_LABEL)).await?;
    for object in objects.items.iter().filter(|o| is_stale(*o, keep)) {
        if let Some(name) = object.meta().name.as_deref() {
            debug!("Pruning {}", name);
            api.delete(name, &DeleteParams::default()).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl ClusterDriver for KubeDriver {
    async fn apply_namespace(&self, namespace: &Namespace) -> DriverResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        apply_object(&api, namespace.clone(), |_, _| {}).await
    }

    async fn apply_network_policy(&self, policy: &NetworkPolicy) -> DriverResult<()> {
        let api: Api<NetworkPolicy> = self.namespaced(&namespace_of(policy)?);
        apply_object(&api, policy.clone(), |_, _| {}).await
    }

    async fn apply_workload(&self, workload: &Workload) -> DriverResult<()> {
        match workload {
            Workload::Deployment(d) => {
                let api: Api<KubeDeployment> = self.namespaced(&namespace_of(d)?);
                apply_object(&api, d.clone(), |_, _| {}).await
            }
            Workload::StatefulSet(s) => {
                let api: Api<StatefulSet> = self.namespaced(&namespace_of(s)?);
                // volume claim templates are immutable once created
                apply_object(&api, s.clone(), |existing, desired| {
                    if let (Some(old), Some(new)) = (existing.spec.as_ref(), desired.spec.as_mut())
                    {
                        new.volume_claim_templates = old.volume_claim_templates.clone();
                    }
                })
                .await
            }
        }
    }

    async fn apply_service(&self, service: &KubeService) -> DriverResult<()> {
        let api: Api<KubeService> = self.namespaced(&namespace_of(service)?);
        apply_object(&api, service.clone(), |existing, desired| {
            let (Some(old), Some(new)) = (existing.spec.as_ref(), desired.spec.as_mut()) else {
                return;
            };
            new.cluster_ip = old.cluster_ip.clone();
            new.cluster_ips = old.cluster_ips.clone();
            let old_ports = old.ports.clone().unwrap_or_default();
            for port in new.ports.iter_mut().flatten() {
                if port.node_port.is_none() {
                    port.node_port = old_ports
                        .iter()
                        .find(|p| p.port == port.port)
                        .and_then(|p| p.node_port);
                }
            }
        })
        .await
    }

    async fn list_workloads(&self, namespace: &str) -> DriverResult<Vec<Workload>> {
        let params = ListParams::default().labels(&managed_selector());

        let deployments: Api<KubeDeployment> = self.namespaced(namespace);
        let sets: Api<StatefulSet> = self.namespaced(namespace);

        let mut workloads: Vec<Workload> = deployments
            .list(&params)
            .await?
            .items
            .into_iter()
            .map(Workload::Deployment)
            .collect();
        workloads.extend(
            sets.list(&params)
                .await?
                .items
                .into_iter()
                .map(Workload::StatefulSet),
        );
        Ok(workloads)
    }

    async fn list_services(&self, namespace: &str) -> DriverResult<Vec<KubeService>> {
        let api: Api<KubeService> = self.namespaced(namespace);
        Ok(api
            .list(&ListParams::default().labels(&managed_selector()))
            .await?
            .items)
    }

    async fn list_pods(&self, namespace: &str) -> DriverResult<Vec<Pod>> {
        let api: Api<Pod> = self.namespaced(namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> DriverResult<String> {
        let api: Api<Pod> = self.namespaced(namespace);
        Ok(api.logs(pod, &LogParams::default()).await?)
    }

    async fn list_events(&self, namespace: &str) -> DriverResult<Vec<Event>> {
        let api: Api<Event> = self.namespaced(namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn prune(&self, namespace: &str, keep: &[String]) -> DriverResult<()> {
        prune_kind(&self.namespaced::<KubeDeployment>(namespace), keep).await?;
        prune_kind(&self.namespaced::<StatefulSet>(namespace), keep).await?;
        prune_kind(&self.namespaced::<KubeService>(namespace), keep).await?;
        prune_kind(&self.namespaced::<NetworkPolicy>(namespace), keep).await
    }

    async fn delete_namespace(&self, namespace: &str) -> DriverResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(namespace).await?.is_none() {
            return Ok(());
        }
        api.delete(namespace, &DeleteParams::default()).await?;
        info!("Deleted namespace {}", namespace);
        Ok(())
    }

    async fn node_resources(&self) -> DriverResult<Vec<NodeResources>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let pods: Api<Pod> = Api::all(self.client.clone());

        let nodes = nodes.list(&ListParams::default()).await?.items;
        let pods = pods
            .list(&ListParams::default().fields("status.phase!=Succeeded,status.phase!=Failed"))
            .await?
            .items;

        Ok(nodes.iter().map(|n| node_resources(n, &pods)).collect())
    }
}
