//! Cluster driver contract
//!
//! The provider never talks to a cluster directly; it goes through a
//! [`ClusterDriver`]. Every apply is get-then-create-or-replace, and deleting
//! the namespace is the only teardown. [`MemoryCluster`] keeps objects in
//! memory for tests and `driver: memory` runs; the Kubernetes implementation
//! lives in [`super::kubernetes`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{DeploymentStatus, StatefulSetStatus};
use k8s_openapi::api::core::v1::{
    Event, Namespace, Node, NodeStatus, ObjectReference, Pod, PodStatus, Service as KubeService,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::Mutex;
use tracing::debug;

use super::manifest::{ClusterManifest, Workload, SERVICE_LABEL};
use super::resources::{node_resources, NodeResources};
use crate::error::Error;

/// Errors raised by cluster drivers
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("cluster object not found: {0}")]
    NotFound(String),

    #[error("cluster api error: {0}")]
    Api(String),

    #[error("cluster configuration error: {0}")]
    Config(String),
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::NotFound(what) => Error::NotFound(what),
            other => Error::Upstream(other.to_string()),
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Operations a provider needs from its backing cluster
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    async fn apply_namespace(&self, namespace: &Namespace) -> DriverResult<()>;

    async fn apply_network_policy(&self, policy: &NetworkPolicy) -> DriverResult<()>;

    async fn apply_workload(&self, workload: &Workload) -> DriverResult<()>;

    async fn apply_service(&self, service: &KubeService) -> DriverResult<()>;

    /// Deployments and StatefulSets in a namespace
    async fn list_workloads(&self, namespace: &str) -> DriverResult<Vec<Workload>>;

    async fn list_services(&self, namespace: &str) -> DriverResult<Vec<KubeService>>;

    async fn list_pods(&self, namespace: &str) -> DriverResult<Vec<Pod>>;

    async fn pod_logs(&self, namespace: &str, pod: &str) -> DriverResult<String>;

    async fn list_events(&self, namespace: &str) -> DriverResult<Vec<Event>>;

    /// Delete service-labelled objects whose service is not in `keep`
    async fn prune(&self, namespace: &str, keep: &[String]) -> DriverResult<()>;

    /// Delete a namespace and, by cascade, everything in it. Missing
    /// namespaces are not an error.
    async fn delete_namespace(&self, namespace: &str) -> DriverResult<()>;

    async fn node_resources(&self) -> DriverResult<Vec<NodeResources>>;
}

pub type SharedDriver = Arc<dyn ClusterDriver>;

/// Apply a manifest in order: namespace, network policies, then per service
/// the workload followed by its local and global Services. Workloads from
/// earlier applies that the manifest no longer names are pruned.
pub async fn apply_manifest(
    driver: &dyn ClusterDriver,
    manifest: &ClusterManifest,
) -> DriverResult<()> {
    let ns = manifest.namespace_name();
    debug!(
        "Applying manifest for deployment {} in namespace {}",
        manifest.deployment_id, ns
    );

    driver.apply_namespace(&manifest.namespace).await?;
    for policy in &manifest.network_policies {
        driver.apply_network_policy(policy).await?;
    }

    for service in &manifest.services {
        driver.apply_workload(&service.workload).await?;
        if let Some(local) = &service.local_service {
            driver.apply_service(local).await?;
        }
        if let Some(global) = &service.global_service {
            driver.apply_service(global).await?;
        }
        debug!("Applied {} {}", service.workload.kind(), service.name);
    }

    let keep: Vec<String> = manifest.services.iter().map(|s| s.name.clone()).collect();
    driver.prune(ns, &keep).await
}

// ============================================================================
// In-memory driver
// ============================================================================

const FIRST_NODE_PORT: i32 = 30000;

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeMap<String, Namespace>,
    policies: BTreeMap<(String, String), NetworkPolicy>,
    workloads: BTreeMap<(String, String), Workload>,
    services: BTreeMap<(String, String), KubeService>,
    pods: BTreeMap<(String, String), Pod>,
    logs: HashMap<(String, String), String>,
    events: BTreeMap<String, Vec<Event>>,
    nodes: Vec<Node>,
    next_node_port: i32,
}

/// Cluster driver that keeps every object in memory.
///
/// Applied workloads become ready immediately with one running pod each, and
/// NodePort Services are assigned ports from 30000 upward.
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

fn key_of(meta: &ObjectMeta) -> DriverResult<(String, String)> {
    match (&meta.namespace, &meta.name) {
        (Some(ns), Some(name)) => Ok((ns.clone(), name.clone())),
        _ => Err(DriverError::Api(
            "object is missing its namespace or name".to_string(),
        )),
    }
}

fn service_label(meta: &ObjectMeta) -> Option<&String> {
    meta.labels.as_ref().and_then(|l| l.get(SERVICE_LABEL))
}

impl MemoryCluster {
    /// Create a new empty in-memory cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with capacity equal to allocatable
    pub fn with_node(
        mut self,
        name: &str,
        cpu_cores: f64,
        memory_bytes: u64,
        storage_bytes: u64,
    ) -> Self {
        let milli_cpu = (cpu_cores * 1000.0) as u64;
        let quantities = BTreeMap::from([
            ("cpu".to_string(), Quantity(format!("{}m", milli_cpu))),
            ("memory".to_string(), Quantity(memory_bytes.to_string())),
            (
                "ephemeral-storage".to_string(),
                Quantity(storage_bytes.to_string()),
            ),
        ]);
        let node = Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                capacity: Some(quantities.clone()),
                allocatable: Some(quantities),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.state.get_mut().nodes.push(node);
        self
    }

    /// Append log output for a pod
    pub async fn push_log(&self, namespace: &str, pod: &str, text: &str) {
        let mut state = self.state.lock().await;
        state
            .logs
            .entry((namespace.to_string(), pod.to_string()))
            .or_default()
            .push_str(text);
    }

    /// Record a cluster event about a pod
    pub async fn push_event(&self, namespace: &str, pod: &str, message: &str) {
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let event = Event {
            metadata: ObjectMeta {
                name: Some(format!("{}.{}", pod, stamp)),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some(pod.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            message: Some(message.to_string()),
            ..Default::default()
        };
        let mut state = self.state.lock().await;
        state.events.entry(namespace.to_string()).or_default().push(event);
    }

    /// Names of every namespace
    pub async fn namespaces(&self) -> Vec<String> {
        self.state.lock().await.namespaces.keys().cloned().collect()
    }
}

fn mark_ready(workload: &mut Workload) -> i32 {
    match workload {
        Workload::Deployment(d) => {
            let replicas = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            d.status = Some(DeploymentStatus {
                replicas: Some(replicas),
                ready_replicas: Some(replicas),
                available_replicas: Some(replicas),
                ..Default::default()
            });
            replicas
        }
        Workload::StatefulSet(s) => {
            let replicas = s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            s.status = Some(StatefulSetStatus {
                replicas: replicas.into(),
                ready_replicas: Some(replicas),
                available_replicas: Some(replicas),
                ..Default::default()
            });
            replicas
        }
    }
}

#[async_trait]
impl ClusterDriver for MemoryCluster {
    async fn apply_namespace(&self, namespace: &Namespace) -> DriverResult<()> {
        let name = namespace
            .metadata
            .name
            .clone()
            .ok_or_else(|| DriverError::Api("namespace without a name".to_string()))?;
        self.state.lock().await.namespaces.insert(name, namespace.clone());
        Ok(())
    }

    async fn apply_network_policy(&self, policy: &NetworkPolicy) -> DriverResult<()> {
        let key = key_of(&policy.metadata)?;
        self.state.lock().await.policies.insert(key, policy.clone());
        Ok(())
    }

    async fn apply_workload(&self, workload: &Workload) -> DriverResult<()> {
        let mut workload = workload.clone();
        let meta = match &workload {
            Workload::Deployment(d) => d.metadata.clone(),
            Workload::StatefulSet(s) => s.metadata.clone(),
        };
        let (ns, name) = key_of(&meta)?;
        let replicas = mark_ready(&mut workload);

        let mut state = self.state.lock().await;
        if !state.namespaces.contains_key(&ns) {
            return Err(DriverError::NotFound(format!("namespace {}", ns)));
        }

        let node_name = state.nodes.first().and_then(|n| n.metadata.name.clone());
        let template = workload.template().clone();
        state
            .pods
            .retain(|(pod_ns, pod), _| !(pod_ns == &ns && pod.starts_with(&format!("{}-", name))));
        for idx in 0..replicas {
            let pod_name = format!("{}-{}", name, idx);
            let mut spec = template.spec.clone().unwrap_or_default();
            spec.node_name = node_name.clone();
            let pod = Pod {
                metadata: ObjectMeta {
                    name: Some(pod_name.clone()),
                    namespace: Some(ns.clone()),
                    labels: template.metadata.as_ref().and_then(|m| m.labels.clone()),
                    ..Default::default()
                },
                spec: Some(spec),
                status: Some(PodStatus {
                    phase: Some("Running".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            state.pods.insert((ns.clone(), pod_name), pod);
        }

        state.workloads.insert((ns, name), workload);
        Ok(())
    }

    async fn apply_service(&self, service: &KubeService) -> DriverResult<()> {
        let key = key_of(&service.metadata)?;
        let mut service = service.clone();

        let mut state = self.state.lock().await;
        if state.next_node_port == 0 {
            state.next_node_port = FIRST_NODE_PORT;
        }

        let previous_ports = state
            .services
            .get(&key)
            .and_then(|s| s.spec.as_ref())
            .and_then(|s| s.ports.clone())
            .unwrap_or_default();

        if let Some(spec) = service.spec.as_mut() {
            if spec.type_.as_deref() == Some("NodePort") {
                for port in spec.ports.iter_mut().flatten() {
                    let kept = previous_ports
                        .iter()
                        .find(|p| p.port == port.port)
                        .and_then(|p| p.node_port);
                    port.node_port = match kept {
                        Some(node_port) => Some(node_port),
                        None => {
                            let assigned = state.next_node_port;
                            state.next_node_port += 1;
                            Some(assigned)
                        }
                    };
                }
            }
        }

        state.services.insert(key, service);
        Ok(())
    }

    async fn list_workloads(&self, namespace: &str) -> DriverResult<Vec<Workload>> {
        let state = self.state.lock().await;
        Ok(state
            .workloads
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, w)| w.clone())
            .collect())
    }

    async fn list_services(&self, namespace: &str) -> DriverResult<Vec<KubeService>> {
        let state = self.state.lock().await;
        Ok(state
            .services
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> DriverResult<Vec<Pod>> {
        let state = self.state.lock().await;
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> DriverResult<String> {
        let state = self.state.lock().await;
        let key = (namespace.to_string(), pod.to_string());
        if !state.pods.contains_key(&key) {
            return Err(DriverError::NotFound(format!("pod {}/{}", namespace, pod)));
        }
        Ok(state.logs.get(&key).cloned().unwrap_or_default())
    }

    async fn list_events(&self, namespace: &str) -> DriverResult<Vec<Event>> {
        let state = self.state.lock().await;
        Ok(state.events.get(namespace).cloned().unwrap_or_default())
    }

    async fn prune(&self, namespace: &str, keep: &[String]) -> DriverResult<()> {
        let stale = |ns: &String, meta: &ObjectMeta| {
            ns == namespace && service_label(meta).is_some_and(|svc| !keep.contains(svc))
        };

        let mut state = self.state.lock().await;
        state.workloads.retain(|(ns, _), w| {
            let meta = match w {
                Workload::Deployment(d) => &d.metadata,
                Workload::StatefulSet(s) => &s.metadata,
            };
            !stale(ns, meta)
        });
        state.services.retain(|(ns, _), s| !stale(ns, &s.metadata));
        state.policies.retain(|(ns, _), p| !stale(ns, &p.metadata));
        state.pods.retain(|(ns, _), p| !stale(ns, &p.metadata));
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> DriverResult<()> {
        let mut state = self.state.lock().await;
        state.namespaces.remove(namespace);
        state.policies.retain(|(ns, _), _| ns != namespace);
        state.workloads.retain(|(ns, _), _| ns != namespace);
        state.services.retain(|(ns, _), _| ns != namespace);
        state.pods.retain(|(ns, _), _| ns != namespace);
        state.logs.retain(|(ns, _), _| ns != namespace);
        state.events.remove(namespace);
        Ok(())
    }

    async fn node_resources(&self) -> DriverResult<Vec<NodeResources>> {
        let state = self.state.lock().await;
        let pods: Vec<Pod> = state.pods.values().cloned().collect();
        Ok(state.nodes.iter().map(|n| node_resources(n, &pods)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Deployment, Port, Service};
    use crate::provider::manifest::{build_manifest, build_manifest_reusing, TranslatorSettings};

    fn deployment() -> Deployment {
        Deployment::new("p1")
            .with_id("d1")
            .with_service(
                Service::new("nginx")
                    .with_resources(0.5, 256, 0)
                    .with_port(Port::tcp(80)),
            )
    }

    #[tokio::test]
    async fn test_apply_manifest_creates_objects() {
        let cluster = MemoryCluster::new().with_node("node-0", 4.0, 8_000_000_000, 0);
        let manifest = build_manifest(&deployment(), &TranslatorSettings::default()).unwrap();
        let ns = manifest.namespace_name().to_string();

        apply_manifest(&cluster, &manifest).await.unwrap();

        assert_eq!(cluster.namespaces().await, vec![ns.clone()]);
        assert_eq!(cluster.list_workloads(&ns).await.unwrap().len(), 1);
        assert_eq!(cluster.list_pods(&ns).await.unwrap().len(), 1);

        let services = cluster.list_services(&ns).await.unwrap();
        let ports = services[0].spec.as_ref().unwrap().ports.clone().unwrap();
        assert_eq!(ports[0].node_port, Some(FIRST_NODE_PORT));

        let nodes = cluster.node_resources().await.unwrap();
        assert_eq!(nodes[0].allocated.cpu, 0.5);
    }

    #[tokio::test]
    async fn test_reapply_keeps_node_port_and_prunes_stale_workloads() {
        let cluster = MemoryCluster::new();
        let first = build_manifest(&deployment(), &TranslatorSettings::default()).unwrap();
        let ns = first.namespace_name().to_string();
        apply_manifest(&cluster, &first).await.unwrap();

        let names = vec![first.services[0].name.clone()];
        let second =
            build_manifest_reusing(&deployment(), &TranslatorSettings::default(), &names).unwrap();
        apply_manifest(&cluster, &second).await.unwrap();
        let services = cluster.list_services(&ns).await.unwrap();
        assert_eq!(services.len(), 1);
        let ports = services[0].spec.as_ref().unwrap().ports.clone().unwrap();
        assert_eq!(ports[0].node_port, Some(FIRST_NODE_PORT));

        // a fresh name replaces the old workload
        let third = build_manifest(&deployment(), &TranslatorSettings::default()).unwrap();
        apply_manifest(&cluster, &third).await.unwrap();
        let workloads = cluster.list_workloads(&ns).await.unwrap();
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].name(), third.services[0].name);
    }

    #[tokio::test]
    async fn test_delete_namespace_cascades() {
        let cluster = MemoryCluster::new();
        let manifest = build_manifest(&deployment(), &TranslatorSettings::default()).unwrap();
        let ns = manifest.namespace_name().to_string();
        apply_manifest(&cluster, &manifest).await.unwrap();

        cluster.delete_namespace(&ns).await.unwrap();
        assert!(cluster.namespaces().await.is_empty());
        assert!(cluster.list_workloads(&ns).await.unwrap().is_empty());
        assert!(cluster.list_services(&ns).await.unwrap().is_empty());

        // deleting again is fine
        cluster.delete_namespace(&ns).await.unwrap();
    }

    #[tokio::test]
    async fn test_workload_requires_namespace() {
        let cluster = MemoryCluster::new();
        let manifest = build_manifest(&deployment(), &TranslatorSettings::default()).unwrap();
        let err = cluster
            .apply_workload(&manifest.services[0].workload)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::NotFound(_)));
    }
}
