//! In-process provider
//!
//! [`LocalProvider`] is the provider capability itself: it translates
//! deployments into manifests, applies them through a [`ClusterDriver`], and
//! reads the applied state back out of the cluster.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Container, Service as KubeService};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::driver::{apply_manifest, SharedDriver};
use super::manifest::{
    build_manifest, build_manifest_reusing, namespace_for, TranslatorSettings, Workload,
    NODE_PORT_SUFFIX, SERVICE_LABEL, STORAGE_ATTRIBUTE_CLASS, STORAGE_ATTRIBUTE_PERSISTENT,
};
use super::resources::{aggregate, parse_quantity};
use crate::api::{
    ApiVersion, ComputeResources, Deployment, DeploymentId, DeploymentState, Port, ProviderApi,
    ReplicasStatus, ResourcesStatistics, Service, ServiceEvent, ServiceLog, PROVIDER_API_VERSION,
};
use crate::error::{Error, Result};

/// Provider capability backed by a cluster driver
pub struct LocalProvider {
    driver: SharedDriver,
    settings: TranslatorSettings,
    expose_ip: String,
    session: Uuid,
}

impl LocalProvider {
    /// Create a new provider over a cluster driver
    pub fn new(driver: SharedDriver) -> Self {
        Self {
            driver,
            settings: TranslatorSettings::default(),
            expose_ip: String::new(),
            session: Uuid::new_v4(),
        }
    }

    /// Set the translation settings
    pub fn with_settings(mut self, settings: TranslatorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the public IP reported on deployments
    pub fn with_expose_ip(mut self, ip: impl Into<String>) -> Self {
        self.expose_ip = ip.into();
        self
    }

    async fn workloads(&self, id: &DeploymentId) -> Result<Vec<Workload>> {
        Ok(self.driver.list_workloads(&namespace_for(id)).await?)
    }
}

fn first_container(workload: &Workload) -> Option<&Container> {
    workload
        .template()
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
}

fn replicas_status(workload: &Workload) -> ReplicasStatus {
    match workload {
        Workload::Deployment(d) => d
            .status
            .as_ref()
            .map(|s| ReplicasStatus {
                total_replicas: s.replicas.unwrap_or(0),
                ready_replicas: s.ready_replicas.unwrap_or(0),
                available_replicas: s.available_replicas.unwrap_or(0),
            })
            .unwrap_or_default(),
        Workload::StatefulSet(s) => s
            .status
            .as_ref()
            .map(|s| ReplicasStatus {
                total_replicas: s.replicas,
                ready_replicas: s.ready_replicas.unwrap_or(0),
                available_replicas: s.available_replicas.unwrap_or(0),
            })
            .unwrap_or_default(),
    }
}

/// Compute resources read back from a container's limits and, for
/// StatefulSets, the volume claim templates
fn compute_resources(workload: &Workload, container: &Container) -> ComputeResources {
    let limits = container.resources.as_ref().and_then(|r| r.limits.as_ref());
    let limit = |key: &str| {
        limits
            .and_then(|l| l.get(key))
            .and_then(|q| parse_quantity(&q.0))
            .unwrap_or(0.0)
    };

    let mut resources = ComputeResources {
        cpu: limit("cpu"),
        memory: (limit("memory") / 1_000_000.0) as i64,
        storage: (limit("ephemeral-storage") / 1_000_000.0) as i64,
        storage_attributes: BTreeMap::new(),
    };

    if let Workload::StatefulSet(set) = workload {
        let claim = set
            .spec
            .as_ref()
            .and_then(|s| s.volume_claim_templates.as_ref())
            .and_then(|claims| claims.first())
            .and_then(|c| c.spec.as_ref());
        if let Some(claim) = claim {
            let requested = claim
                .resources
                .as_ref()
                .and_then(|r| r.requests.as_ref())
                .and_then(|r| r.get("storage"))
                .and_then(|q| parse_quantity(&q.0))
                .unwrap_or(0.0);
            resources.storage = (requested / 1_000_000.0) as i64;
            resources
                .storage_attributes
                .insert(STORAGE_ATTRIBUTE_PERSISTENT.to_string(), "true".to_string());
            if let Some(class) = &claim.storage_class_name {
                resources
                    .storage_attributes
                    .insert(STORAGE_ATTRIBUTE_CLASS.to_string(), class.clone());
            }
        }
    }

    resources
}

/// Ports of every workload, keyed by workload name. Local and node-port
/// Services of the same workload are merged.
fn ports_by_workload(services: &[KubeService]) -> HashMap<String, Vec<Port>> {
    let mut ports: HashMap<String, Vec<Port>> = HashMap::new();

    for service in services {
        let Some(name) = service.metadata.name.as_deref() else {
            continue;
        };
        let Some(spec) = service.spec.as_ref() else {
            continue;
        };
        let workload = name.strip_suffix(NODE_PORT_SUFFIX).unwrap_or(name);
        let internal = spec.type_.as_deref() != Some("NodePort");

        for port in spec.ports.iter().flatten() {
            let target = match &port.target_port {
                Some(IntOrString::Int(p)) => *p,
                _ => port.port,
            };
            ports.entry(workload.to_string()).or_default().push(Port {
                protocol: port.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                port: target,
                expose_port: port.node_port.unwrap_or(0),
                internal,
            });
        }
    }

    ports
}

fn service_from_workload(workload: &Workload, ports: &mut HashMap<String, Vec<Port>>) -> Service {
    let name = workload.name().to_string();
    let mut service = Service {
        name: name.clone(),
        status: replicas_status(workload),
        ports: ports.remove(&name).unwrap_or_default(),
        ..Default::default()
    };

    if let Some(container) = first_container(workload) {
        service.image = container.image.clone().unwrap_or_default();
        service.arguments = container.args.clone().unwrap_or_default();
        service.env = container
            .env
            .iter()
            .flatten()
            .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
            .collect();
        service.compute_resources = compute_resources(workload, container);
    }

    service
}

fn pod_label(labels: Option<&BTreeMap<String, String>>) -> Option<String> {
    labels.and_then(|l| l.get(SERVICE_LABEL)).cloned()
}

#[async_trait]
impl ProviderApi for LocalProvider {
    async fn version(&self) -> Result<ApiVersion> {
        Ok(PROVIDER_API_VERSION)
    }

    async fn session(&self) -> Result<Uuid> {
        Ok(self.session)
    }

    async fn get_statistics(&self) -> Result<ResourcesStatistics> {
        let nodes = self.driver.node_resources().await?;
        aggregate(&nodes)
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment> {
        let ns = namespace_for(id);
        let workloads = self.driver.list_workloads(&ns).await?;
        if workloads.is_empty() {
            return Err(Error::not_found(format!("deployment {}", id)));
        }

        let mut ports = ports_by_workload(&self.driver.list_services(&ns).await?);
        let services = workloads
            .iter()
            .map(|w| service_from_workload(w, &mut ports))
            .collect();

        Ok(Deployment {
            id: id.clone(),
            state: DeploymentState::Active,
            services,
            provider_expose_ip: self.expose_ip.clone(),
            updated_at: Utc::now(),
            ..Default::default()
        })
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        let manifest = build_manifest(deployment, &self.settings)?;

        if !self.workloads(&deployment.id).await?.is_empty() {
            return Err(Error::conflict(format!(
                "deployment {} already exist",
                deployment.id
            )));
        }

        info!(
            "Creating deployment {} in namespace {}",
            deployment.id,
            manifest.namespace_name()
        );
        apply_manifest(self.driver.as_ref(), &manifest).await?;
        Ok(())
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        let existing: Vec<String> = self
            .workloads(&deployment.id)
            .await?
            .iter()
            .map(|w| w.name().to_string())
            .collect();
        if existing.is_empty() {
            return Err(Error::conflict(format!(
                "deployment {} do not exist",
                deployment.id
            )));
        }

        let manifest = build_manifest_reusing(deployment, &self.settings, &existing)?;
        info!(
            "Updating deployment {} in namespace {}",
            deployment.id,
            manifest.namespace_name()
        );
        apply_manifest(self.driver.as_ref(), &manifest).await?;
        Ok(())
    }

    async fn close_deployment(&self, deployment: &Deployment) -> Result<()> {
        let ns = namespace_for(&deployment.id);
        info!("Closing deployment {}, deleting namespace {}", deployment.id, ns);
        self.driver.delete_namespace(&ns).await?;
        Ok(())
    }

    async fn get_logs(&self, id: &DeploymentId) -> Result<Vec<ServiceLog>> {
        let ns = namespace_for(id);
        let workloads = self.driver.list_workloads(&ns).await?;
        let pods = self.driver.list_pods(&ns).await?;

        let mut logs: Vec<ServiceLog> = workloads
            .iter()
            .map(|w| ServiceLog {
                service_name: w.name().to_string(),
                logs: Vec::new(),
            })
            .collect();

        for pod in &pods {
            let (Some(pod_name), Some(service)) = (
                pod.metadata.name.as_deref(),
                pod_label(pod.metadata.labels.as_ref()),
            ) else {
                continue;
            };
            let Some(entry) = logs.iter_mut().find(|l| l.service_name == service) else {
                continue;
            };
            match self.driver.pod_logs(&ns, pod_name).await {
                Ok(text) => entry.logs.push(text),
                Err(e) => warn!("Failed to read logs of pod {}: {}", pod_name, e),
            }
        }

        Ok(logs)
    }

    async fn get_events(&self, id: &DeploymentId) -> Result<Vec<ServiceEvent>> {
        let ns = namespace_for(id);
        let workloads = self.driver.list_workloads(&ns).await?;
        let pods = self.driver.list_pods(&ns).await?;
        let events = self.driver.list_events(&ns).await?;

        // object name -> workload it belongs to
        let mut owners: HashMap<String, String> = workloads
            .iter()
            .map(|w| (w.name().to_string(), w.name().to_string()))
            .collect();
        for pod in &pods {
            if let (Some(name), Some(service)) = (
                pod.metadata.name.clone(),
                pod_label(pod.metadata.labels.as_ref()),
            ) {
                owners.insert(name, service);
            }
        }

        let mut grouped: Vec<ServiceEvent> = workloads
            .iter()
            .map(|w| ServiceEvent {
                service_name: w.name().to_string(),
                events: Vec::new(),
            })
            .collect();

        for event in events {
            let owner = event
                .involved_object
                .name
                .as_ref()
                .and_then(|name| owners.get(name));
            let (Some(owner), Some(message)) = (owner, event.message) else {
                continue;
            };
            if let Some(entry) = grouped.iter_mut().find(|e| &e.service_name == owner) {
                entry.events.push(message);
            }
        }

        debug!("Collected events for {} services of {}", grouped.len(), id);
        Ok(grouped)
    }
}
