//! Manifest translation
//!
//! Turns an abstract [`Deployment`] into the Kubernetes objects a provider
//! applies: one namespace per deployment, a network policy set, and per
//! service a workload (Deployment or StatefulSet) plus optional cluster-local
//! and node-port Services. Translation is pure; nothing here talks to a
//! cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    Deployment as KubeDeployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, LocalObjectReference, Namespace, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext,
    Service as KubeService, ServicePort, ServiceSpec, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::api::{Deployment, DeploymentId, Service};
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Replica count for every workload; multi-replica scheduling is not supported
pub const POD_REPLICAS: i32 = 1;

/// Suffix of the node-port Service built for globally exposed ports
pub const NODE_PORT_SUFFIX: &str = "-np";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "fleetplane";
pub const SERVICE_LABEL: &str = "fleetplane.io/service";
pub const DEPLOYMENT_ANNOTATION: &str = "fleetplane.io/deployment-id";
pub const OWNER_ANNOTATION: &str = "fleetplane.io/owner";

pub const STORAGE_ATTRIBUTE_PERSISTENT: &str = "persistent";
pub const STORAGE_ATTRIBUTE_CLASS: &str = "class";
pub const STORAGE_ATTRIBUTE_MOUNT: &str = "mount";
pub const STORAGE_ATTRIBUTE_NAME: &str = "name";
pub const STORAGE_CLASS_DEFAULT: &str = "default";

const DEFAULT_STORAGE_NAME: &str = "default";
const DEFAULT_MOUNT_PATH: &str = "/data";
const NAMESPACE_HASH_LEN: usize = 40;
const IMAGE_NAME_MAX_LEN: usize = 24;
const PRIVATE_RANGES: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

// ============================================================================
// Settings
// ============================================================================

/// Provider-wide translation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorSettings {
    /// Oversubscription factor for CPU requests; <= 1.0 disables it
    pub cpu_commit_factor: f64,
    pub memory_commit_factor: f64,
    pub storage_commit_factor: f64,
    /// Secret name attached to pods as an image pull secret
    pub image_pull_secret: Option<String>,
    /// Emit the namespace isolation network policies
    pub network_policies: bool,
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            cpu_commit_factor: 1.0,
            memory_commit_factor: 1.0,
            storage_commit_factor: 1.0,
            image_pull_secret: None,
            network_policies: true,
        }
    }
}

impl TranslatorSettings {
    /// Set all three commit factors
    pub fn with_commit_factors(mut self, cpu: f64, memory: f64, storage: f64) -> Self {
        self.cpu_commit_factor = cpu;
        self.memory_commit_factor = memory;
        self.storage_commit_factor = storage;
        self
    }
}

// ============================================================================
// Intermediate service description
// ============================================================================

/// Transport protocol of an exposed port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Parse a protocol; empty means TCP, anything but TCP/UDP is rejected
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Ok(Protocol::Tcp);
        }
        match raw.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            _ => Err(Error::validation(format!(
                "protocol '{}' is neither tcp nor udp",
                raw
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// A port a service exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expose {
    pub port: i32,
    pub external_port: i32,
    pub protocol: Protocol,
    /// Reachable from outside the cluster through the node-port Service
    pub global: bool,
}

/// Key/value attributes attached to a storage volume
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageAttributes(BTreeMap<String, String>);

impl StorageAttributes {
    pub fn new(attrs: BTreeMap<String, String>) -> Self {
        Self(attrs)
    }

    pub fn find(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Boolean attribute; `None` when absent or not a boolean
    pub fn find_bool(&self, key: &str) -> Option<bool> {
        self.find(key).and_then(parse_bool)
    }
}

/// Accepts the same spellings as Go's `strconv.ParseBool`
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// A storage volume requested by a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageVolume {
    pub name: String,
    /// Bytes
    pub quantity: u64,
    pub attributes: StorageAttributes,
}

impl StorageVolume {
    pub fn is_persistent(&self) -> bool {
        self.attributes
            .find_bool(STORAGE_ATTRIBUTE_PERSISTENT)
            .unwrap_or(false)
    }
}

/// Validated, unit-converted view of one [`Service`]
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUnit {
    /// Generated workload name, `<image base name>-<random suffix>`
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    /// `KEY=VALUE` strings
    pub env: Vec<String>,
    /// Milli-cores
    pub cpu: u64,
    /// Bytes
    pub memory: u64,
    pub storage: Vec<StorageVolume>,
    pub exposes: Vec<Expose>,
    pub count: i32,
}

impl ServiceUnit {
    pub fn is_persistent(&self) -> bool {
        self.storage.iter().any(StorageVolume::is_persistent)
    }
}

// ============================================================================
// Output manifest
// ============================================================================

/// Workload object for one service
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Deployment(KubeDeployment),
    StatefulSet(StatefulSet),
}

impl Workload {
    pub fn name(&self) -> &str {
        let meta = match self {
            Workload::Deployment(d) => &d.metadata,
            Workload::StatefulSet(s) => &s.metadata,
        };
        meta.name.as_deref().unwrap_or_default()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Workload::Deployment(_) => "Deployment",
            Workload::StatefulSet(_) => "StatefulSet",
        }
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        let meta = match self {
            Workload::Deployment(d) => &d.metadata,
            Workload::StatefulSet(s) => &s.metadata,
        };
        meta.labels.clone().unwrap_or_default()
    }

    /// Pod template of the workload
    pub fn template(&self) -> &PodTemplateSpec {
        match self {
            Workload::Deployment(d) => match d.spec.as_ref() {
                Some(spec) => &spec.template,
                None => empty_template(),
            },
            Workload::StatefulSet(s) => match s.spec.as_ref() {
                Some(spec) => &spec.template,
                None => empty_template(),
            },
        }
    }
}

fn empty_template() -> &'static PodTemplateSpec {
    static EMPTY: std::sync::OnceLock<PodTemplateSpec> = std::sync::OnceLock::new();
    EMPTY.get_or_init(PodTemplateSpec::default)
}

/// Objects built for one service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceManifest {
    pub name: String,
    pub workload: Workload,
    /// ClusterIP Service for namespace-internal ports
    pub local_service: Option<KubeService>,
    /// NodePort Service for globally exposed ports
    pub global_service: Option<KubeService>,
}

/// Everything a provider applies for one deployment
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterManifest {
    pub deployment_id: DeploymentId,
    pub namespace: Namespace,
    pub network_policies: Vec<NetworkPolicy>,
    pub services: Vec<ServiceManifest>,
}

impl ClusterManifest {
    pub fn namespace_name(&self) -> &str {
        self.namespace.metadata.name.as_deref().unwrap_or_default()
    }
}

// ============================================================================
// Translation
// ============================================================================

/// Namespace holding every object of a deployment.
///
/// Derived from the deployment ID alone so reads and teardown, which only
/// carry the ID, address the same namespace as the apply did.
pub fn namespace_for(id: &DeploymentId) -> String {
    let digest = Sha256::digest(id.as_str().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..NAMESPACE_HASH_LEN].to_string()
}

/// Committed (requested) quantity for a raw quantity under a commit factor
pub fn committed_quantity(factor: f64, raw: u64) -> u64 {
    if factor <= 1.0 {
        return raw;
    }

    let committed = (raw as f64 * (1.0 / factor)).round();
    if committed <= 0.0 {
        1
    } else {
        committed as u64
    }
}

/// Image base name used as the workload name prefix: last path segment, tag
/// and digest dropped, sanitized to a DNS label
pub fn image_base_name(image: &str) -> String {
    let base = image.rsplit('/').next().unwrap_or(image);
    let base = base.split([':', '@']).next().unwrap_or(base);
    let mut sanitized: String = base
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    sanitized.truncate(IMAGE_NAME_MAX_LEN);
    let sanitized = sanitized.trim_matches('-');
    if sanitized.is_empty() {
        "svc".to_string()
    } else {
        sanitized.to_string()
    }
}

/// Generated workload name for an image, `<image base name>-<random suffix>`
pub fn workload_name(image: &str) -> String {
    format!("{}-{}", image_base_name(image), Uuid::new_v4().simple())
}

/// Take the first unclaimed existing name generated for the same image base,
/// or generate a fresh one
fn adopt_or_generate(image: &str, existing: &mut Vec<String>) -> String {
    let base = image_base_name(image);
    let found = existing.iter().position(|name| {
        name.rsplit_once('-')
            .is_some_and(|(prefix, suffix)| prefix == base && suffix.len() == 32)
    });

    match found {
        Some(idx) => existing.remove(idx),
        None => workload_name(image),
    }
}

/// Validate a deployment and convert every service into a [`ServiceUnit`]
pub fn service_units(deployment: &Deployment) -> Result<Vec<ServiceUnit>> {
    service_units_reusing(deployment, &[])
}

/// Like [`service_units`], but services whose image matches a workload that
/// already runs keep that workload's name
pub fn service_units_reusing(
    deployment: &Deployment,
    existing_names: &[String],
) -> Result<Vec<ServiceUnit>> {
    if deployment.id.is_empty() {
        return Err(Error::validation("deployment ID can not be empty"));
    }
    if deployment.services.is_empty() {
        return Err(Error::validation("deployment services can not be empty"));
    }

    let mut unclaimed = existing_names.to_vec();
    deployment
        .services
        .iter()
        .map(|service| {
            let mut unit = service_unit(service)?;
            unit.name = adopt_or_generate(&service.image, &mut unclaimed);
            Ok(unit)
        })
        .collect()
}

fn service_unit(service: &Service) -> Result<ServiceUnit> {
    if service.image.is_empty() {
        return Err(Error::validation("service image can not be empty"));
    }

    let resources = &service.compute_resources;
    if resources.cpu < 0.0 || resources.memory < 0 || resources.storage < 0 {
        return Err(Error::validation(format!(
            "service {} requests negative resources",
            service.image
        )));
    }

    let exposes = service
        .ports
        .iter()
        .map(|port| {
            Ok(Expose {
                port: port.port,
                external_port: port.port,
                protocol: Protocol::parse(&port.protocol)?,
                global: !port.internal,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let attributes = StorageAttributes::new(resources.storage_attributes.clone());
    let storage_name = attributes
        .find(STORAGE_ATTRIBUTE_NAME)
        .unwrap_or(DEFAULT_STORAGE_NAME)
        .to_string();

    Ok(ServiceUnit {
        name: String::new(),
        image: service.image.clone(),
        args: service.arguments.clone(),
        env: service
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect(),
        // float to integer conversions truncate
        cpu: (resources.cpu * 1000.0) as u64,
        memory: (resources.memory as u64).saturating_mul(1_000_000),
        storage: vec![StorageVolume {
            name: storage_name,
            quantity: (resources.storage as u64).saturating_mul(1_000_000),
            attributes,
        }],
        exposes,
        count: POD_REPLICAS,
    })
}

/// Translate a deployment into its cluster manifest
pub fn build_manifest(
    deployment: &Deployment,
    settings: &TranslatorSettings,
) -> Result<ClusterManifest> {
    build_manifest_reusing(deployment, settings, &[])
}

/// Translate a deployment, keeping the names of workloads already running in
/// its namespace so an update replaces them in place
pub fn build_manifest_reusing(
    deployment: &Deployment,
    settings: &TranslatorSettings,
    existing_names: &[String],
) -> Result<ClusterManifest> {
    let units = service_units_reusing(deployment, existing_names)?;
    let ns = namespace_for(&deployment.id);

    let network_policies = if settings.network_policies {
        network_policies(&ns, &units)
    } else {
        Vec::new()
    };

    let services = units
        .iter()
        .map(|unit| ServiceManifest {
            name: unit.name.clone(),
            workload: build_workload(&ns, unit, settings),
            local_service: build_service(&ns, unit, false),
            global_service: build_service(&ns, unit, true),
        })
        .collect();

    Ok(ClusterManifest {
        deployment_id: deployment.id.clone(),
        namespace: build_namespace(&ns, deployment),
        network_policies,
        services,
    })
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}

fn service_labels(unit: &ServiceUnit) -> BTreeMap<String, String> {
    let mut labels = managed_labels();
    labels.insert(SERVICE_LABEL.to_string(), unit.name.clone());
    labels
}

fn build_namespace(ns: &str, deployment: &Deployment) -> Namespace {
    let mut annotations =
        BTreeMap::from([(DEPLOYMENT_ANNOTATION.to_string(), deployment.id.to_string())]);
    if !deployment.owner.is_empty() {
        annotations.insert(OWNER_ANNOTATION.to_string(), deployment.owner.clone());
    }

    Namespace {
        metadata: ObjectMeta {
            name: Some(ns.to_string()),
            labels: Some(managed_labels()),
            annotations: Some(annotations),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn quantity(value: u64) -> Quantity {
    Quantity(value.to_string())
}

fn milli_quantity(value: u64) -> Quantity {
    Quantity(format!("{}m", value))
}

fn build_container(unit: &ServiceUnit, settings: &TranslatorSettings) -> Container {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();

    if unit.cpu > 0 {
        let committed = committed_quantity(settings.cpu_commit_factor, unit.cpu);
        requests.insert("cpu".to_string(), milli_quantity(committed));
        limits.insert("cpu".to_string(), milli_quantity(unit.cpu));
    }

    if unit.memory > 0 {
        let committed = committed_quantity(settings.memory_commit_factor, unit.memory);
        requests.insert("memory".to_string(), quantity(committed));
        limits.insert("memory".to_string(), quantity(unit.memory));
    }

    // the first non-persistent volume becomes the container's ephemeral storage
    if let Some(ephemeral) = unit
        .storage
        .iter()
        .find(|s| !s.is_persistent() && s.quantity > 0)
    {
        let committed = committed_quantity(settings.storage_commit_factor, ephemeral.quantity);
        requests.insert("ephemeral-storage".to_string(), quantity(committed));
        limits.insert("ephemeral-storage".to_string(), quantity(ephemeral.quantity));
    }

    let volume_mounts: Vec<VolumeMount> = unit
        .storage
        .iter()
        .filter(|s| s.is_persistent())
        .map(|s| VolumeMount {
            name: volume_claim_name(unit, s),
            mount_path: s
                .attributes
                .find(STORAGE_ATTRIBUTE_MOUNT)
                .unwrap_or(DEFAULT_MOUNT_PATH)
                .to_string(),
            ..Default::default()
        })
        .collect();

    let env: Vec<EnvVar> = unit
        .env
        .iter()
        .map(|kv| match kv.split_once('=') {
            Some((name, value)) => EnvVar {
                name: name.to_string(),
                value: Some(value.to_string()),
                ..Default::default()
            },
            None => EnvVar {
                name: kv.clone(),
                ..Default::default()
            },
        })
        .collect();

    let ports: Vec<ContainerPort> = unit
        .exposes
        .iter()
        .map(|e| ContainerPort {
            container_port: e.port,
            protocol: Some(e.protocol.as_str().to_string()),
            ..Default::default()
        })
        .collect();

    Container {
        name: unit.name.clone(),
        image: Some(unit.image.clone()),
        args: (!unit.args.is_empty()).then(|| unit.args.clone()),
        env: (!env.is_empty()).then_some(env),
        ports: (!ports.is_empty()).then_some(ports),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        resources: Some(ResourceRequirements {
            requests: Some(requests),
            limits: Some(limits),
            ..Default::default()
        }),
        image_pull_policy: Some("IfNotPresent".to_string()),
        security_context: Some(SecurityContext {
            run_as_non_root: Some(false),
            privileged: Some(false),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volume_claim_name(unit: &ServiceUnit, storage: &StorageVolume) -> String {
    format!("{}-{}", unit.name, storage.name)
}

fn volume_claims(unit: &ServiceUnit) -> Vec<PersistentVolumeClaim> {
    unit.storage
        .iter()
        .filter(|s| s.is_persistent())
        .map(|s| {
            let storage_class = s
                .attributes
                .find(STORAGE_ATTRIBUTE_CLASS)
                .filter(|class| *class != STORAGE_CLASS_DEFAULT)
                .map(str::to_string);

            PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(volume_claim_name(unit, s)),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    volume_mode: Some("Filesystem".to_string()),
                    storage_class_name: storage_class,
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            quantity(s.quantity),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }
        })
        .collect()
}

fn pod_template(unit: &ServiceUnit, settings: &TranslatorSettings) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(service_labels(unit)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![build_container(unit, settings)],
            image_pull_secrets: settings.image_pull_secret.as_ref().map(|name| {
                vec![LocalObjectReference {
                    name: name.clone().into(),
                }]
            }),
            automount_service_account_token: Some(false),
            ..Default::default()
        }),
    }
}

fn build_workload(ns: &str, unit: &ServiceUnit, settings: &TranslatorSettings) -> Workload {
    let labels = service_labels(unit);
    let metadata = ObjectMeta {
        name: Some(unit.name.clone()),
        namespace: Some(ns.to_string()),
        labels: Some(labels.clone()),
        ..Default::default()
    };
    let selector = LabelSelector {
        match_labels: Some(labels),
        ..Default::default()
    };

    if unit.is_persistent() {
        Workload::StatefulSet(StatefulSet {
            metadata,
            spec: Some(StatefulSetSpec {
                replicas: Some(unit.count),
                selector,
                service_name: unit.name.clone().into(),
                template: pod_template(unit, settings),
                volume_claim_templates: Some(volume_claims(unit)),
                ..Default::default()
            }),
            ..Default::default()
        })
    } else {
        Workload::Deployment(KubeDeployment {
            metadata,
            spec: Some(DeploymentSpec {
                replicas: Some(unit.count),
                selector,
                template: pod_template(unit, settings),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

/// Local (ClusterIP) or global (NodePort) Service; `None` when no port qualifies
fn build_service(ns: &str, unit: &ServiceUnit, global: bool) -> Option<KubeService> {
    let ports: Vec<ServicePort> = unit
        .exposes
        .iter()
        .filter(|e| e.global == global)
        .map(|e| ServicePort {
            name: Some(format!(
                "{}-{}",
                e.protocol.as_str().to_ascii_lowercase(),
                e.port
            )),
            port: e.external_port,
            target_port: Some(IntOrString::Int(e.port)),
            protocol: Some(e.protocol.as_str().to_string()),
            ..Default::default()
        })
        .collect();

    if ports.is_empty() {
        return None;
    }

    let (name, service_type) = if global {
        (format!("{}{}", unit.name, NODE_PORT_SUFFIX), "NodePort")
    } else {
        (unit.name.clone(), "ClusterIP")
    };

    Some(KubeService {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(ns.to_string()),
            labels: Some(service_labels(unit)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            selector: Some(service_labels(unit)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn namespace_peer(ns: &str) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        namespace_selector: Some(LabelSelector {
            match_labels: Some(BTreeMap::from([(
                "kubernetes.io/metadata.name".to_string(),
                ns.to_string(),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn policy(ns: &str, name: &str, selector: LabelSelector, spec: NetworkPolicySpec) -> NetworkPolicy {
    // per-service policies carry the service label too
    let labels = selector
        .match_labels
        .clone()
        .unwrap_or_else(managed_labels);

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: selector.into(),
            ..spec
        }),
        ..Default::default()
    }
}

/// Namespace isolation: ingress only from the namespace itself plus each
/// service's global ports; egress to the namespace, cluster DNS and the
/// public internet.
fn network_policies(ns: &str, units: &[ServiceUnit]) -> Vec<NetworkPolicy> {
    let mut policies = vec![
        policy(
            ns,
            "fleetplane-deny-ingress",
            LabelSelector::default(),
            NetworkPolicySpec {
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    from: Some(vec![namespace_peer(ns)]),
                    ..Default::default()
                }]),
                ..Default::default()
            },
        ),
        policy(
            ns,
            "fleetplane-egress",
            LabelSelector::default(),
            NetworkPolicySpec {
                policy_types: Some(vec!["Egress".to_string()]),
                egress: Some(vec![
                    NetworkPolicyEgressRule {
                        to: Some(vec![namespace_peer(ns)]),
                        ..Default::default()
                    },
                    NetworkPolicyEgressRule {
                        to: Some(vec![namespace_peer("kube-system")]),
                        ports: Some(
                            ["UDP", "TCP"]
                                .iter()
                                .map(|proto| NetworkPolicyPort {
                                    port: Some(IntOrString::Int(53)),
                                    protocol: Some(proto.to_string()),
                                    ..Default::default()
                                })
                                .collect(),
                        ),
                    },
                    NetworkPolicyEgressRule {
                        to: Some(vec![NetworkPolicyPeer {
                            ip_block: Some(IPBlock {
                                cidr: "0.0.0.0/0".to_string(),
                                except: Some(
                                    PRIVATE_RANGES.iter().map(|r| r.to_string()).collect(),
                                ),
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            },
        ),
    ];

    for unit in units {
        let ports: Vec<NetworkPolicyPort> = unit
            .exposes
            .iter()
            .filter(|e| e.global)
            .map(|e| NetworkPolicyPort {
                port: Some(IntOrString::Int(e.port)),
                protocol: Some(e.protocol.as_str().to_string()),
                ..Default::default()
            })
            .collect();
        if ports.is_empty() {
            continue;
        }

        policies.push(policy(
            ns,
            &format!("{}-ingress", unit.name),
            LabelSelector {
                match_labels: Some(service_labels(unit)),
                ..Default::default()
            },
            NetworkPolicySpec {
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    from: Some(vec![NetworkPolicyPeer {
                        ip_block: Some(IPBlock {
                            cidr: "0.0.0.0/0".to_string(),
                            except: None,
                        }),
                        ..Default::default()
                    }]),
                    ports: Some(ports),
                }]),
                ..Default::default()
            },
        ));
    }

    policies
}
