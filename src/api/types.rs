//! Data model exchanged between the CLI, the manager and providers
//!
//! Everything here is plain serde data. Memory and storage quantities on a
//! [`Service`] are expressed in megabytes (10^6 bytes); CPU in fractional cores.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier of a registered provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

/// Unique identifier of a deployment, assigned by the manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(ProviderId);
string_id!(DeploymentId);

// ============================================================================
// Providers
// ============================================================================

/// Connection state of a provider as persisted by the manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderState {
    #[default]
    Online,
    Offline,
    Abnormal,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderState::Online => "Online",
            ProviderState::Offline => "Offline",
            ProviderState::Abnormal => "Abnormal",
        };
        f.write_str(s)
    }
}

/// Descriptor of a compute provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Provider {
    pub id: ProviderId,
    pub owner: String,
    pub host_uri: String,
    pub ip: String,
    pub state: ProviderState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    /// Create a new provider descriptor
    pub fn new(id: impl Into<ProviderId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Set the public host URI
    pub fn with_host_uri(mut self, host_uri: impl Into<String>) -> Self {
        self.host_uri = host_uri.into();
        self
    }
}

/// Registration request a provider sends to the manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Base URL where the provider API is reachable
    pub url: String,
    pub provider: Provider,
    /// Network address the request was observed from, filled in by the server
    #[serde(skip)]
    pub observed_addr: Option<String>,
}

/// Filter for listing persisted providers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderFilter {
    pub id: Option<ProviderId>,
    pub owner: Option<String>,
    pub states: Vec<ProviderState>,
    pub page: i64,
    pub size: i64,
}

// ============================================================================
// Deployments
// ============================================================================

/// Lifecycle state of a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentState {
    #[default]
    Active,
    InActive,
    Close,
}

impl DeploymentState {
    /// Every state, used by "show all" listings
    pub const ALL: [DeploymentState; 3] = [
        DeploymentState::Active,
        DeploymentState::InActive,
        DeploymentState::Close,
    ];
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentState::Active => "Active",
            DeploymentState::InActive => "InActive",
            DeploymentState::Close => "Deleted",
        };
        f.write_str(s)
    }
}

/// Kind of workload a deployment represents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentType {
    #[default]
    Web,
}

/// A user-requested set of services, owned by exactly one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Deployment {
    pub id: DeploymentId,
    pub name: String,
    pub owner: String,
    pub state: DeploymentState,
    pub version: String,
    pub authority: bool,
    pub services: Vec<Service>,
    #[serde(rename = "type")]
    pub deployment_type: DeploymentType,
    pub balance: f64,
    pub cost: f64,
    pub provider_id: ProviderId,
    pub expiration: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Public address of the provider, reported by the provider on read
    pub provider_expose_ip: String,
}

impl Deployment {
    /// Create a new deployment targeting a provider
    pub fn new(provider_id: impl Into<ProviderId>) -> Self {
        Self {
            provider_id: provider_id.into(),
            ..Default::default()
        }
    }

    /// Set the deployment ID
    pub fn with_id(mut self, id: impl Into<DeploymentId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Add a service
    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }
}

/// Filter for listing persisted deployments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentFilter {
    pub deployment_id: Option<DeploymentId>,
    pub owner: Option<String>,
    pub states: Vec<DeploymentState>,
    pub page: i64,
    pub size: i64,
}

// ============================================================================
// Services
// ============================================================================

/// Requested compute for one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComputeResources {
    /// CPU in cores
    pub cpu: f64,
    /// Memory in megabytes
    pub memory: i64,
    /// Storage in megabytes
    pub storage: i64,
    /// Storage attributes such as `persistent`, `class` and `mount`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub storage_attributes: BTreeMap<String, String>,
}

/// Live replica counts reported by the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicasStatus {
    pub total_replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
}

/// A container port, optionally exposed outside the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Port {
    /// "TCP" or "UDP", case-insensitive; empty means TCP
    pub protocol: String,
    pub port: i32,
    /// Node port assigned by the cluster, filled in on read
    pub expose_port: i32,
    /// Reachable only from inside the deployment namespace
    pub internal: bool,
}

impl Port {
    pub fn tcp(port: i32) -> Self {
        Self {
            protocol: "TCP".to_string(),
            port,
            ..Default::default()
        }
    }
}

/// One container workload within a deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub image: String,
    pub ports: Vec<Port>,
    pub env: BTreeMap<String, String>,
    pub arguments: Vec<String>,
    #[serde(rename = "resources")]
    pub compute_resources: ComputeResources,
    pub status: ReplicasStatus,
    pub error_message: String,
    pub deployment_id: DeploymentId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    /// Create a new service running an image
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Set compute resources
    pub fn with_resources(mut self, cpu: f64, memory: i64, storage: i64) -> Self {
        self.compute_resources.cpu = cpu;
        self.compute_resources.memory = memory;
        self.compute_resources.storage = storage;
        self
    }

    /// Add a port
    pub fn with_port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Logs of every pod of one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLog {
    pub service_name: String,
    pub logs: Vec<String>,
}

/// Cluster events of every pod of one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEvent {
    pub service_name: String,
    pub events: Vec<String>,
}

// ============================================================================
// Statistics
// ============================================================================

/// Aggregated capacity of a provider's cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesStatistics {
    pub cpu_cores: CpuCores,
    pub memory: Memory,
    pub storage: Storage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuCores {
    pub max_cpu_cores: f64,
    pub available: f64,
    pub active: f64,
    pub pending: f64,
}

/// Memory in bytes. `available` is signed: overcommitted nodes can push it below zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub max_memory: u64,
    pub available: i64,
    pub active: u64,
    pub pending: u64,
}

/// Ephemeral storage in bytes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    pub max_storage: u64,
    pub available: i64,
    pub active: u64,
    pub pending: u64,
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppType {
    #[default]
    L1,
}

/// Application binding attached to a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Properties {
    pub id: i64,
    pub provider_id: ProviderId,
    pub app_id: String,
    pub app_type: AppType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Pagination
// ============================================================================

/// Default page size when a caller passes a non-positive size
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Normalized page window: `(offset, limit)`
///
/// `page <= 0` becomes 1 and `size <= 0` becomes [`DEFAULT_PAGE_SIZE`].
pub fn page_window(page: i64, size: i64) -> (usize, usize) {
    let page = if page <= 0 { 1 } else { page };
    let size = if size <= 0 { DEFAULT_PAGE_SIZE } else { size };
    let offset = (page - 1).saturating_mul(size);
    (offset as usize, size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window_normalizes() {
        assert_eq!(page_window(0, 10), (0, 10));
        assert_eq!(page_window(1, -5), (0, 10));
        assert_eq!(page_window(3, 20), (40, 20));
        assert_eq!(page_window(-2, 0), (0, 10));
    }

    #[test]
    fn test_deployment_state_display() {
        assert_eq!(DeploymentState::Active.to_string(), "Active");
        assert_eq!(DeploymentState::InActive.to_string(), "InActive");
        assert_eq!(DeploymentState::Close.to_string(), "Deleted");
    }

    #[test]
    fn test_deployment_from_yaml_template() {
        let yaml = r#"
name: web
owner: alice
services:
  - image: nginx:1.25
    ports:
      - port: 80
    env:
      MODE: prod
    resources:
      cpu: 0.5
      memory: 512
      storage: 1024
"#;
        let deployment: Deployment = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(deployment.name, "web");
        assert_eq!(deployment.state, DeploymentState::Active);
        assert_eq!(deployment.services.len(), 1);
        let service = &deployment.services[0];
        assert_eq!(service.ports[0].port, 80);
        assert!(service.ports[0].protocol.is_empty());
        assert_eq!(service.compute_resources.memory, 512);
        assert_eq!(service.env.get("MODE").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let deployment = Deployment::new("p1").with_id("d1");
        let json = serde_json::to_value(&deployment).unwrap();
        assert_eq!(json["providerId"], "p1");
        assert_eq!(json["id"], "d1");
        assert_eq!(json["type"], "Web");
    }
}
