//! Resource accounting
//!
//! Collects per-node capacity, allocatable and allocated quantities and
//! folds them into the provider-level [`ResourcesStatistics`].

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};

use crate::api::{CpuCores, Memory, ResourcesStatistics, Storage};
use crate::error::{Error, Result};

/// CPU, memory and ephemeral storage amounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceItem {
    /// Cores
    pub cpu: f64,
    /// Bytes
    pub memory: f64,
    /// Bytes
    pub storage: f64,
}

impl ResourceItem {
    pub fn new(cpu: f64, memory: f64, storage: f64) -> Self {
        Self {
            cpu,
            memory,
            storage,
        }
    }

    /// Read `cpu`, `memory` and `ephemeral-storage` out of a quantity map;
    /// missing or unparsable entries count as zero
    pub fn from_quantities(quantities: Option<&BTreeMap<String, Quantity>>) -> Self {
        let get = |key: &str| {
            quantities
                .and_then(|q| q.get(key))
                .and_then(|q| parse_quantity(&q.0))
                .unwrap_or(0.0)
        };
        Self::new(get("cpu"), get("memory"), get("ephemeral-storage"))
    }

    fn add(&mut self, other: &ResourceItem) {
        self.cpu += other.cpu;
        self.memory += other.memory;
        self.storage += other.storage;
    }
}

/// Resources of one cluster node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResources {
    pub name: String,
    pub capacity: ResourceItem,
    pub allocatable: ResourceItem,
    /// Sum of container requests of the pods running on the node
    pub allocated: ResourceItem,
}

impl NodeResources {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_capacity(mut self, capacity: ResourceItem) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_allocatable(mut self, allocatable: ResourceItem) -> Self {
        self.allocatable = allocatable;
        self
    }

    pub fn with_allocated(mut self, allocated: ResourceItem) -> Self {
        self.allocated = allocated;
        self
    }
}

/// Build a node's resources from the node object and the pods scheduled on it.
///
/// Pods that are not bound to this node, or that already finished, do not
/// count towards the allocation.
pub fn node_resources(node: &Node, pods: &[Pod]) -> NodeResources {
    let name = node.metadata.name.clone().unwrap_or_default();
    let status = node.status.as_ref();

    let mut allocated = ResourceItem::default();
    for pod in pods {
        let spec = match pod.spec.as_ref() {
            Some(spec) if spec.node_name.as_deref() == Some(name.as_str()) => spec,
            _ => continue,
        };
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        if matches!(phase, Some("Succeeded") | Some("Failed")) {
            continue;
        }
        for container in &spec.containers {
            let requests = container.resources.as_ref().and_then(|r| r.requests.as_ref());
            allocated.add(&ResourceItem::from_quantities(requests));
        }
    }

    NodeResources {
        name,
        capacity: ResourceItem::from_quantities(status.and_then(|s| s.capacity.as_ref())),
        allocatable: ResourceItem::from_quantities(status.and_then(|s| s.allocatable.as_ref())),
        allocated,
    }
}

/// Fold node resources into provider statistics.
///
/// Available is computed from the sums, not per node, so a node whose
/// allocation exceeds its allocatable lowers the total instead of being
/// clamped at zero.
pub fn aggregate(nodes: &[NodeResources]) -> Result<ResourcesStatistics> {
    if nodes.is_empty() {
        return Err(Error::not_found("nodes resources do not exist"));
    }

    let mut capacity = ResourceItem::default();
    let mut allocatable = ResourceItem::default();
    let mut allocated = ResourceItem::default();
    for node in nodes {
        capacity.add(&node.capacity);
        allocatable.add(&node.allocatable);
        allocated.add(&node.allocated);
    }

    // float to integer conversions truncate
    Ok(ResourcesStatistics {
        cpu_cores: CpuCores {
            max_cpu_cores: capacity.cpu,
            available: allocatable.cpu - allocated.cpu,
            active: allocated.cpu,
            pending: 0.0,
        },
        memory: Memory {
            max_memory: capacity.memory as u64,
            available: (allocatable.memory - allocated.memory) as i64,
            active: allocated.memory as u64,
            pending: 0,
        },
        storage: Storage {
            max_storage: capacity.storage as u64,
            available: (allocatable.storage - allocated.storage) as i64,
            active: allocated.storage as u64,
            pending: 0,
        },
    })
}

/// Parse a Kubernetes quantity string ("500m", "2", "1Gi", "128974848", "1e3")
/// into its numeric value in base units
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;

    // sub-unit suffixes divide so "3800m" lands exactly on 3.8
    let divisor = match suffix {
        "n" => Some(1e9),
        "u" => Some(1e6),
        "m" => Some(1e3),
        _ => None,
    };
    if let Some(divisor) = divisor {
        return Some(value / divisor);
    }

    let multiplier = match suffix {
        "" => 1.0,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        exp if exp.starts_with(['e', 'E']) => 10f64.powi(exp[1..].parse::<i32>().ok()?),
        _ => return None,
    };

    Some(value * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, NodeStatus, PodSpec, PodStatus, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const GB: f64 = 1e9;

    #[test]
    fn test_aggregate_two_nodes() {
        let nodes = vec![
            NodeResources::new("n1")
                .with_capacity(ResourceItem::new(4.0, 8.0 * GB, 100.0 * GB))
                .with_allocatable(ResourceItem::new(4.0, 8.0 * GB, 100.0 * GB))
                .with_allocated(ResourceItem::new(1.0, 2.0 * GB, 0.0)),
            NodeResources::new("n2")
                .with_capacity(ResourceItem::new(4.0, 8.0 * GB, 100.0 * GB))
                .with_allocatable(ResourceItem::new(4.0, 8.0 * GB, 100.0 * GB))
                .with_allocated(ResourceItem::new(2.0, 1.0 * GB, 0.0)),
        ];

        let stats = aggregate(&nodes).unwrap();
        assert_eq!(stats.cpu_cores.max_cpu_cores, 8.0);
        assert_eq!(stats.cpu_cores.active, 3.0);
        assert_eq!(stats.cpu_cores.available, 5.0);
        assert_eq!(stats.memory.max_memory, 16_000_000_000);
        assert_eq!(stats.memory.available, 13_000_000_000);
        assert_eq!(stats.storage.active, 0);
    }

    #[test]
    fn test_overcommitted_node_is_not_clamped() {
        let nodes = vec![
            NodeResources::new("busy")
                .with_capacity(ResourceItem::new(2.0, GB, 0.0))
                .with_allocatable(ResourceItem::new(2.0, GB, 0.0))
                .with_allocated(ResourceItem::new(3.0, 2.0 * GB, 0.0)),
            NodeResources::new("idle")
                .with_capacity(ResourceItem::new(2.0, GB, 0.0))
                .with_allocatable(ResourceItem::new(2.0, GB, 0.0)),
        ];

        let stats = aggregate(&nodes).unwrap();
        assert_eq!(stats.cpu_cores.available, 1.0);
        assert_eq!(stats.memory.available, 0);

        let stats = aggregate(&nodes[..1]).unwrap();
        assert_eq!(stats.memory.available, -1_000_000_000);
    }

    #[test]
    fn test_conversions_truncate() {
        let nodes = vec![NodeResources::new("n")
            .with_capacity(ResourceItem::new(1.0, 1.9, 2.99))
            .with_allocatable(ResourceItem::new(1.0, 1.9, 2.99))];
        let stats = aggregate(&nodes).unwrap();
        assert_eq!(stats.memory.max_memory, 1);
        assert_eq!(stats.storage.max_storage, 2);
    }

    #[test]
    fn test_no_nodes() {
        let err = aggregate(&[]).unwrap_err();
        assert_eq!(err, Error::not_found("nodes resources do not exist"));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("500m"), Some(0.5));
        assert_eq!(parse_quantity("2"), Some(2.0));
        assert_eq!(parse_quantity("1Ki"), Some(1024.0));
        assert_eq!(parse_quantity("2Gi"), Some(2.0 * 1024.0 * 1024.0 * 1024.0));
        assert_eq!(parse_quantity("512M"), Some(512e6));
        assert_eq!(parse_quantity("1e3"), Some(1000.0));
        assert_eq!(parse_quantity("12x"), None);
        assert_eq!(parse_quantity(""), None);
    }

    fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    }

    fn pod(node: &str, cpu: &str, phase: &str) -> Pod {
        Pod {
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                containers: vec![Container {
                    name: "c".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(quantities(cpu, "100M")),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_node_resources_from_cluster_objects() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("worker-1".to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                capacity: Some(quantities("4", "8Gi")),
                allocatable: Some(quantities("3800m", "7Gi")),
                ..Default::default()
            }),
            ..Default::default()
        };
        let pods = vec![
            pod("worker-1", "250m", "Running"),
            pod("worker-1", "500m", "Pending"),
            pod("worker-1", "1", "Succeeded"),
            pod("worker-2", "2", "Running"),
        ];

        let resources = node_resources(&node, &pods);
        assert_eq!(resources.name, "worker-1");
        assert_eq!(resources.capacity.cpu, 4.0);
        assert_eq!(resources.allocatable.cpu, 3.8);
        assert_eq!(resources.allocated.cpu, 0.75);
        assert_eq!(resources.allocated.memory, 200e6);
    }
}
