//! Provider tier
//!
//! A provider turns abstract deployments into cluster objects and reports
//! what actually runs:
//! - [`manifest`]: pure translation of a deployment into cluster objects
//! - [`resources`]: node capacity accounting
//! - [`driver`]: the cluster driver contract and an in-memory cluster
//! - [`kubernetes`]: the Kubernetes driver
//! - [`service`]: [`LocalProvider`], the provider capability
//! - [`api`]: the provider REST server
//! - [`link`]: keeps the provider registered with its manager

pub mod api;
pub mod driver;
pub mod kubernetes;
pub mod link;
pub mod manifest;
pub mod resources;
pub mod service;

pub use api::{create_provider_router, ProviderState};
pub use driver::{ClusterDriver, DriverError, MemoryCluster, SharedDriver};
pub use kubernetes::KubeDriver;
pub use link::{spawn_manager_link, LinkConfig, ManagerLink};
pub use manifest::{build_manifest, ClusterManifest, TranslatorSettings};
pub use resources::{aggregate, NodeResources, ResourceItem};
pub use service::LocalProvider;

/// Default port the provider API listens on
pub const DEFAULT_PROVIDER_PORT: u16 = 7123;
