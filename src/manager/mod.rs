//! Manager tier
//!
//! The manager keeps the live set of providers and routes deployment
//! lifecycle calls to them:
//! - [`registry`]: provider registry with a TTL failure detector
//! - [`orchestrator`]: [`Orchestrator`], the manager capability
//! - [`store`]: the persistence collaborator
//! - [`api`]: the manager REST server

pub mod api;
pub mod orchestrator;
pub mod registry;
pub mod store;

pub use api::{create_manager_router, ManagerState};
pub use orchestrator::{Orchestrator, ProviderConnector, SharedConnector};
pub use registry::{spawn_sweeper, ProviderRegistry, RegistryConfig};
pub use store::{DeploymentStore, MemoryStore, SharedStore};

/// Default port the manager API listens on
pub const DEFAULT_MANAGER_PORT: u16 = 6123;
