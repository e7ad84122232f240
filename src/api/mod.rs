//! Shared API surface: data model, versions, permissions and the two
//! capability traits implemented by the manager and by providers.

pub mod manager;
pub mod permission;
pub mod provider;
pub mod response;
pub mod types;
pub mod version;

pub use manager::{ManagerApi, ManagerHandle};
pub use permission::{Grants, Permission, PermissionedManager, PermissionedProvider};
pub use provider::{ProviderApi, ProviderHandle};
pub use response::OperationStatus;
pub use types::*;
pub use version::{
    ApiVersion, SessionInfo, VersionInfo, MANAGER_API_VERSION, PROVIDER_API_VERSION,
};

/// Header a fronting proxy may set with the original caller address
pub const REMOTE_ADDR_HEADER: &str = "x-remote-addr";
