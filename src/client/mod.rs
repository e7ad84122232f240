//! HTTP clients for the manager and provider APIs

pub mod manager;
pub mod provider;
pub mod transport;

pub use manager::ManagerClient;
pub use provider::{connect_remote_provider, RemoteConnector, RemoteProvider};
pub use transport::{HttpTransport, DEFAULT_TIMEOUT};
