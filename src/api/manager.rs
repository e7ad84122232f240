//! Capability exposed by the manager

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::types::{
    ConnectRequest, Deployment, DeploymentFilter, Properties, Provider, ProviderFilter,
    ProviderId, ResourcesStatistics, ServiceEvent, ServiceLog,
};
use super::version::ApiVersion;
use crate::error::Result;

/// Operations the manager offers to the CLI and to providers
#[async_trait]
pub trait ManagerApi: Send + Sync {
    async fn version(&self) -> Result<ApiVersion>;

    async fn session(&self) -> Result<Uuid>;

    /// Register a provider reachable at `request.url`; a no-op if already registered
    async fn provider_connect(&self, request: ConnectRequest) -> Result<()>;

    async fn get_statistics(&self, provider_id: &ProviderId) -> Result<ResourcesStatistics>;

    async fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>>;

    async fn list_deployments(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>>;

    /// Create a deployment and return it with its assigned ID
    async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment>;

    async fn update_deployment(&self, deployment: Deployment) -> Result<()>;

    async fn close_deployment(&self, deployment: &Deployment) -> Result<()>;

    async fn get_logs(&self, deployment: &Deployment) -> Result<Vec<ServiceLog>>;

    async fn get_events(&self, deployment: &Deployment) -> Result<Vec<ServiceEvent>>;

    async fn set_properties(&self, properties: Properties) -> Result<()>;
}

/// Shared handle to any manager implementation
pub type ManagerHandle = Arc<dyn ManagerApi>;
