//! Capability exposed by a provider process

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::types::{Deployment, DeploymentId, ResourcesStatistics, ServiceEvent, ServiceLog};
use super::version::ApiVersion;
use crate::error::Result;

/// Operations a provider offers to the manager.
///
/// Implemented in-process by [`crate::provider::LocalProvider`] and over HTTP
/// by [`crate::client::RemoteProvider`]; callers cannot tell them apart.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Provider API version, checked by the manager on connect
    async fn version(&self) -> Result<ApiVersion>;

    /// Process-lifetime session identifier, used as the liveness probe
    async fn session(&self) -> Result<Uuid>;

    /// Aggregated cluster capacity
    async fn get_statistics(&self) -> Result<ResourcesStatistics>;

    /// Live view of a deployment as applied in the cluster
    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment>;

    /// Apply a new deployment; fails with Conflict if it already exists
    async fn create_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Re-apply an existing deployment; fails with Conflict if it does not exist
    async fn update_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Tear down everything the deployment created
    async fn close_deployment(&self, deployment: &Deployment) -> Result<()>;

    async fn get_logs(&self, id: &DeploymentId) -> Result<Vec<ServiceLog>>;

    async fn get_events(&self, id: &DeploymentId) -> Result<Vec<ServiceEvent>>;
}

/// Shared handle to any provider implementation
pub type ProviderHandle = Arc<dyn ProviderApi>;
