//! Remote provider handle
//!
//! [`RemoteProvider`] implements [`ProviderApi`] over the provider REST API,
//! so the manager's registry can hold it next to in-process providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::transport::{HttpTransport, DEFAULT_TIMEOUT};
use crate::api::{
    ApiVersion, Deployment, DeploymentId, OperationStatus, Permission, ProviderApi,
    ProviderHandle, ResourcesStatistics, ServiceEvent, ServiceLog, SessionInfo, VersionInfo,
};
use crate::auth::JwtAuthority;
use crate::error::Result;
use crate::manager::orchestrator::{check_provider_version, ProviderConnector};

/// Provider reached over HTTP
#[derive(Debug)]
pub struct RemoteProvider {
    transport: HttpTransport,
}

impl RemoteProvider {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }
}

#[async_trait]
impl ProviderApi for RemoteProvider {
    async fn version(&self) -> Result<ApiVersion> {
        let info: VersionInfo = self.transport.get("/v0/version").await?;
        Ok(info.api_version)
    }

    async fn session(&self) -> Result<Uuid> {
        let info: SessionInfo = self.transport.get("/v0/session").await?;
        Ok(info.session)
    }

    async fn get_statistics(&self) -> Result<ResourcesStatistics> {
        self.transport.get("/v0/statistics").await
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment> {
        self.transport
            .get(&format!("/v0/deployments/{}", id))
            .await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        let _: OperationStatus = self.transport.post("/v0/deployments", deployment).await?;
        Ok(())
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        let _: OperationStatus = self.transport.put("/v0/deployments", deployment).await?;
        Ok(())
    }

    async fn close_deployment(&self, deployment: &Deployment) -> Result<()> {
        let _: OperationStatus = self
            .transport
            .post("/v0/deployments/close", deployment)
            .await?;
        Ok(())
    }

    async fn get_logs(&self, id: &DeploymentId) -> Result<Vec<ServiceLog>> {
        self.transport
            .get(&format!("/v0/deployments/{}/logs", id))
            .await
    }

    async fn get_events(&self, id: &DeploymentId) -> Result<Vec<ServiceEvent>> {
        self.transport
            .get(&format!("/v0/deployments/{}/events", id))
            .await
    }
}

/// Connect to a provider and check it speaks a compatible API version
pub async fn connect_remote_provider(url: &str, token: String) -> Result<RemoteProvider> {
    let provider = RemoteProvider::new(HttpTransport::new(url, Some(token))?);
    check_provider_version(provider.version().await?)?;
    Ok(provider)
}

/// Builds [`RemoteProvider`] handles authenticated with a self-issued
/// `{read, admin}` token
pub struct RemoteConnector {
    authority: Arc<JwtAuthority>,
    timeout: Duration,
}

impl RemoteConnector {
    pub fn new(authority: Arc<JwtAuthority>) -> Self {
        Self {
            authority,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-call timeout for provider requests
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ProviderConnector for RemoteConnector {
    async fn connect(&self, url: &str) -> Result<ProviderHandle> {
        let token = self
            .authority
            .issue(&[Permission::Read, Permission::Admin])?;
        let transport = HttpTransport::with_timeout(url, Some(token), self.timeout)?;
        debug!("Connecting to provider at {}", url);
        Ok(Arc::new(RemoteProvider::new(transport)))
    }
}
