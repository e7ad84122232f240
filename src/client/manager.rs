//! Manager client used by the CLI and by providers

use async_trait::async_trait;
use uuid::Uuid;

use super::transport::HttpTransport;
use crate::api::{
    ApiVersion, ConnectRequest, Deployment, DeploymentFilter, ManagerApi, OperationStatus,
    Permission, Properties, Provider, ProviderFilter, ProviderId, ResourcesStatistics,
    ServiceEvent, ServiceLog, SessionInfo, VersionInfo,
};
use crate::auth::{TokenVerifier, VerifyRequest, VerifyResponse};
use crate::error::Result;

/// Manager reached over HTTP
#[derive(Debug, Clone)]
pub struct ManagerClient {
    transport: HttpTransport,
}

impl ManagerClient {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    /// Create a new client for a manager URL
    pub fn connect(url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self::new(HttpTransport::new(url, token)?))
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }
}

#[async_trait]
impl ManagerApi for ManagerClient {
    async fn version(&self) -> Result<ApiVersion> {
        let info: VersionInfo = self.transport.get("/v0/version").await?;
        Ok(info.api_version)
    }

    async fn session(&self) -> Result<Uuid> {
        let info: SessionInfo = self.transport.get("/v0/session").await?;
        Ok(info.session)
    }

    async fn provider_connect(&self, request: ConnectRequest) -> Result<()> {
        let _: OperationStatus = self
            .transport
            .post("/v0/providers/connect", &request)
            .await?;
        Ok(())
    }

    async fn get_statistics(&self, provider_id: &ProviderId) -> Result<ResourcesStatistics> {
        self.transport
            .get(&format!("/v0/providers/{}/statistics", provider_id))
            .await
    }

    async fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>> {
        self.transport.post("/v0/providers/query", filter).await
    }

    async fn list_deployments(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
        self.transport.post("/v0/deployments/query", filter).await
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment> {
        self.transport.post("/v0/deployments", &deployment).await
    }

    async fn update_deployment(&self, deployment: Deployment) -> Result<()> {
        let _: OperationStatus = self.transport.put("/v0/deployments", &deployment).await?;
        Ok(())
    }

    async fn close_deployment(&self, deployment: &Deployment) -> Result<()> {
        let _: OperationStatus = self
            .transport
            .post("/v0/deployments/close", deployment)
            .await?;
        Ok(())
    }

    async fn get_logs(&self, deployment: &Deployment) -> Result<Vec<ServiceLog>> {
        self.transport
            .get(&format!(
                "/v0/providers/{}/deployments/{}/logs",
                deployment.provider_id, deployment.id
            ))
            .await
    }

    async fn get_events(&self, deployment: &Deployment) -> Result<Vec<ServiceEvent>> {
        self.transport
            .get(&format!(
                "/v0/providers/{}/deployments/{}/events",
                deployment.provider_id, deployment.id
            ))
            .await
    }

    async fn set_properties(&self, properties: Properties) -> Result<()> {
        let _: OperationStatus = self.transport.post("/v0/properties", &properties).await?;
        Ok(())
    }
}

/// Providers verify caller tokens by asking the manager
#[async_trait]
impl TokenVerifier for ManagerClient {
    async fn verify(&self, token: &str) -> Result<Vec<Permission>> {
        let response: VerifyResponse = self
            .transport
            .post(
                "/v0/auth/verify",
                &VerifyRequest {
                    token: token.to_string(),
                },
            )
            .await?;
        Ok(response.allow)
    }
}
