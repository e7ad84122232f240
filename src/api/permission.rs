//! Permission checks as explicit capability decorators
//!
//! Each decorator holds the caller's verified grants and the inner capability.
//! Every method checks the permission it requires before delegating.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::manager::{ManagerApi, ManagerHandle};
use super::provider::{ProviderApi, ProviderHandle};
use super::types::{
    ConnectRequest, Deployment, DeploymentFilter, DeploymentId, Properties, Provider,
    ProviderFilter, ProviderId, ResourcesStatistics, ServiceEvent, ServiceLog,
};
use super::version::ApiVersion;
use crate::error::{Error, Result};

/// A permission carried by an API token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Sign,
    Admin,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::Read,
        Permission::Write,
        Permission::Sign,
        Permission::Admin,
    ];

    /// Granted to callers that present no explicit permission set
    pub const DEFAULT: &'static [Permission] = &[Permission::Read];

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Sign => "sign",
            Permission::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "sign" => Ok(Permission::Sign),
            "admin" => Ok(Permission::Admin),
            other => Err(Error::validation(format!("unknown permission '{}'", other))),
        }
    }
}

/// The set of permissions a caller was granted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grants(Vec<Permission>);

impl Grants {
    pub fn new(perms: impl IntoIterator<Item = Permission>) -> Self {
        Self(perms.into_iter().collect())
    }

    pub fn has(&self, perm: Permission) -> bool {
        self.0.contains(&perm)
    }

    /// Fail with PermissionDenied unless `perm` is granted
    pub fn require(&self, perm: Permission) -> Result<()> {
        if self.has(perm) {
            Ok(())
        } else {
            Err(Error::PermissionDenied(perm.to_string()))
        }
    }

    pub fn as_slice(&self) -> &[Permission] {
        &self.0
    }
}

// ============================================================================
// Provider decorator
// ============================================================================

/// [`ProviderApi`] wrapper that enforces per-method permissions
pub struct PermissionedProvider {
    inner: ProviderHandle,
    grants: Grants,
}

impl PermissionedProvider {
    pub fn new(inner: ProviderHandle, grants: Grants) -> Self {
        Self { inner, grants }
    }
}

#[async_trait]
impl ProviderApi for PermissionedProvider {
    async fn version(&self) -> Result<ApiVersion> {
        self.grants.require(Permission::Admin)?;
        self.inner.version().await
    }

    async fn session(&self) -> Result<Uuid> {
        self.grants.require(Permission::Admin)?;
        self.inner.session().await
    }

    async fn get_statistics(&self) -> Result<ResourcesStatistics> {
        self.grants.require(Permission::Read)?;
        self.inner.get_statistics().await
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment> {
        self.grants.require(Permission::Read)?;
        self.inner.get_deployment(id).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.grants.require(Permission::Admin)?;
        self.inner.create_deployment(deployment).await
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.grants.require(Permission::Admin)?;
        self.inner.update_deployment(deployment).await
    }

    async fn close_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.grants.require(Permission::Admin)?;
        self.inner.close_deployment(deployment).await
    }

    async fn get_logs(&self, id: &DeploymentId) -> Result<Vec<ServiceLog>> {
        self.grants.require(Permission::Read)?;
        self.inner.get_logs(id).await
    }

    async fn get_events(&self, id: &DeploymentId) -> Result<Vec<ServiceEvent>> {
        self.grants.require(Permission::Read)?;
        self.inner.get_events(id).await
    }
}

// ============================================================================
// Manager decorator
// ============================================================================

/// [`ManagerApi`] wrapper that enforces per-method permissions
pub struct PermissionedManager {
    inner: ManagerHandle,
    grants: Grants,
}

impl PermissionedManager {
    pub fn new(inner: ManagerHandle, grants: Grants) -> Self {
        Self { inner, grants }
    }
}

#[async_trait]
impl ManagerApi for PermissionedManager {
    async fn version(&self) -> Result<ApiVersion> {
        self.grants.require(Permission::Read)?;
        self.inner.version().await
    }

    async fn session(&self) -> Result<Uuid> {
        self.grants.require(Permission::Read)?;
        self.inner.session().await
    }

    async fn provider_connect(&self, request: ConnectRequest) -> Result<()> {
        self.grants.require(Permission::Admin)?;
        self.inner.provider_connect(request).await
    }

    async fn get_statistics(&self, provider_id: &ProviderId) -> Result<ResourcesStatistics> {
        self.grants.require(Permission::Read)?;
        self.inner.get_statistics(provider_id).await
    }

    async fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>> {
        self.grants.require(Permission::Read)?;
        self.inner.list_providers(filter).await
    }

    async fn list_deployments(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
        self.grants.require(Permission::Read)?;
        self.inner.list_deployments(filter).await
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment> {
        self.grants.require(Permission::Admin)?;
        self.inner.create_deployment(deployment).await
    }

    async fn update_deployment(&self, deployment: Deployment) -> Result<()> {
        self.grants.require(Permission::Admin)?;
        self.inner.update_deployment(deployment).await
    }

    async fn close_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.grants.require(Permission::Admin)?;
        self.inner.close_deployment(deployment).await
    }

    async fn get_logs(&self, deployment: &Deployment) -> Result<Vec<ServiceLog>> {
        self.grants.require(Permission::Read)?;
        self.inner.get_logs(deployment).await
    }

    async fn get_events(&self, deployment: &Deployment) -> Result<Vec<ServiceEvent>> {
        self.grants.require(Permission::Read)?;
        self.inner.get_events(deployment).await
    }

    async fn set_properties(&self, properties: Properties) -> Result<()> {
        self.grants.require(Permission::Admin)?;
        self.inner.set_properties(properties).await
    }
}
