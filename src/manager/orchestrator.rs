//! Deployment lifecycle coordinator
//!
//! The [`Orchestrator`] is the manager's implementation of [`ManagerApi`].
//! Every deployment call resolves the owning provider through the
//! [`ProviderRegistry`], delegates execution to that provider and persists
//! the reconciled result through the [`DeploymentStore`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::ProviderRegistry;
use super::store::SharedStore;
use crate::api::{
    ApiVersion, ConnectRequest, Deployment, DeploymentFilter, DeploymentId, DeploymentState,
    ManagerApi, Properties, Provider, ProviderFilter, ProviderHandle, ProviderId, ProviderState,
    ResourcesStatistics, ServiceEvent, ServiceLog, MANAGER_API_VERSION, PROVIDER_API_VERSION,
};
use crate::error::{Error, Result};

/// Builds a provider handle for a URL a provider registered with
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<ProviderHandle>;
}

pub type SharedConnector = Arc<dyn ProviderConnector>;

/// Fail unless `got` shares major and minor with the expected provider API
pub fn check_provider_version(got: ApiVersion) -> Result<()> {
    if got.eq_major_minor(PROVIDER_API_VERSION) {
        Ok(())
    } else {
        Err(Error::VersionMismatch {
            got: got.to_string(),
            expected: PROVIDER_API_VERSION.to_string(),
        })
    }
}

/// Strip a port from a socket address, keeping bracketless IPv6 intact
pub fn host_of(addr: &str) -> String {
    if let Ok(socket) = addr.parse::<std::net::SocketAddr>() {
        return socket.ip().to_string();
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            host.to_string()
        }
        _ => addr.to_string(),
    }
}

/// Routes deployment lifecycle calls to providers and persists the results
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    store: SharedStore,
    connector: SharedConnector,
    session: Uuid,
}

impl Orchestrator {
    /// Create a new orchestrator with a fresh session
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: SharedStore,
        connector: SharedConnector,
    ) -> Self {
        Self {
            registry,
            store,
            connector,
            session: Uuid::new_v4(),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Load the persisted row for `deployment` and the handle of the provider
    /// that owns it. A caller naming a different provider is rejected.
    async fn resolve_stored(
        &self,
        deployment: &Deployment,
    ) -> Result<(Deployment, ProviderHandle)> {
        let stored = self.store.get_deployment(&deployment.id).await?;
        if !deployment.provider_id.is_empty() && deployment.provider_id != stored.provider_id {
            return Err(Error::validation(format!(
                "deployment {} belongs to provider {}, not {}",
                stored.id, stored.provider_id, deployment.provider_id
            )));
        }
        let provider = self.registry.get(&stored.provider_id).await?;
        Ok((stored, provider))
    }

    /// Read the provider's applied view of a deployment and fold it into
    /// `deployment`. The provider is authoritative for services, replica
    /// counts and ports.
    async fn reconcile(
        &self,
        provider: &ProviderHandle,
        deployment: &mut Deployment,
    ) -> Result<()> {
        let applied = provider.get_deployment(&deployment.id).await?;
        let now = Utc::now();
        deployment.services = applied
            .services
            .into_iter()
            .map(|mut service| {
                service.deployment_id = deployment.id.clone();
                service.created_at = now;
                service.updated_at = now;
                service
            })
            .collect();
        deployment.provider_expose_ip = applied.provider_expose_ip;
        Ok(())
    }
}

#[async_trait]
impl ManagerApi for Orchestrator {
    async fn version(&self) -> Result<ApiVersion> {
        Ok(MANAGER_API_VERSION)
    }

    async fn session(&self) -> Result<Uuid> {
        Ok(self.session)
    }

    async fn provider_connect(&self, request: ConnectRequest) -> Result<()> {
        let id = request.provider.id.clone();
        if id.is_empty() {
            return Err(Error::validation("provider ID can not be empty"));
        }
        if self.registry.contains(&id).await {
            debug!("Provider {} already registered", id);
            return Ok(());
        }

        let handle = self.connector.connect(&request.url).await?;
        check_provider_version(handle.version().await?)?;

        let mut provider = request.provider;
        if provider.ip.is_empty() {
            provider.ip = request
                .observed_addr
                .as_deref()
                .map(host_of)
                .unwrap_or_default();
        }
        let now = Utc::now();
        provider.state = ProviderState::Online;
        provider.created_at = now;
        provider.updated_at = now;

        if self.registry.add_provider(id.clone(), handle).await {
            info!(
                "Provider connected: id={}, url={}, ip={}",
                id, request.url, provider.ip
            );
        }
        self.store.upsert_provider(&provider).await
    }

    async fn get_statistics(&self, provider_id: &ProviderId) -> Result<ResourcesStatistics> {
        self.registry.get(provider_id).await?.get_statistics().await
    }

    async fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>> {
        self.store.list_providers(filter).await
    }

    async fn list_deployments(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
        let mut deployments = self.store.list_deployments(filter).await?;

        for deployment in deployments.iter_mut() {
            let provider = match self.registry.get(&deployment.provider_id).await {
                Ok(provider) => provider,
                Err(_) => {
                    deployment.state = DeploymentState::InActive;
                    continue;
                }
            };
            if deployment.state == DeploymentState::Close {
                continue;
            }
            match provider.get_deployment(&deployment.id).await {
                Ok(live) => {
                    deployment.services = live.services;
                    deployment.provider_expose_ip = live.provider_expose_ip;
                }
                Err(e) => debug!("Keeping stored view of deployment {}: {}", deployment.id, e),
            }
        }

        Ok(deployments)
    }

    async fn create_deployment(&self, mut deployment: Deployment) -> Result<Deployment> {
        let provider = self.registry.get(&deployment.provider_id).await?;

        let now = Utc::now();
        deployment.id = DeploymentId::new(Uuid::new_v4().to_string());
        deployment.state = DeploymentState::Active;
        deployment.created_at = now;
        deployment.updated_at = now;

        provider.create_deployment(&deployment).await?;
        info!(
            "Created deployment {} on provider {}",
            deployment.id, deployment.provider_id
        );

        self.reconcile(&provider, &mut deployment).await?;
        self.store.save_deployment(&deployment).await?;
        Ok(deployment)
    }

    async fn update_deployment(&self, mut deployment: Deployment) -> Result<()> {
        let (stored, provider) = self.resolve_stored(&deployment).await?;

        deployment.provider_id = stored.provider_id;
        deployment.created_at = stored.created_at;
        deployment.updated_at = Utc::now();
        provider.update_deployment(&deployment).await?;
        info!("Updated deployment {}", deployment.id);

        self.reconcile(&provider, &mut deployment).await?;
        self.store.save_deployment(&deployment).await
    }

    async fn close_deployment(&self, deployment: &Deployment) -> Result<()> {
        let (stored, provider) = self.resolve_stored(deployment).await?;

        provider.close_deployment(&stored).await?;
        info!(
            "Closed deployment {} on provider {}",
            stored.id, stored.provider_id
        );

        self.store
            .update_deployment_state(&stored.id, DeploymentState::Close)
            .await
    }

    async fn get_logs(&self, deployment: &Deployment) -> Result<Vec<ServiceLog>> {
        let (stored, provider) = self.resolve_stored(deployment).await?;
        provider.get_logs(&stored.id).await
    }

    async fn get_events(&self, deployment: &Deployment) -> Result<Vec<ServiceEvent>> {
        let (stored, provider) = self.resolve_stored(deployment).await?;
        provider.get_events(&stored.id).await
    }

    async fn set_properties(&self, mut properties: Properties) -> Result<()> {
        if !self.registry.contains(&properties.provider_id).await {
            warn!(
                "Rejecting properties for unknown provider {}",
                properties.provider_id
            );
            return Err(Error::not_found(format!(
                "provider {}",
                properties.provider_id
            )));
        }

        let now = Utc::now();
        properties.created_at = now;
        properties.updated_at = now;
        self.store.upsert_properties(&properties).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::api::{Port, Service};
    use crate::manager::registry::RegistryConfig;
    use crate::manager::store::{DeploymentStore, MemoryStore};
    use crate::provider::driver::MemoryCluster;
    use crate::provider::LocalProvider;

    /// Hands out in-process providers by URL
    #[derive(Default)]
    struct StaticConnector {
        providers: Mutex<HashMap<String, ProviderHandle>>,
    }

    impl StaticConnector {
        fn with(self, url: &str, provider: ProviderHandle) -> Self {
            self.providers
                .lock()
                .unwrap()
                .insert(url.to_string(), provider);
            self
        }
    }

    #[async_trait]
    impl ProviderConnector for StaticConnector {
        async fn connect(&self, url: &str) -> Result<ProviderHandle> {
            self.providers
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| Error::upstream(format!("connection refused: {}", url)))
        }
    }

    fn local_provider() -> ProviderHandle {
        let cluster =
            Arc::new(MemoryCluster::new().with_node("node-0", 4.0, 8_000_000_000, 0));
        Arc::new(LocalProvider::new(cluster).with_expose_ip("203.0.113.7"))
    }

    fn orchestrator() -> (Orchestrator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let connector = StaticConnector::default().with("http://p1", local_provider());
        let orchestrator = Orchestrator::new(
            Arc::new(ProviderRegistry::new(RegistryConfig::default())),
            store.clone(),
            Arc::new(connector),
        );
        (orchestrator, store)
    }

    fn connect_request(id: &str, url: &str) -> ConnectRequest {
        ConnectRequest {
            url: url.to_string(),
            provider: Provider::new(id).with_owner("ops"),
            observed_addr: Some("198.51.100.4:51234".to_string()),
        }
    }

    fn web_deployment(provider_id: &str) -> Deployment {
        Deployment::new(provider_id)
            .with_owner("alice")
            .with_service(
                Service::new("nginx:1.25")
                    .with_resources(0.5, 256, 0)
                    .with_port(Port::tcp(80)),
            )
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("10.0.0.1:8080"), "10.0.0.1");
        assert_eq!(host_of("[::1]:8080"), "::1");
        assert_eq!(host_of("10.0.0.1"), "10.0.0.1");
        assert_eq!(host_of("example.com:443"), "example.com");
    }

    #[test]
    fn test_version_check() {
        assert!(check_provider_version(ApiVersion::new(1, 0, 9)).is_ok());
        let err = check_provider_version(ApiVersion::new(1, 1, 0)).unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_connect_persists_online_provider_with_observed_ip() {
        let (orchestrator, store) = orchestrator();
        orchestrator
            .provider_connect(connect_request("p1", "http://p1"))
            .await
            .unwrap();

        let providers = store.list_providers(&ProviderFilter::default()).await.unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].ip, "198.51.100.4");
        assert_eq!(providers[0].state, ProviderState::Online);
        assert!(orchestrator.registry().contains(&"p1".into()).await);

        // a second connect is a no-op
        orchestrator
            .provider_connect(connect_request("p1", "http://unreachable"))
            .await
            .unwrap();
        assert_eq!(orchestrator.registry().len().await, 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_version_mismatch() {
        struct OldProvider;

        #[async_trait]
        impl crate::api::ProviderApi for OldProvider {
            async fn version(&self) -> Result<ApiVersion> {
                Ok(ApiVersion::new(0, 9, 0))
            }
            async fn session(&self) -> Result<Uuid> {
                Ok(Uuid::nil())
            }
            async fn get_statistics(&self) -> Result<ResourcesStatistics> {
                Ok(ResourcesStatistics::default())
            }
            async fn get_deployment(&self, _id: &DeploymentId) -> Result<Deployment> {
                Err(Error::not_found("deployment"))
            }
            async fn create_deployment(&self, _deployment: &Deployment) -> Result<()> {
                Ok(())
            }
            async fn update_deployment(&self, _deployment: &Deployment) -> Result<()> {
                Ok(())
            }
            async fn close_deployment(&self, _deployment: &Deployment) -> Result<()> {
                Ok(())
            }
            async fn get_logs(&self, _id: &DeploymentId) -> Result<Vec<ServiceLog>> {
                Ok(vec![])
            }
            async fn get_events(&self, _id: &DeploymentId) -> Result<Vec<ServiceEvent>> {
                Ok(vec![])
            }
        }

        let connector = StaticConnector::default().with("http://old", Arc::new(OldProvider));
        let orchestrator = Orchestrator::new(
            Arc::new(ProviderRegistry::new(RegistryConfig::default())),
            Arc::new(MemoryStore::new()),
            Arc::new(connector),
        );

        let err = orchestrator
            .provider_connect(connect_request("old", "http://old"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported provider api version: 0.9.0 (expected 1.0.0)"
        );
        assert!(orchestrator.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_create_with_unknown_provider_writes_nothing() {
        let (orchestrator, store) = orchestrator();

        let err = orchestrator
            .create_deployment(web_deployment("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let all = store
            .list_deployments(&DeploymentFilter {
                states: DeploymentState::ALL.to_vec(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_create_assigns_unique_ids_and_persists_reconciled_services() {
        let (orchestrator, store) = orchestrator();
        orchestrator
            .provider_connect(connect_request("p1", "http://p1"))
            .await
            .unwrap();

        let first = orchestrator
            .create_deployment(web_deployment("p1"))
            .await
            .unwrap();
        let second = orchestrator
            .create_deployment(web_deployment("p1"))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.state, DeploymentState::Active);
        assert_eq!(first.provider_expose_ip, "203.0.113.7");

        let stored = store.get_deployment(&first.id).await.unwrap();
        assert_eq!(stored.services.len(), 1);
        let service = &stored.services[0];
        assert_eq!(service.deployment_id, first.id);
        assert_eq!(service.status.total_replicas, 1);
        assert!(service.ports[0].expose_port >= 30000);
    }

    #[tokio::test]
    async fn test_list_filters_states_and_marks_unreachable_inactive() {
        let (orchestrator, store) = orchestrator();
        orchestrator
            .provider_connect(connect_request("p1", "http://p1"))
            .await
            .unwrap();

        let open = orchestrator
            .create_deployment(web_deployment("p1"))
            .await
            .unwrap();
        let closed = orchestrator
            .create_deployment(web_deployment("p1"))
            .await
            .unwrap();
        orchestrator.close_deployment(&closed).await.unwrap();

        // a row whose provider never connected
        let mut orphan = web_deployment("gone").with_id("orphan");
        orphan.created_at = Utc::now();
        store.save_deployment(&orphan).await.unwrap();

        let active = orchestrator
            .list_deployments(&DeploymentFilter {
                states: vec![DeploymentState::Active],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|d| d.id != closed.id));
        let listed_orphan = active.iter().find(|d| d.id.as_str() == "orphan").unwrap();
        assert_eq!(listed_orphan.state, DeploymentState::InActive);
        assert!(active.iter().any(|d| d.id == open.id));

        // the overlay is never persisted
        let stored = store.get_deployment(&"orphan".into()).await.unwrap();
        assert_eq!(stored.state, DeploymentState::Active);

        let all = orchestrator
            .list_deployments(&DeploymentFilter {
                states: DeploymentState::ALL.to_vec(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_update_keeps_creation_time() {
        let (orchestrator, store) = orchestrator();
        orchestrator
            .provider_connect(connect_request("p1", "http://p1"))
            .await
            .unwrap();
        let created = orchestrator
            .create_deployment(web_deployment("p1"))
            .await
            .unwrap();

        let mut changed = created.clone();
        changed.services[0].compute_resources.memory = 512;
        changed.created_at = Utc::now();
        orchestrator.update_deployment(changed).await.unwrap();

        let stored = store.get_deployment(&created.id).await.unwrap();
        assert_eq!(stored.created_at, created.created_at);
        assert_eq!(stored.services[0].compute_resources.memory, 512);
    }

    #[tokio::test]
    async fn test_set_properties_requires_registered_provider() {
        let (orchestrator, store) = orchestrator();
        let properties = Properties {
            provider_id: "p1".into(),
            app_id: "app-1".to_string(),
            ..Default::default()
        };

        let err = orchestrator
            .set_properties(properties.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        orchestrator
            .provider_connect(connect_request("p1", "http://p1"))
            .await
            .unwrap();
        orchestrator.set_properties(properties).await.unwrap();
        assert_eq!(store.list_properties(&"p1".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_routes_to_owning_provider() {
        let first = Arc::new(MemoryCluster::new().with_node("node-0", 4.0, 8_000_000_000, 0));
        let second = Arc::new(MemoryCluster::new().with_node("node-0", 4.0, 8_000_000_000, 0));
        let connector = StaticConnector::default()
            .with("http://p1", Arc::new(LocalProvider::new(first.clone())))
            .with("http://p2", Arc::new(LocalProvider::new(second.clone())));
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(
            Arc::new(ProviderRegistry::new(RegistryConfig::default())),
            store.clone(),
            Arc::new(connector),
        );
        for (id, url) in [("p1", "http://p1"), ("p2", "http://p2")] {
            orchestrator
                .provider_connect(connect_request(id, url))
                .await
                .unwrap();
        }
        let created = orchestrator
            .create_deployment(web_deployment("p1"))
            .await
            .unwrap();

        let mut wrong_provider = created.clone();
        wrong_provider.provider_id = "p2".into();
        let err = orchestrator
            .close_deployment(&wrong_provider)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {:?}", err);
        assert!(matches!(
            orchestrator.get_logs(&wrong_provider).await,
            Err(Error::Validation(_))
        ));
        let stored = store.get_deployment(&created.id).await.unwrap();
        assert_eq!(stored.state, DeploymentState::Active);
        assert_eq!(first.namespaces().await.len(), 1);

        // without a provider ID the stored owner is used
        let by_id = Deployment::default().with_id(created.id.clone());
        orchestrator.close_deployment(&by_id).await.unwrap();
        assert!(first.namespaces().await.is_empty());
        let stored = store.get_deployment(&created.id).await.unwrap();
        assert_eq!(stored.state, DeploymentState::Close);
        assert_eq!(stored.provider_id.as_str(), "p1");
    }

    #[tokio::test]
    async fn test_operations_on_unknown_deployment() {
        let (orchestrator, _store) = orchestrator();
        orchestrator
            .provider_connect(connect_request("p1", "http://p1"))
            .await
            .unwrap();

        let unknown = web_deployment("p1").with_id("missing");
        assert!(matches!(
            orchestrator.close_deployment(&unknown).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.update_deployment(unknown.clone()).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.get_events(&unknown).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_row_of_missing_provider_lists_inactive() {
        let (orchestrator, store) = orchestrator();
        orchestrator
            .provider_connect(connect_request("p1", "http://p1"))
            .await
            .unwrap();
        let closed = orchestrator
            .create_deployment(web_deployment("p1"))
            .await
            .unwrap();
        orchestrator.close_deployment(&closed).await.unwrap();

        let mut orphan = web_deployment("gone").with_id("orphan");
        orphan.state = DeploymentState::Close;
        orphan.created_at = Utc::now();
        store.save_deployment(&orphan).await.unwrap();

        let all = orchestrator
            .list_deployments(&DeploymentFilter {
                states: DeploymentState::ALL.to_vec(),
                ..Default::default()
            })
            .await
            .unwrap();
        let state_of = |id: &DeploymentId| all.iter().find(|d| &d.id == id).unwrap().state;
        assert_eq!(state_of(&closed.id), DeploymentState::Close);
        assert_eq!(state_of(&"orphan".into()), DeploymentState::InActive);
    }
}
