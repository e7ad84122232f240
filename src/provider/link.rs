//! Manager link for providers
//!
//! A background task that registers the provider with its manager and keeps
//! it registered. Every interval it reads the manager's session; a changed
//! session means the manager restarted and forgot this provider, so the
//! provider connects again. Recovering from failed session reads also
//! triggers a reconnect, since the manager may have evicted the provider
//! in the meantime.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ConnectRequest, ManagerHandle, Provider};
use crate::error::Result;

/// Default interval between manager session checks
pub const DEFAULT_LINK_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for the manager link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// URL the manager should use to reach this provider
    pub provider_url: String,

    /// Descriptor sent on every registration
    pub provider: Provider,

    /// Interval between session checks
    pub interval: Duration,
}

impl LinkConfig {
    /// Create a new link config
    pub fn new(provider_url: impl Into<String>, provider: Provider) -> Self {
        Self {
            provider_url: provider_url.into(),
            provider,
            interval: DEFAULT_LINK_INTERVAL,
        }
    }

    /// Set the session check interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Keeps a provider registered with its manager
pub struct ManagerLink {
    config: LinkConfig,
    manager: ManagerHandle,
}

impl ManagerLink {
    /// Create a new manager link
    pub fn new(config: LinkConfig, manager: ManagerHandle) -> Self {
        Self { config, manager }
    }

    /// Register with the manager and return the manager session observed
    /// right after
    pub async fn register(&self) -> Result<Uuid> {
        let request = ConnectRequest {
            url: self.config.provider_url.clone(),
            provider: self.config.provider.clone(),
            observed_addr: None,
        };
        self.manager.provider_connect(request).await?;
        let session = self.manager.session().await?;
        info!(
            "Registered provider {} with manager (session {})",
            self.config.provider.id, session
        );
        Ok(session)
    }

    async fn try_register(&self) -> Option<Uuid> {
        match self.register().await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Failed to register with manager: {}", e);
                None
            }
        }
    }

    /// Run the link loop until the shutdown signal is received
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting manager link: provider={}, url={}, interval={:?}",
            self.config.provider.id, self.config.provider_url, self.config.interval
        );

        let mut session = self.try_register().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.manager.session().await {
                        Ok(current) if session == Some(current) => {
                            debug!("Manager session unchanged");
                        }
                        Ok(current) => {
                            info!("Manager session changed to {}, registering again", current);
                            session = self.try_register().await;
                        }
                        Err(e) => {
                            warn!("Failed to read manager session: {}", e);
                            session = None;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Manager link shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Spawn the manager link as a background task
///
/// Returns a shutdown sender that stops the loop.
pub fn spawn_manager_link(config: LinkConfig, manager: ManagerHandle) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let link = ManagerLink::new(config, manager);

    tokio::spawn(async move {
        link.run(shutdown_rx).await;
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::api::{
        ApiVersion, Deployment, DeploymentFilter, ManagerApi, Properties, ProviderFilter,
        ProviderId, ResourcesStatistics, ServiceEvent, ServiceLog,
    };
    use crate::error::Error;

    #[derive(Default)]
    struct FakeManager {
        connects: AtomicUsize,
        session: Mutex<Uuid>,
        down: AtomicBool,
    }

    impl FakeManager {
        fn check(&self) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(Error::upstream("connection refused"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ManagerApi for FakeManager {
        async fn version(&self) -> Result<ApiVersion> {
            Ok(ApiVersion::new(1, 0, 0))
        }
        async fn session(&self) -> Result<Uuid> {
            self.check()?;
            Ok(*self.session.lock().unwrap())
        }
        async fn provider_connect(&self, _request: ConnectRequest) -> Result<()> {
            self.check()?;
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn get_statistics(&self, _id: &ProviderId) -> Result<ResourcesStatistics> {
            Ok(ResourcesStatistics::default())
        }
        async fn list_providers(&self, _filter: &ProviderFilter) -> Result<Vec<Provider>> {
            Ok(vec![])
        }
        async fn list_deployments(&self, _filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
            Ok(vec![])
        }
        async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment> {
            Ok(deployment)
        }
        async fn update_deployment(&self, _deployment: Deployment) -> Result<()> {
            Ok(())
        }
        async fn close_deployment(&self, _deployment: &Deployment) -> Result<()> {
            Ok(())
        }
        async fn get_logs(&self, _deployment: &Deployment) -> Result<Vec<ServiceLog>> {
            Ok(vec![])
        }
        async fn get_events(&self, _deployment: &Deployment) -> Result<Vec<ServiceEvent>> {
            Ok(vec![])
        }
        async fn set_properties(&self, _properties: Properties) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_link_config_builder() {
        let config = LinkConfig::new("http://10.0.0.5:7123", Provider::new("p1"))
            .with_interval(Duration::from_secs(3));

        assert_eq!(config.provider_url, "http://10.0.0.5:7123");
        assert_eq!(config.provider.id.as_str(), "p1");
        assert_eq!(config.interval, Duration::from_secs(3));
        assert_eq!(
            LinkConfig::new("u", Provider::new("p")).interval,
            DEFAULT_LINK_INTERVAL
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_on_session_change_and_recovery() {
        let manager = Arc::new(FakeManager::default());
        let config = LinkConfig::new("http://provider", Provider::new("p1"))
            .with_interval(Duration::from_secs(10));
        let shutdown = spawn_manager_link(config, manager.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.connects.load(Ordering::SeqCst), 1);

        // same session: nothing to do
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(manager.connects.load(Ordering::SeqCst), 1);

        // manager restarted
        *manager.session.lock().unwrap() = Uuid::new_v4();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(manager.connects.load(Ordering::SeqCst), 2);

        // unreachable for a while, then back with the same session
        manager.down.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        manager.down.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(manager.connects.load(Ordering::SeqCst), 3);

        shutdown.send(true).unwrap();
    }
}
