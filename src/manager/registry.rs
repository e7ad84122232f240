//! Provider registry and failure detector
//!
//! Maps provider IDs to live handles. A background sweep probes every
//! provider's session on a fixed interval; providers that stay unreachable
//! for longer than the TTL are evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{ProviderHandle, ProviderId};
use crate::error::{Error, Result};

/// Default interval between liveness sweeps
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default silence after which a provider is evicted
pub const DEFAULT_PROVIDER_TTL: Duration = Duration::from_secs(30);

/// Registry timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Interval between sweeps; each probe gets half of it
    pub heartbeat_interval: Duration,

    /// Maximum silence before eviction
    pub ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            ttl: DEFAULT_PROVIDER_TTL,
        }
    }
}

impl RegistryConfig {
    /// Set the sweep interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Timeout of a single liveness probe
    pub fn probe_timeout(&self) -> Duration {
        self.heartbeat_interval / 2
    }
}

/// True once `now` is strictly past `last_seen + ttl`
pub fn is_expired(last_seen: Instant, ttl: Duration, now: Instant) -> bool {
    now > last_seen + ttl
}

struct ProviderEntry {
    handle: ProviderHandle,
    last_seen: Instant,
}

/// Registry of connected providers
pub struct ProviderRegistry {
    config: RegistryConfig,
    providers: Mutex<HashMap<ProviderId, ProviderEntry>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Register a provider handle. A provider that is already registered
    /// keeps its existing handle; returns whether the handle was inserted.
    pub async fn add_provider(&self, id: ProviderId, handle: ProviderHandle) -> bool {
        let mut providers = self.providers.lock().await;
        if providers.contains_key(&id) {
            debug!("Provider {} already registered", id);
            return false;
        }

        info!("Provider {} added to registry", id);
        providers.insert(
            id,
            ProviderEntry {
                handle,
                last_seen: Instant::now(),
            },
        );
        true
    }

    /// Resolve a provider handle
    pub async fn get(&self, id: &ProviderId) -> Result<ProviderHandle> {
        let providers = self.providers.lock().await;
        providers
            .get(id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| Error::not_found(format!("provider {}", id)))
    }

    pub async fn contains(&self, id: &ProviderId) -> bool {
        self.providers.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.providers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Last successful contact with a provider
    pub async fn last_seen(&self, id: &ProviderId) -> Option<Instant> {
        self.providers.lock().await.get(id).map(|e| e.last_seen)
    }

    /// Probe every provider once and evict the expired ones.
    ///
    /// Probes run concurrently while the sweep holds the registry lock, so a
    /// sweep lasts at most one probe timeout. Returns the evicted IDs.
    pub async fn sweep(&self) -> Vec<ProviderId> {
        let probe_timeout = self.config.probe_timeout();
        let mut providers = self.providers.lock().await;

        let probes = providers.iter().map(|(id, entry)| {
            let handle = entry.handle.clone();
            let id = id.clone();
            async move {
                let outcome = match tokio::time::timeout(probe_timeout, handle.session()).await {
                    Ok(Ok(session)) => Ok(session),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("no answer within {:?}", probe_timeout)),
                };
                (id, outcome)
            }
        });
        let results = futures::future::join_all(probes).await;

        let now = Instant::now();
        let mut evicted = Vec::new();
        for (id, outcome) in results {
            let Some(entry) = providers.get_mut(&id) else {
                continue;
            };
            match outcome {
                Ok(session) => {
                    entry.last_seen = now;
                    debug!("Provider {} alive (session {})", id, session);
                }
                Err(reason) if is_expired(entry.last_seen, self.config.ttl, now) => {
                    warn!("provider closing: {} ({})", id, reason);
                    evicted.push(id);
                }
                Err(reason) => {
                    warn!("Heartbeat to provider {} failed: {}", id, reason);
                }
            }
        }

        for id in &evicted {
            providers.remove(id);
        }

        evicted
    }

    /// Run sweeps until the shutdown signal is received
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting provider liveness sweep: interval={:?}, ttl={:?}",
            self.config.heartbeat_interval, self.config.ttl
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.heartbeat_interval) => {
                    let evicted = self.sweep().await;
                    if !evicted.is_empty() {
                        info!("Evicted {} provider(s)", evicted.len());
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Provider liveness sweep shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Spawn the liveness sweep as a background task
///
/// Returns a shutdown sender that stops the sweep.
pub fn spawn_sweeper(registry: Arc<ProviderRegistry>) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        registry.run(shutdown_rx).await;
    });

    shutdown_tx
}
