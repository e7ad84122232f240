//! API request metrics
//!
//! Per-endpoint call counters and latency, tracked with atomics so request
//! handlers can update them without locking. [`MeteredProvider`] and
//! [`MeteredManager`] time every capability call through an [`ApiMetrics`].

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::api::{
    ApiVersion, ConnectRequest, Deployment, DeploymentFilter, DeploymentId, ManagerApi,
    ManagerHandle, Properties, Provider, ProviderApi, ProviderFilter, ProviderHandle, ProviderId,
    ResourcesStatistics, ServiceEvent, ServiceLog,
};
use crate::error::Result;

#[derive(Default)]
struct EndpointStats {
    request_count: AtomicU64,
    error_count: AtomicU64,
    active_requests: AtomicU32,
    total_latency_us: AtomicU64,
}

/// Point-in-time view of one endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSnapshot {
    pub endpoint: String,
    pub request_count: u64,
    pub error_count: u64,
    pub active_requests: u32,
    pub avg_latency_ms: f64,
}

/// Body of `GET /metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub interface: String,
    pub endpoints: Vec<EndpointSnapshot>,
}

/// Metrics for every endpoint of one API surface
#[derive(Default)]
pub struct ApiMetrics {
    /// API surface label, "manager" or "provider"
    interface: &'static str,
    endpoints: DashMap<&'static str, EndpointStats>,
}

impl ApiMetrics {
    /// Create a new metrics registry for an API surface
    pub fn new(interface: &'static str) -> Self {
        Self {
            interface,
            endpoints: DashMap::new(),
        }
    }

    pub fn interface(&self) -> &'static str {
        self.interface
    }

    /// Record the start of a request
    pub fn record_request_start(&self, endpoint: &'static str) {
        self.endpoints
            .entry(endpoint)
            .or_default()
            .active_requests
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Record the end of a request with its latency in microseconds
    pub fn record_request_end(&self, endpoint: &'static str, latency_us: u64, failed: bool) {
        let stats = self.endpoints.entry(endpoint).or_default();
        stats.active_requests.fetch_sub(1, Ordering::SeqCst);
        stats.request_count.fetch_add(1, Ordering::SeqCst);
        stats
            .total_latency_us
            .fetch_add(latency_us, Ordering::SeqCst);
        if failed {
            stats.error_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Time a future under an endpoint name
    pub async fn observe<T, F>(&self, endpoint: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.record_request_start(endpoint);
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed().as_micros() as u64;
        self.record_request_end(endpoint, elapsed, result.is_err());
        result
    }

    /// Snapshot every endpoint, sorted by name
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let mut out: Vec<EndpointSnapshot> = self
            .endpoints
            .iter()
            .map(|entry| {
                let stats = entry.value();
                let count = stats.request_count.load(Ordering::SeqCst);
                let total = stats.total_latency_us.load(Ordering::SeqCst);
                EndpointSnapshot {
                    endpoint: entry.key().to_string(),
                    request_count: count,
                    error_count: stats.error_count.load(Ordering::SeqCst),
                    active_requests: stats.active_requests.load(Ordering::SeqCst),
                    avg_latency_ms: if count > 0 {
                        total as f64 / count as f64 / 1000.0
                    } else {
                        0.0
                    },
                }
            })
            .collect();
        out.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        out
    }

    /// Snapshot labelled with the API surface
    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            interface: self.interface.to_string(),
            endpoints: self.snapshot(),
        }
    }

    /// Request count for one endpoint
    pub fn request_count(&self, endpoint: &str) -> u64 {
        self.endpoints
            .get(endpoint)
            .map(|s| s.request_count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

/// Shared metrics registry for use across async tasks
pub type SharedApiMetrics = Arc<ApiMetrics>;

// ============================================================================
// Decorators
// ============================================================================

/// [`ProviderApi`] wrapper timing every call
pub struct MeteredProvider {
    inner: ProviderHandle,
    metrics: SharedApiMetrics,
}

impl MeteredProvider {
    pub fn new(inner: ProviderHandle, metrics: SharedApiMetrics) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl ProviderApi for MeteredProvider {
    async fn version(&self) -> Result<ApiVersion> {
        self.metrics.observe("Version", self.inner.version()).await
    }

    async fn session(&self) -> Result<Uuid> {
        self.metrics.observe("Session", self.inner.session()).await
    }

    async fn get_statistics(&self) -> Result<ResourcesStatistics> {
        self.metrics
            .observe("GetStatistics", self.inner.get_statistics())
            .await
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment> {
        self.metrics
            .observe("GetDeployment", self.inner.get_deployment(id))
            .await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.metrics
            .observe("CreateDeployment", self.inner.create_deployment(deployment))
            .await
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.metrics
            .observe("UpdateDeployment", self.inner.update_deployment(deployment))
            .await
    }

    async fn close_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.metrics
            .observe("CloseDeployment", self.inner.close_deployment(deployment))
            .await
    }

    async fn get_logs(&self, id: &DeploymentId) -> Result<Vec<ServiceLog>> {
        self.metrics.observe("GetLogs", self.inner.get_logs(id)).await
    }

    async fn get_events(&self, id: &DeploymentId) -> Result<Vec<ServiceEvent>> {
        self.metrics
            .observe("GetEvents", self.inner.get_events(id))
            .await
    }
}

/// [`ManagerApi`] wrapper timing every call
pub struct MeteredManager {
    inner: ManagerHandle,
    metrics: SharedApiMetrics,
}

impl MeteredManager {
    pub fn new(inner: ManagerHandle, metrics: SharedApiMetrics) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl ManagerApi for MeteredManager {
    async fn version(&self) -> Result<ApiVersion> {
        self.metrics.observe("Version", self.inner.version()).await
    }

    async fn session(&self) -> Result<Uuid> {
        self.metrics.observe("Session", self.inner.session()).await
    }

    async fn provider_connect(&self, request: ConnectRequest) -> Result<()> {
        self.metrics
            .observe("ProviderConnect", self.inner.provider_connect(request))
            .await
    }

    async fn get_statistics(&self, provider_id: &ProviderId) -> Result<ResourcesStatistics> {
        self.metrics
            .observe("GetStatistics", self.inner.get_statistics(provider_id))
            .await
    }

    async fn list_providers(&self, filter: &ProviderFilter) -> Result<Vec<Provider>> {
        self.metrics
            .observe("GetProviderList", self.inner.list_providers(filter))
            .await
    }

    async fn list_deployments(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
        self.metrics
            .observe("GetDeploymentList", self.inner.list_deployments(filter))
            .await
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment> {
        self.metrics
            .observe("CreateDeployment", self.inner.create_deployment(deployment))
            .await
    }

    async fn update_deployment(&self, deployment: Deployment) -> Result<()> {
        self.metrics
            .observe("UpdateDeployment", self.inner.update_deployment(deployment))
            .await
    }

    async fn close_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.metrics
            .observe("CloseDeployment", self.inner.close_deployment(deployment))
            .await
    }

    async fn get_logs(&self, deployment: &Deployment) -> Result<Vec<ServiceLog>> {
        self.metrics
            .observe("GetLogs", self.inner.get_logs(deployment))
            .await
    }

    async fn get_events(&self, deployment: &Deployment) -> Result<Vec<ServiceEvent>> {
        self.metrics
            .observe("GetEvents", self.inner.get_events(deployment))
            .await
    }

    async fn set_properties(&self, properties: Properties) -> Result<()> {
        self.metrics
            .observe("SetProperties", self.inner.set_properties(properties))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_request_tracking() {
        let metrics = ApiMetrics::new("provider");

        metrics.record_request_start("GetLogs");
        metrics.record_request_start("GetLogs");
        metrics.record_request_end("GetLogs", 1000, false);
        metrics.record_request_end("GetLogs", 3000, true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].request_count, 2);
        assert_eq!(snapshot[0].error_count, 1);
        assert_eq!(snapshot[0].active_requests, 0);
        assert_eq!(snapshot[0].avg_latency_ms, 2.0);
    }

    #[tokio::test]
    async fn test_observe_counts_errors() {
        let metrics = ApiMetrics::new("manager");

        let ok: Result<u32> = metrics.observe("Session", async { Ok(1) }).await;
        assert!(ok.is_ok());
        let err: Result<u32> = metrics
            .observe("Session", async { Err(Error::not_found("x")) })
            .await;
        assert!(err.is_err());

        assert_eq!(metrics.request_count("Session"), 2);
        assert_eq!(metrics.snapshot()[0].error_count, 1);
        assert_eq!(metrics.request_count("Unknown"), 0);
    }
}
