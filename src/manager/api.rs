//! Manager API server
//!
//! Provides REST endpoints for the CLI and for providers:
//! - Providers: connect, query, statistics
//! - Deployments: create, update, query, close, logs, events
//! - Properties, version, session
//! - Token verification for providers

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use tower_http::trace::TraceLayer;

use super::orchestrator::host_of;
use crate::api::{
    ConnectRequest, Deployment, DeploymentFilter, Grants, ManagerApi, ManagerHandle,
    OperationStatus, PermissionedManager, Properties, Provider, ProviderFilter,
    ResourcesStatistics, ServiceEvent, ServiceLog, SessionInfo, VersionInfo, REMOTE_ADDR_HEADER,
};
use crate::auth::{require_bearer, JwtAuthority, SharedVerifier, VerifyRequest, VerifyResponse};
use crate::error::Result;
use crate::metrics::{ApiMetrics, MeteredManager, SharedApiMetrics};

/// Shared state for the manager API
#[derive(Clone)]
pub struct ManagerState {
    pub manager: ManagerHandle,
    pub metrics: SharedApiMetrics,
    pub authority: Arc<JwtAuthority>,
}

impl ManagerState {
    pub fn new(manager: ManagerHandle, authority: Arc<JwtAuthority>) -> Self {
        Self {
            manager,
            metrics: Arc::new(ApiMetrics::new("manager")),
            authority,
        }
    }

    fn scoped(&self, grants: Grants) -> MeteredManager {
        let permissioned: ManagerHandle =
            Arc::new(PermissionedManager::new(self.manager.clone(), grants));
        MeteredManager::new(permissioned, self.metrics.clone())
    }
}

/// Create the manager router
pub fn create_manager_router(state: ManagerState) -> Router {
    let verifier: SharedVerifier = state.authority.clone();

    let protected = Router::new()
        .route("/v0/version", get(version))
        .route("/v0/session", get(session))
        // Providers
        .route("/v0/providers/connect", post(provider_connect))
        .route("/v0/providers/query", post(list_providers))
        .route("/v0/providers/{id}/statistics", get(statistics))
        // Deployments
        .route(
            "/v0/deployments",
            post(create_deployment).put(update_deployment),
        )
        .route("/v0/deployments/query", post(list_deployments))
        .route("/v0/deployments/close", post(close_deployment))
        .route(
            "/v0/providers/{provider_id}/deployments/{id}/logs",
            get(get_logs),
        )
        .route(
            "/v0/providers/{provider_id}/deployments/{id}/events",
            get(get_events),
        )
        // Properties
        .route("/v0/properties", post(set_properties))
        .route_layer(middleware::from_fn_with_state(verifier, require_bearer));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/v0/auth/verify", post(verify_token))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Caller address: the proxy header wins over the TCP peer, port stripped
fn remote_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get(REMOTE_ADDR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(host_of)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

// ============================================================================
// Health, Metrics & Auth
// ============================================================================

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics(State(state): State<ManagerState>) -> impl IntoResponse {
    Json(state.metrics.report())
}

async fn verify_token(
    State(state): State<ManagerState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>> {
    let allow = state.authority.decode(&request.token)?;
    Ok(Json(VerifyResponse { allow }))
}

// ============================================================================
// Manager Endpoints
// ============================================================================

async fn version(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
) -> Result<Json<VersionInfo>> {
    let api_version = state.scoped(grants).version().await?;
    Ok(Json(VersionInfo::new(api_version)))
}

async fn session(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
) -> Result<Json<SessionInfo>> {
    let session = state.scoped(grants).session().await?;
    Ok(Json(SessionInfo { session }))
}

async fn provider_connect(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
    peer: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    Json(mut request): Json<ConnectRequest>,
) -> Result<Json<OperationStatus>> {
    let peer = peer.map(|Extension(ConnectInfo(addr))| addr);
    request.observed_addr = remote_addr(&headers, peer);

    let id = request.provider.id.clone();
    state.scoped(grants).provider_connect(request).await?;
    Ok(Json(OperationStatus::success(format!(
        "Provider {} connected",
        id
    ))))
}

async fn list_providers(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
    Json(filter): Json<ProviderFilter>,
) -> Result<Json<Vec<Provider>>> {
    Ok(Json(state.scoped(grants).list_providers(&filter).await?))
}

async fn statistics(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
    Path(id): Path<String>,
) -> Result<Json<ResourcesStatistics>> {
    Ok(Json(state.scoped(grants).get_statistics(&id.into()).await?))
}

async fn create_deployment(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
    Json(deployment): Json<Deployment>,
) -> Result<impl IntoResponse> {
    let created = state.scoped(grants).create_deployment(deployment).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_deployment(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
    Json(deployment): Json<Deployment>,
) -> Result<Json<OperationStatus>> {
    let id = deployment.id.clone();
    state.scoped(grants).update_deployment(deployment).await?;
    Ok(Json(OperationStatus::success(format!(
        "Deployment {} updated",
        id
    ))))
}

async fn list_deployments(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
    Json(filter): Json<DeploymentFilter>,
) -> Result<Json<Vec<Deployment>>> {
    Ok(Json(state.scoped(grants).list_deployments(&filter).await?))
}

async fn close_deployment(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
    Json(deployment): Json<Deployment>,
) -> Result<Json<OperationStatus>> {
    state.scoped(grants).close_deployment(&deployment).await?;
    Ok(Json(OperationStatus::success(format!(
        "Deployment {} closed",
        deployment.id
    ))))
}

async fn get_logs(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
    Path((provider_id, id)): Path<(String, String)>,
) -> Result<Json<Vec<ServiceLog>>> {
    let deployment = Deployment::new(provider_id).with_id(id);
    Ok(Json(state.scoped(grants).get_logs(&deployment).await?))
}

async fn get_events(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
    Path((provider_id, id)): Path<(String, String)>,
) -> Result<Json<Vec<ServiceEvent>>> {
    let deployment = Deployment::new(provider_id).with_id(id);
    Ok(Json(state.scoped(grants).get_events(&deployment).await?))
}

async fn set_properties(
    State(state): State<ManagerState>,
    Extension(grants): Extension<Grants>,
    Json(properties): Json<Properties>,
) -> Result<Json<OperationStatus>> {
    let app_id = properties.app_id.clone();
    state.scoped(grants).set_properties(properties).await?;
    Ok(Json(OperationStatus::success(format!(
        "Properties for {} saved",
        app_id
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Permission;
    use crate::manager::orchestrator::{Orchestrator, ProviderConnector};
    use crate::manager::registry::{ProviderRegistry, RegistryConfig};
    use crate::manager::store::MemoryStore;
    use crate::api::ProviderHandle;
    use crate::error::Error;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tower::ServiceExt;

    struct NoProviders;

    #[async_trait]
    impl ProviderConnector for NoProviders {
        async fn connect(&self, url: &str) -> Result<ProviderHandle> {
            Err(Error::upstream(format!("connection refused: {}", url)))
        }
    }

    fn create_test_app() -> (Router, Arc<JwtAuthority>) {
        let authority = Arc::new(JwtAuthority::new(b"manager-test"));
        let orchestrator = Orchestrator::new(
            Arc::new(ProviderRegistry::new(RegistryConfig::default())),
            Arc::new(MemoryStore::new()),
            Arc::new(NoProviders),
        );
        let state = ManagerState::new(Arc::new(orchestrator), authority.clone());
        (create_manager_router(state), authority)
    }

    #[test]
    fn test_remote_addr_prefers_header() {
        let peer: SocketAddr = "10.0.0.9:40000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(
            remote_addr(&headers, Some(peer)).as_deref(),
            Some("10.0.0.9")
        );

        headers.insert(REMOTE_ADDR_HEADER, "203.0.113.5:1234".parse().unwrap());
        assert_eq!(
            remote_addr(&headers, Some(peer)).as_deref(),
            Some("203.0.113.5")
        );
        assert_eq!(remote_addr(&HeaderMap::new(), None), None);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_verify_token() {
        let (app, authority) = create_test_app();
        let token = authority.issue(&[Permission::Read]).unwrap();
        let body = serde_json::to_string(&VerifyRequest { token }).unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v0/auth/verify")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let verified: VerifyResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(verified.allow, vec![Permission::Read]);

        let body = serde_json::to_string(&VerifyRequest {
            token: "garbage".to_string(),
        })
        .unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v0/auth/verify")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_list_deployments_needs_read() {
        let (app, authority) = create_test_app();
        let token = authority.issue(&[Permission::Read]).unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v0/deployments/query")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v0/deployments/query")
                    .header("content-type", "application/json")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let listed: Vec<Deployment> = serde_json::from_slice(&body).unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_create_on_unknown_provider() {
        let (app, authority) = create_test_app();
        let read_only = authority.issue(&[Permission::Read]).unwrap();
        let admin = authority.issue(&[Permission::Admin]).unwrap();
        let body = serde_json::to_string(&Deployment::new("ghost")).unwrap();

        let request = |token: &str| {
            Request::builder()
                .method("POST")
                .uri("/v0/deployments")
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(body.clone()))
                .unwrap()
        };

        let response = app.clone().oneshot(request(&read_only)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.oneshot(request(&admin)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let status: OperationStatus = serde_json::from_slice(&body).unwrap();
        assert!(!status.success);
        assert_eq!(status.kind.as_deref(), Some("not_found"));
    }

    #[tokio::test]
    async fn test_connect_unreachable_provider_is_upstream_error() {
        let (app, authority) = create_test_app();
        let token = authority.issue(&[Permission::Admin]).unwrap();
        let request = ConnectRequest {
            url: "http://127.0.0.1:1".to_string(),
            provider: Provider::new("p1"),
            observed_addr: None,
        };

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v0/providers/connect")
                    .header("content-type", "application/json")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::from(serde_json::to_string(&request).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
