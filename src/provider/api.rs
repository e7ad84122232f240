//! Provider API server
//!
//! REST endpoints over a [`ProviderHandle`]. Every `/v0` route requires a
//! bearer token; the verified grants decide which calls go through.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::api::{
    Deployment, DeploymentId, Grants, OperationStatus, PermissionedProvider, ProviderApi,
    ProviderHandle, ResourcesStatistics, ServiceEvent, ServiceLog, SessionInfo, VersionInfo,
};
use crate::auth::{require_bearer, SharedVerifier};
use crate::error::Result;
use crate::metrics::{ApiMetrics, MeteredProvider, SharedApiMetrics};

/// Shared state for the provider API
#[derive(Clone)]
pub struct ProviderState {
    pub provider: ProviderHandle,
    pub metrics: SharedApiMetrics,
    pub verifier: SharedVerifier,
}

impl ProviderState {
    pub fn new(provider: ProviderHandle, verifier: SharedVerifier) -> Self {
        Self {
            provider,
            metrics: Arc::new(ApiMetrics::new("provider")),
            verifier,
        }
    }

    /// The provider as seen by a caller holding `grants`
    fn scoped(&self, grants: Grants) -> MeteredProvider {
        let permissioned: ProviderHandle =
            Arc::new(PermissionedProvider::new(self.provider.clone(), grants));
        MeteredProvider::new(permissioned, self.metrics.clone())
    }
}

/// Create the provider router
pub fn create_provider_router(state: ProviderState) -> Router {
    let protected = Router::new()
        .route("/v0/version", get(version))
        .route("/v0/session", get(session))
        .route("/v0/statistics", get(statistics))
        .route(
            "/v0/deployments",
            post(create_deployment).put(update_deployment),
        )
        .route("/v0/deployments/close", post(close_deployment))
        .route("/v0/deployments/{id}", get(get_deployment))
        .route("/v0/deployments/{id}/logs", get(get_logs))
        .route("/v0/deployments/{id}/events", get(get_events))
        .route_layer(middleware::from_fn_with_state(
            state.verifier.clone(),
            require_bearer,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health & Metrics
// ============================================================================

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics(State(state): State<ProviderState>) -> impl IntoResponse {
    Json(state.metrics.report())
}

// ============================================================================
// Provider Endpoints
// ============================================================================

async fn version(
    State(state): State<ProviderState>,
    Extension(grants): Extension<Grants>,
) -> Result<Json<VersionInfo>> {
    let api_version = state.scoped(grants).version().await?;
    Ok(Json(VersionInfo::new(api_version)))
}

async fn session(
    State(state): State<ProviderState>,
    Extension(grants): Extension<Grants>,
) -> Result<Json<SessionInfo>> {
    let session = state.scoped(grants).session().await?;
    Ok(Json(SessionInfo { session }))
}

async fn statistics(
    State(state): State<ProviderState>,
    Extension(grants): Extension<Grants>,
) -> Result<Json<ResourcesStatistics>> {
    Ok(Json(state.scoped(grants).get_statistics().await?))
}

async fn create_deployment(
    State(state): State<ProviderState>,
    Extension(grants): Extension<Grants>,
    Json(deployment): Json<Deployment>,
) -> Result<impl IntoResponse> {
    state.scoped(grants).create_deployment(&deployment).await?;
    Ok((
        StatusCode::CREATED,
        Json(OperationStatus::success(format!(
            "Deployment {} created",
            deployment.id
        ))),
    ))
}

async fn update_deployment(
    State(state): State<ProviderState>,
    Extension(grants): Extension<Grants>,
    Json(deployment): Json<Deployment>,
) -> Result<impl IntoResponse> {
    state.scoped(grants).update_deployment(&deployment).await?;
    Ok((
        StatusCode::OK,
        Json(OperationStatus::success(format!(
            "Deployment {} updated",
            deployment.id
        ))),
    ))
}

async fn close_deployment(
    State(state): State<ProviderState>,
    Extension(grants): Extension<Grants>,
    Json(deployment): Json<Deployment>,
) -> Result<impl IntoResponse> {
    state.scoped(grants).close_deployment(&deployment).await?;
    Ok((
        StatusCode::OK,
        Json(OperationStatus::success(format!(
            "Deployment {} closed",
            deployment.id
        ))),
    ))
}

async fn get_deployment(
    State(state): State<ProviderState>,
    Extension(grants): Extension<Grants>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>> {
    let id = DeploymentId::from(id);
    Ok(Json(state.scoped(grants).get_deployment(&id).await?))
}

async fn get_logs(
    State(state): State<ProviderState>,
    Extension(grants): Extension<Grants>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ServiceLog>>> {
    let id = DeploymentId::from(id);
    Ok(Json(state.scoped(grants).get_logs(&id).await?))
}

async fn get_events(
    State(state): State<ProviderState>,
    Extension(grants): Extension<Grants>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ServiceEvent>>> {
    let id = DeploymentId::from(id);
    Ok(Json(state.scoped(grants).get_events(&id).await?))
}
