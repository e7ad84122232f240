//! Integration tests for a manager and a provider talking over HTTP
//!
//! Both servers run on localhost with ephemeral ports; the provider uses the
//! in-memory cluster driver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;

use fleetplane::api::{
    DeploymentFilter, DeploymentState, ManagerApi, Permission, Port, Provider, ProviderFilter,
    ProviderState as ProviderStatus, Service, MANAGER_API_VERSION,
};
use fleetplane::auth::{JwtAuthority, SharedVerifier};
use fleetplane::client::{connect_remote_provider, ManagerClient, RemoteConnector};
use fleetplane::manager::{
    create_manager_router, ManagerState, MemoryStore, Orchestrator, ProviderRegistry,
    RegistryConfig,
};
use fleetplane::provider::{
    create_provider_router, LinkConfig, LocalProvider, ManagerLink, MemoryCluster, ProviderState,
};
use fleetplane::Error;

const PROVIDER_ID: &str = "provider-it";
const EXPOSE_IP: &str = "198.51.100.4";

/// Serve `app` on an ephemeral localhost port and return its base URL
async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    format!("http://{}", addr)
}

struct Plane {
    authority: Arc<JwtAuthority>,
    manager_url: String,
    provider_url: String,
    cluster: Arc<MemoryCluster>,
}

impl Plane {
    fn client(&self, perms: &[Permission]) -> ManagerClient {
        let token = self.authority.issue(perms).unwrap();
        ManagerClient::connect(&self.manager_url, Some(token)).unwrap()
    }

    fn admin(&self) -> ManagerClient {
        self.client(&Permission::ALL)
    }

    /// Register the provider the way the manager link does
    async fn register(&self) -> uuid::Uuid {
        let descriptor = Provider::new(PROVIDER_ID).with_owner("ops");
        let config = LinkConfig::new(format!("{}/", self.provider_url), descriptor)
            .with_interval(Duration::from_secs(60));
        ManagerLink::new(config, Arc::new(self.admin()))
            .register()
            .await
            .unwrap()
    }
}

async fn start_plane() -> Plane {
    let authority = Arc::new(JwtAuthority::new(b"integration-secret"));

    let registry = Arc::new(ProviderRegistry::new(RegistryConfig::default()));
    let orchestrator = Orchestrator::new(
        registry,
        Arc::new(MemoryStore::new()),
        Arc::new(RemoteConnector::new(authority.clone()).with_timeout(Duration::from_secs(5))),
    );
    let manager_url = spawn_server(create_manager_router(ManagerState::new(
        Arc::new(orchestrator),
        authority.clone(),
    )))
    .await;

    let cluster = Arc::new(MemoryCluster::new().with_node(
        "node-0",
        4.0,
        8_000_000_000,
        50_000_000_000,
    ));
    let provider = LocalProvider::new(cluster.clone()).with_expose_ip(EXPOSE_IP);
    let verifier: SharedVerifier = Arc::new(ManagerClient::connect(&manager_url, None).unwrap());
    let provider_url = spawn_server(create_provider_router(ProviderState::new(
        Arc::new(provider),
        verifier,
    )))
    .await;

    Plane {
        authority,
        manager_url,
        provider_url,
        cluster,
    }
}

fn web_service() -> Service {
    Service::new("nginx:1.25")
        .with_port(Port::tcp(80))
        .with_resources(0.5, 256, 0)
}

#[tokio::test]
async fn test_provider_registration() {
    let plane = start_plane().await;
    let admin = plane.admin();

    let session = plane.register().await;
    assert_eq!(session, admin.session().await.unwrap());

    // Registering again within the same session is a no-op
    assert_eq!(plane.register().await, session);

    let providers = admin
        .list_providers(&ProviderFilter::default())
        .await
        .unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].id.as_str(), PROVIDER_ID);
    assert_eq!(providers[0].owner, "ops");
    assert_eq!(providers[0].state, ProviderStatus::Online);
    // No advertised IP, so the observed peer address is used
    assert_eq!(providers[0].ip, "127.0.0.1");

    let stats = admin.get_statistics(&PROVIDER_ID.into()).await.unwrap();
    assert_eq!(stats.cpu_cores.max_cpu_cores, 4.0);
}

#[tokio::test]
async fn test_deployment_lifecycle() {
    let plane = start_plane().await;
    let admin = plane.admin();
    plane.register().await;

    let request = fleetplane::api::Deployment::new(PROVIDER_ID)
        .with_owner("alice")
        .with_service(web_service());
    let created = admin.create_deployment(request).await.unwrap();

    assert!(!created.id.is_empty());
    assert_eq!(created.state, DeploymentState::Active);
    assert_eq!(created.provider_expose_ip, EXPOSE_IP);
    assert_eq!(created.services.len(), 1);
    assert_eq!(created.services[0].image, "nginx:1.25");
    assert_eq!(created.services[0].deployment_id, created.id);
    assert_eq!(plane.cluster.namespaces().await.len(), 1);

    let filter = DeploymentFilter {
        deployment_id: Some(created.id.clone()),
        ..Default::default()
    };
    let listed = admin.list_deployments(&filter).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].state, DeploymentState::Active);
    assert_eq!(listed[0].services[0].status.ready_replicas, 1);

    let logs = admin.get_logs(&created).await.unwrap();
    assert_eq!(logs.len(), 1);

    admin.close_deployment(&created).await.unwrap();
    assert!(plane.cluster.namespaces().await.is_empty());

    let closed = admin
        .list_deployments(&DeploymentFilter {
            deployment_id: Some(created.id.clone()),
            states: DeploymentState::ALL.to_vec(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].state, DeploymentState::Close);
}

#[tokio::test]
async fn test_create_on_unknown_provider() {
    let plane = start_plane().await;
    let request = fleetplane::api::Deployment::new("missing").with_service(web_service());

    let err = plane.admin().create_deployment(request).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_permissions_enforced() {
    let plane = start_plane().await;
    plane.register().await;

    let reader = plane.client(&[Permission::Read]);
    assert_eq!(reader.version().await.unwrap(), MANAGER_API_VERSION);

    let request = fleetplane::api::Deployment::new(PROVIDER_ID).with_service(web_service());
    let err = reader.create_deployment(request).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)), "got {:?}", err);

    let anonymous = ManagerClient::connect(&plane.manager_url, None).unwrap();
    let err = anonymous.version().await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)), "got {:?}", err);

    let forged = JwtAuthority::new(b"another-secret")
        .issue(&Permission::ALL)
        .unwrap();
    let forged = ManagerClient::connect(&plane.manager_url, Some(forged)).unwrap();
    assert!(forged.session().await.is_err());
}

#[tokio::test]
async fn test_provider_checks_tokens_with_manager() {
    let plane = start_plane().await;

    let admin_token = plane
        .authority
        .issue(&[Permission::Read, Permission::Admin])
        .unwrap();
    assert!(connect_remote_provider(&plane.provider_url, admin_token)
        .await
        .is_ok());

    // The provider version endpoint needs admin
    let read_token = plane.authority.issue(&[Permission::Read]).unwrap();
    let err = connect_remote_provider(&plane.provider_url, read_token)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)), "got {:?}", err);
}
