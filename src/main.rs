use std::net::SocketAddr;
use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleetplane::api::{Permission, Provider, ProviderHandle};
use fleetplane::auth::{load_or_create_secret, JwtAuthority, SharedVerifier};
use fleetplane::cli::{
    create_deployment, delete_deployment, deployment_status, list_deployments, list_providers,
    parse_permissions, provider_statistics, Cli, Commands, ConnectionArgs, DeploymentCommand,
    ManagerCommand, ManagerServeArgs, ProviderCommand, ProviderServeArgs, TokenArgs,
};
use fleetplane::client::{HttpTransport, ManagerClient, RemoteConnector};
use fleetplane::config::{
    default_manager_config_path, default_provider_config_path, default_secret_path,
    default_token_path, load_config_from, read_token, resolve_provider_id, DriverKind,
    ManagerConfig, ProviderConfig,
};
use fleetplane::manager::{
    create_manager_router, spawn_sweeper, ManagerState, MemoryStore, Orchestrator,
    ProviderRegistry, SharedStore,
};
use fleetplane::provider::{
    create_provider_router, spawn_manager_link, KubeDriver, LinkConfig, LocalProvider,
    MemoryCluster, ProviderState, SharedDriver,
};

#[tokio::main]
async fn main() {
    let mut cli = Cli::parse();

    // Load .env before anything reads the environment, then re-read flags
    // so env-backed arguments see it
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            eprintln!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
        cli = Cli::parse();
    }

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Manager(args) => match args.command {
            ManagerCommand::Serve(serve) => serve_manager(serve).await,
            ManagerCommand::Token(token) => print_token(token),
        },
        Commands::Provider(args) => match args.command {
            ProviderCommand::Serve(serve) => serve_provider(serve).await,
            ProviderCommand::List(list) => {
                let manager = manager_client(&list.connection)?;
                print!("{}", list_providers(&manager, &list).await?);
                Ok(())
            }
            ProviderCommand::Stats(stats) => {
                let manager = manager_client(&stats.connection)?;
                print!("{}", provider_statistics(&manager, &stats.id).await?);
                Ok(())
            }
        },
        Commands::Deployment(args) => {
            let manager = manager_client(&args.connection)?;
            let output = match args.command {
                DeploymentCommand::Create(create) => create_deployment(&manager, &create).await?,
                DeploymentCommand::List(list) => list_deployments(&manager, &list).await?,
                DeploymentCommand::Delete(delete) => {
                    delete_deployment(&manager, &delete.id).await?
                }
                DeploymentCommand::Status(status) => {
                    deployment_status(&manager, &status.id, status.log).await?
                }
            };
            print!("{}", output);
            Ok(())
        }
    }
}

fn manager_client(connection: &ConnectionArgs) -> Result<ManagerClient> {
    let token = connection
        .token
        .clone()
        .or_else(|| read_token(&default_token_path()));
    if token.is_none() {
        warn!("No API token given and no token file found; requests will be rejected");
    }
    Ok(ManagerClient::connect(&connection.manager_url, token)?)
}

// ============================================================================
// Manager
// ============================================================================

fn load_manager_config(path: Option<&Path>) -> Result<ManagerConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_manager_config_path);
    load_config_from(&path).with_context(|| format!("loading {}", path.display()))
}

fn manager_authority(config: &ManagerConfig) -> Result<JwtAuthority> {
    let secret = match config.secret.as_deref().filter(|s| !s.is_empty()) {
        Some(secret) => secret.to_string(),
        None => {
            let path = default_secret_path();
            load_or_create_secret(&path)
                .with_context(|| format!("reading secret {}", path.display()))?
        }
    };
    Ok(JwtAuthority::new(secret.as_bytes()))
}

fn print_token(args: TokenArgs) -> Result<()> {
    let config = load_manager_config(args.config.as_deref())?;
    let authority = manager_authority(&config)?;
    let perms = parse_permissions(&args.perms)?;
    println!("{}", authority.issue(&perms)?);
    Ok(())
}

async fn serve_manager(args: ManagerServeArgs) -> Result<()> {
    let mut config = load_manager_config(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_address = listen;
    }

    let authority = Arc::new(manager_authority(&config)?);
    let token_path = default_token_path();
    let admin_token = authority.issue(&Permission::ALL)?;
    if let Some(parent) = token_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&token_path, admin_token)
        .with_context(|| format!("writing token {}", token_path.display()))?;

    let store: SharedStore = match &config.store_path {
        Some(path) => Arc::new(MemoryStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let registry = Arc::new(ProviderRegistry::new(config.registry_config()?));
    let sweeper = spawn_sweeper(registry.clone());

    let connector = RemoteConnector::new(authority.clone());
    let orchestrator = Orchestrator::new(registry, store, Arc::new(connector));
    let app = create_manager_router(ManagerState::new(Arc::new(orchestrator), authority));

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("binding {}", config.listen_address))?;

    info!("Starting fleetplane manager on {}", config.listen_address);
    info!("Admin token written to {}", token_path.display());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = sweeper.send(true);
    info!("Manager stopped");
    Ok(())
}

// ============================================================================
// Provider
// ============================================================================

async fn serve_provider(args: ProviderServeArgs) -> Result<()> {
    let path = args.config.unwrap_or_else(default_provider_config_path);
    let mut config: ProviderConfig =
        load_config_from(&path).with_context(|| format!("loading {}", path.display()))?;
    if let Some(listen) = args.listen {
        config.listen_address = listen;
    }
    config.validate()?;

    let id = resolve_provider_id(&config, &path.with_file_name("provider-id"))?;

    let driver: SharedDriver = match config.driver {
        DriverKind::Kube => {
            Arc::new(KubeDriver::connect(config.kube_config_path.as_deref()).await?)
        }
        DriverKind::Memory => {
            let node = &config.memory_node;
            Arc::new(MemoryCluster::new().with_node(
                "memory-0",
                node.cpu_cores,
                node.memory_bytes,
                node.storage_bytes,
            ))
        }
    };
    let provider: ProviderHandle = Arc::new(
        LocalProvider::new(driver)
            .with_settings(config.translator.clone())
            .with_expose_ip(config.public_ip.clone()),
    );

    let manager_token = config
        .manager
        .token
        .clone()
        .or_else(|| read_token(&default_token_path()));
    if manager_token.is_none() {
        bail!("manager.token is required to register with the manager");
    }
    let manager = ManagerClient::new(HttpTransport::with_timeout(
        &config.manager.url,
        manager_token,
        config.timeout(),
    )?);

    let verifier: SharedVerifier = Arc::new(manager.clone());
    let app = create_provider_router(ProviderState::new(provider, verifier));

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("binding {}", config.listen_address))?;

    let host_uri = if config.host_uri.is_empty() {
        local_hostname()
    } else {
        config.host_uri.clone()
    };
    let mut descriptor = Provider::new(id.as_str())
        .with_owner(config.owner.clone())
        .with_host_uri(host_uri);
    descriptor.ip = config.public_ip.clone();
    let link_config = LinkConfig::new(config.advertise_url(), descriptor)
        .with_interval(config.heartbeat_interval());
    let link = spawn_manager_link(link_config, Arc::new(manager));

    info!(
        "Starting fleetplane provider {} on {} (driver {:?})",
        id, config.listen_address, config.driver
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = link.send(true);
    info!("Provider stopped");
    Ok(())
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
