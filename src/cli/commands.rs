//! Command implementations for the CLI
//!
//! Commands take a [`ManagerApi`] and return the text to print, so they run
//! the same against a remote manager and an in-process one.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use super::display::{
    format_deployment_detail, format_deployment_list, format_logs, format_provider_list,
    format_statistics,
};
use super::{CreateArgs, ListArgs, ProviderListArgs};
use crate::api::{
    Deployment, DeploymentFilter, DeploymentId, DeploymentState, ManagerApi, Permission, Port,
    ProviderFilter, ProviderId, Service,
};
use crate::config::ConfigError;
use crate::error::Error;

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Api(#[from] Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid template: {0}")]
    Template(#[from] serde_yaml::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Api(e) => e,
            other => Error::Validation(other.to_string()),
        }
    }
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Argument parsing (pure)
// ============================================================================

/// Parse `80`, `80/tcp` or `53/udp`
pub fn parse_port(raw: &str) -> CommandResult<Port> {
    let (number, protocol) = match raw.split_once('/') {
        Some((number, protocol)) => (number, protocol.to_uppercase()),
        None => (raw, "TCP".to_string()),
    };
    let port: i32 = number
        .trim()
        .parse()
        .map_err(|_| CommandError::InvalidArgument(format!("invalid port '{}'", raw)))?;
    if !(1..=65535).contains(&port) {
        return Err(CommandError::InvalidArgument(format!(
            "port {} out of range",
            port
        )));
    }
    Ok(Port {
        protocol,
        port,
        ..Default::default()
    })
}

/// Parse `--env` as a JSON object of strings
pub fn parse_env(raw: &str) -> CommandResult<BTreeMap<String, String>> {
    serde_json::from_str(raw).map_err(|e| {
        CommandError::InvalidArgument(format!("--env must be a JSON object of strings: {}", e))
    })
}

/// Parse permission names, defaulting to read
pub fn parse_permissions(raw: &[String]) -> CommandResult<Vec<Permission>> {
    if raw.is_empty() {
        return Ok(Permission::DEFAULT.to_vec());
    }
    raw.iter()
        .map(|p| {
            p.parse::<Permission>()
                .map_err(|_| CommandError::InvalidArgument(format!("unknown permission '{}'", p)))
        })
        .collect()
}

/// Load a deployment template
pub fn load_template(path: &Path) -> CommandResult<Deployment> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Build the deployment a `create` invocation asks for
///
/// Flags override the template. Without a template `--image` is required
/// and describes the single service.
pub fn build_deployment(args: &CreateArgs) -> CommandResult<Deployment> {
    let mut deployment = match &args.template {
        Some(path) => load_template(path)?,
        None => {
            let image = args.image.as_deref().ok_or_else(|| {
                CommandError::InvalidArgument("--image or --template is required".to_string())
            })?;
            Deployment::default().with_service(Service::new(image))
        }
    };

    deployment.provider_id = ProviderId::new(args.provider_id.clone());
    if let Some(name) = &args.name {
        deployment.name = name.clone();
    }
    if let Some(owner) = &args.owner {
        deployment.owner = owner.clone();
    }
    if args.auth {
        deployment.authority = true;
    }

    let ports = args
        .ports
        .iter()
        .map(|p| parse_port(p))
        .collect::<CommandResult<Vec<_>>>()?;
    let env = args.env.as_deref().map(parse_env).transpose()?;

    let service = deployment.services.first_mut().ok_or_else(|| {
        CommandError::InvalidArgument("template declares no services".to_string())
    })?;
    if let Some(image) = &args.image {
        service.image = image.clone();
    }
    if !ports.is_empty() {
        service.ports = ports;
    }
    if let Some(cpu) = args.cpu {
        service.compute_resources.cpu = cpu;
    }
    if let Some(mem) = args.mem {
        service.compute_resources.memory = mem;
    }
    if let Some(storage) = args.storage {
        service.compute_resources.storage = storage;
    }
    if let Some(env) = env {
        service.env = env;
    }
    if !args.args.is_empty() {
        service.arguments = args.args.clone();
    }

    Ok(deployment)
}

/// Filter for `deployment list`; only active deployments unless `--show-all`
pub fn deployment_filter(args: &ListArgs) -> DeploymentFilter {
    DeploymentFilter {
        deployment_id: args.id.clone().map(DeploymentId::from),
        owner: args.owner.clone(),
        states: if args.show_all {
            DeploymentState::ALL.to_vec()
        } else {
            vec![DeploymentState::Active]
        },
        page: args.page,
        size: args.size,
    }
}

pub fn provider_filter(args: &ProviderListArgs) -> ProviderFilter {
    ProviderFilter {
        id: args.id.clone().map(ProviderId::from),
        owner: args.owner.clone(),
        states: Vec::new(),
        page: args.page,
        size: args.size,
    }
}

// ============================================================================
// Manager-backed commands
// ============================================================================

pub async fn create_deployment(
    manager: &dyn ManagerApi,
    args: &CreateArgs,
) -> CommandResult<String> {
    let deployment = build_deployment(args)?;
    let created = manager.create_deployment(deployment).await?;
    Ok(format!(
        "Deployment {} created on provider {}\n",
        created.id, created.provider_id
    ))
}

pub async fn list_deployments(
    manager: &dyn ManagerApi,
    args: &ListArgs,
) -> CommandResult<String> {
    let deployments = manager.list_deployments(&deployment_filter(args)).await?;
    Ok(format_deployment_list(&deployments))
}

/// Open deployments with `id`
async fn open_deployments(manager: &dyn ManagerApi, id: &str) -> CommandResult<Vec<Deployment>> {
    let filter = DeploymentFilter {
        deployment_id: Some(DeploymentId::from(id)),
        states: vec![DeploymentState::Active, DeploymentState::InActive],
        size: 100,
        ..Default::default()
    };
    Ok(manager.list_deployments(&filter).await?)
}

/// Close every open deployment with the given ID
pub async fn delete_deployment(manager: &dyn ManagerApi, id: &str) -> CommandResult<String> {
    let matches = open_deployments(manager, id).await?;
    if matches.is_empty() {
        return Err(Error::not_found(format!("deployment {}", id)).into());
    }

    for deployment in &matches {
        manager.close_deployment(deployment).await?;
    }
    Ok(format!("Deployment {} deleted\n", id))
}

pub async fn deployment_status(
    manager: &dyn ManagerApi,
    id: &str,
    with_logs: bool,
) -> CommandResult<String> {
    let filter = DeploymentFilter {
        deployment_id: Some(DeploymentId::from(id)),
        states: DeploymentState::ALL.to_vec(),
        ..Default::default()
    };
    let deployment = manager
        .list_deployments(&filter)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(format!("deployment {}", id)))?;

    let mut output = format_deployment_detail(&deployment);
    if with_logs && deployment.state != DeploymentState::Close {
        let logs = manager.get_logs(&deployment).await?;
        output.push('\n');
        output.push_str(&format_logs(&logs));
    }
    Ok(output)
}

pub async fn list_providers(
    manager: &dyn ManagerApi,
    args: &ProviderListArgs,
) -> CommandResult<String> {
    let providers = manager.list_providers(&provider_filter(args)).await?;
    Ok(format_provider_list(&providers))
}

pub async fn provider_statistics(manager: &dyn ManagerApi, id: &str) -> CommandResult<String> {
    let stats = manager.get_statistics(&ProviderId::from(id)).await?;
    Ok(format_statistics(id, &stats))
}
