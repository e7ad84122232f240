//! CLI module for fleetplane
//!
//! Subcommands:
//! - `fleetplane manager serve|token` - Run the manager, issue API tokens
//! - `fleetplane provider serve|list|stats` - Run a provider, inspect providers
//! - `fleetplane deployment create|list|delete|status` - Manage deployments

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

/// Default manager URL used by client commands
pub const DEFAULT_MANAGER_URL: &str = "http://127.0.0.1:6123";

#[derive(Parser, Debug)]
#[command(name = "fleetplane")]
#[command(about = "Run container deployments across independent compute providers")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a .env file loaded before anything else
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run or administer the manager
    Manager(ManagerArgs),

    /// Run a provider or inspect registered providers
    Provider(ProviderArgs),

    /// Manage deployments
    #[command(visible_alias = "deploy")]
    Deployment(DeploymentArgs),
}

/// Connection to a running manager
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Manager URL
    #[arg(long, env = "FLEETPLANE_MANAGER_URL", default_value = DEFAULT_MANAGER_URL)]
    pub manager_url: String,

    /// API token (default: the token file written by the manager)
    #[arg(long, env = "FLEETPLANE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

// ============================================================================
// Manager
// ============================================================================

#[derive(Parser, Debug)]
pub struct ManagerArgs {
    #[command(subcommand)]
    pub command: ManagerCommand,
}

#[derive(Subcommand, Debug)]
pub enum ManagerCommand {
    /// Run the manager server
    Serve(ManagerServeArgs),

    /// Print a new API token signed with the manager secret
    Token(TokenArgs),
}

#[derive(Parser, Debug)]
pub struct ManagerServeArgs {
    /// Path to manager config (default: ~/.fleetplane/manager.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the listen address
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,
}

#[derive(Parser, Debug)]
pub struct TokenArgs {
    /// Path to manager config (default: ~/.fleetplane/manager.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Permission to grant; repeatable (read, write, sign, admin)
    #[arg(long = "perm", value_name = "PERMISSION")]
    pub perms: Vec<String>,
}

// ============================================================================
// Provider
// ============================================================================

#[derive(Parser, Debug)]
pub struct ProviderArgs {
    #[command(subcommand)]
    pub command: ProviderCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProviderCommand {
    /// Run the provider server and register with the manager
    Serve(ProviderServeArgs),

    /// List providers known to the manager
    #[command(visible_alias = "ls")]
    List(ProviderListArgs),

    /// Show resource statistics of a provider
    Stats(ProviderStatsArgs),
}

#[derive(Parser, Debug)]
pub struct ProviderServeArgs {
    /// Path to provider config (default: ~/.fleetplane/provider.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the listen address
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ProviderListArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Only providers with this owner
    #[arg(long)]
    pub owner: Option<String>,

    /// Only the provider with this ID
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long, default_value = "1")]
    pub page: i64,

    #[arg(long, default_value = "10")]
    pub size: i64,
}

#[derive(Parser, Debug)]
pub struct ProviderStatsArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Provider ID
    pub id: String,
}

// ============================================================================
// Deployment
// ============================================================================

#[derive(Parser, Debug)]
pub struct DeploymentArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: DeploymentCommand,
}

#[derive(Subcommand, Debug)]
pub enum DeploymentCommand {
    /// Create a deployment from flags or a YAML template
    Create(CreateArgs),

    /// List deployments
    #[command(visible_alias = "ls")]
    List(ListArgs),

    /// Close every deployment with the given ID
    #[command(visible_alias = "rm")]
    Delete(DeleteArgs),

    /// Show a deployment, optionally with its logs
    Status(StatusArgs),
}

#[derive(Parser, Debug, Default)]
pub struct CreateArgs {
    /// Provider that runs the deployment
    #[arg(long)]
    pub provider_id: String,

    /// YAML deployment template; flags below override its fields
    #[arg(long, value_name = "FILE")]
    pub template: Option<PathBuf>,

    /// Container image
    #[arg(long)]
    pub image: Option<String>,

    /// Container port, optionally with a protocol (80, 53/udp); repeatable
    #[arg(long = "port", value_name = "PORT")]
    pub ports: Vec<String>,

    /// CPU in cores
    #[arg(long)]
    pub cpu: Option<f64>,

    /// Memory in megabytes
    #[arg(long)]
    pub mem: Option<i64>,

    /// Storage in megabytes
    #[arg(long)]
    pub storage: Option<i64>,

    /// Environment variables as a JSON object
    #[arg(long, value_name = "JSON")]
    pub env: Option<String>,

    /// Container argument; repeatable
    #[arg(long = "args", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub owner: Option<String>,

    /// Mark the deployment as authority-managed
    #[arg(long)]
    pub auth: bool,
}

#[derive(Parser, Debug, Default)]
pub struct ListArgs {
    #[arg(long)]
    pub owner: Option<String>,

    /// Only the deployment with this ID
    #[arg(long)]
    pub id: Option<String>,

    /// Include inactive and closed deployments
    #[arg(long)]
    pub show_all: bool,

    #[arg(long, default_value = "1")]
    pub page: i64,

    #[arg(long, default_value = "10")]
    pub size: i64,
}

#[derive(Parser, Debug)]
pub struct DeleteArgs {
    /// Deployment ID
    pub id: String,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Deployment ID
    pub id: String,

    /// Also print the logs of every service
    #[arg(long)]
    pub log: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manager_serve() {
        let cli = Cli::parse_from(["fleetplane", "manager", "serve", "--listen", "127.0.0.1:7000"]);
        match cli.command {
            Commands::Manager(args) => match args.command {
                ManagerCommand::Serve(serve) => {
                    assert_eq!(serve.listen.as_deref(), Some("127.0.0.1:7000"));
                    assert!(serve.config.is_none());
                }
                _ => panic!("Expected Serve command"),
            },
            _ => panic!("Expected Manager command"),
        }
    }

    #[test]
    fn test_parse_token_perms() {
        let cli = Cli::parse_from([
            "fleetplane",
            "manager",
            "token",
            "--perm",
            "read",
            "--perm",
            "admin",
        ]);
        match cli.command {
            Commands::Manager(ManagerArgs {
                command: ManagerCommand::Token(args),
            }) => {
                assert_eq!(args.perms, vec!["read", "admin"]);
            }
            _ => panic!("Expected Token command"),
        }
    }

    #[test]
    fn test_parse_deployment_create() {
        let cli = Cli::parse_from([
            "fleetplane",
            "deployment",
            "--manager-url",
            "http://10.0.0.1:6123",
            "create",
            "--provider-id",
            "p1",
            "--image",
            "nginx:1.25",
            "--port",
            "80",
            "--port",
            "53/udp",
            "--cpu",
            "0.5",
            "--mem",
            "512",
            "--env",
            r#"{"MODE":"prod"}"#,
        ]);
        match cli.command {
            Commands::Deployment(args) => {
                assert_eq!(args.connection.manager_url, "http://10.0.0.1:6123");
                match args.command {
                    DeploymentCommand::Create(create) => {
                        assert_eq!(create.provider_id, "p1");
                        assert_eq!(create.image.as_deref(), Some("nginx:1.25"));
                        assert_eq!(create.ports, vec!["80", "53/udp"]);
                        assert_eq!(create.cpu, Some(0.5));
                        assert_eq!(create.mem, Some(512));
                        assert!(!create.auth);
                    }
                    _ => panic!("Expected Create command"),
                }
            }
            _ => panic!("Expected Deployment command"),
        }
    }

    #[test]
    fn test_create_requires_provider_id() {
        let result =
            Cli::try_parse_from(["fleetplane", "deployment", "create", "--image", "nginx"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_deployment_list_defaults() {
        let cli = Cli::parse_from(["fleetplane", "deploy", "list"]);
        match cli.command {
            Commands::Deployment(DeploymentArgs {
                command: DeploymentCommand::List(list),
                ..
            }) => {
                assert_eq!(list.page, 1);
                assert_eq!(list.size, 10);
                assert!(!list.show_all);
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_parse_status_with_log() {
        let cli = Cli::parse_from(["fleetplane", "deployment", "status", "abc", "--log"]);
        match cli.command {
            Commands::Deployment(DeploymentArgs {
                command: DeploymentCommand::Status(status),
                ..
            }) => {
                assert_eq!(status.id, "abc");
                assert!(status.log);
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_parse_provider_stats() {
        let cli = Cli::parse_from(["fleetplane", "provider", "stats", "p1"]);
        match cli.command {
            Commands::Provider(ProviderArgs {
                command: ProviderCommand::Stats(stats),
            }) => assert_eq!(stats.id, "p1"),
            _ => panic!("Expected Stats command"),
        }
    }

    #[test]
    fn test_verbose_global() {
        let cli = Cli::parse_from(["fleetplane", "-vvv", "provider", "list"]);
        assert_eq!(cli.verbose, 3);
    }
}
