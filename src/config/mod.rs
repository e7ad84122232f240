//! YAML configuration for the manager, providers and the CLI
//!
//! Everything lives under `~/.fleetplane/` unless a path is given:
//! `manager.yaml`, `provider.yaml`, the manager's signing `secret`, the
//! admin `token` the manager writes for the CLI, and `provider-id`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::manager::registry::{
    RegistryConfig, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_PROVIDER_TTL,
};
use crate::manager::DEFAULT_MANAGER_PORT;
use crate::provider::link::DEFAULT_LINK_INTERVAL;
use crate::provider::manifest::TranslatorSettings;
use crate::provider::DEFAULT_PROVIDER_PORT;

/// Default directory for configuration and state: ~/.fleetplane
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fleetplane")
}

pub fn default_manager_config_path() -> PathBuf {
    default_home().join("manager.yaml")
}

pub fn default_provider_config_path() -> PathBuf {
    default_home().join("provider.yaml")
}

/// Signing secret generated by the manager on first start
pub fn default_secret_path() -> PathBuf {
    default_home().join("secret")
}

/// Admin token the manager writes for the CLI
pub fn default_token_path() -> PathBuf {
    default_home().join("token")
}

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config {0}: {1}")]
    ParseError(PathBuf, String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        crate::error::Error::Validation(e.to_string())
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Provider liveness settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds between registry sweeps
    pub interval_secs: u64,
    /// Seconds of silence before a provider is evicted
    pub ttl_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
            ttl_secs: DEFAULT_PROVIDER_TTL.as_secs(),
        }
    }
}

/// Manager process configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub listen_address: String,
    /// Token signing secret; generated into the secret file when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// JSON snapshot file for deployments; in memory only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    pub heartbeat: HeartbeatConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen_address: format!("0.0.0.0:{}", DEFAULT_MANAGER_PORT),
            secret: None,
            store_path: None,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn registry_config(&self) -> Result<RegistryConfig, ConfigError> {
        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.interval_secs must be positive".to_string(),
            ));
        }
        if self.heartbeat.ttl_secs < self.heartbeat.interval_secs {
            return Err(ConfigError::Invalid(format!(
                "heartbeat.ttl_secs ({}) is shorter than heartbeat.interval_secs ({})",
                self.heartbeat.ttl_secs, self.heartbeat.interval_secs
            )));
        }
        Ok(RegistryConfig::default()
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat.interval_secs))
            .with_ttl(Duration::from_secs(self.heartbeat.ttl_secs)))
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Cluster driver a provider runs on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Kube,
    Memory,
}

/// Capacity of the single node of the in-memory driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryNodeConfig {
    pub cpu_cores: f64,
    pub memory_bytes: u64,
    pub storage_bytes: u64,
}

impl Default for MemoryNodeConfig {
    fn default() -> Self {
        Self {
            cpu_cores: 8.0,
            memory_bytes: 16_000_000_000,
            storage_bytes: 100_000_000_000,
        }
    }
}

/// Manager endpoint a provider registers with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerEndpoint {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Provider process configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub listen_address: String,
    /// Address the manager uses to reach this provider; the listen address
    /// when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_address: Option<String>,
    /// Provider ID; generated once into the ID file when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub owner: String,
    pub host_uri: String,
    /// Public IP reported on deployments and sent on registration
    pub public_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kube_config_path: Option<String>,
    /// Seconds before a manager call times out
    pub timeout_secs: u64,
    pub manager: ManagerEndpoint,
    pub translator: TranslatorSettings,
    /// Seconds between manager session checks
    pub heartbeat_interval_secs: u64,
    pub driver: DriverKind,
    pub memory_node: MemoryNodeConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            listen_address: format!("0.0.0.0:{}", DEFAULT_PROVIDER_PORT),
            advertise_address: None,
            id: None,
            owner: String::new(),
            host_uri: String::new(),
            public_ip: String::new(),
            kube_config_path: None,
            timeout_secs: 30,
            manager: ManagerEndpoint::default(),
            translator: TranslatorSettings::default(),
            heartbeat_interval_secs: DEFAULT_LINK_INTERVAL.as_secs(),
            driver: DriverKind::default(),
            memory_node: MemoryNodeConfig::default(),
        }
    }
}

impl ProviderConfig {
    /// URL the manager should call back on
    pub fn advertise_url(&self) -> String {
        let address = self
            .advertise_address
            .as_deref()
            .unwrap_or(&self.listen_address);
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}/", address)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.url.is_empty() {
            return Err(ConfigError::Invalid("manager.url is required".to_string()));
        }
        let factors = [
            ("cpu_commit_factor", self.translator.cpu_commit_factor),
            ("memory_commit_factor", self.translator.memory_commit_factor),
            ("storage_commit_factor", self.translator.storage_commit_factor),
        ];
        for (name, factor) in factors {
            if !factor.is_finite() || factor <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "translator.{} must be positive, got {}",
                    name, factor
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

/// Parse a config from YAML; an empty document yields the defaults
pub fn parse_config<T>(content: &str, path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(content)
        .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load a config file, falling back to the defaults when it does not exist
pub fn load_config_from<T>(path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, path)
}

pub fn save_config_to<T: Serialize>(config: &T, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_yaml::to_string(config)
        .map_err(|e| ConfigError::Invalid(format!("failed to serialize config: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Resolve the provider ID: the configured one, else the one stored in
/// `id_path`, else a new one written there
pub fn resolve_provider_id(config: &ProviderConfig, id_path: &Path) -> Result<String, ConfigError> {
    if let Some(id) = config.id.as_deref().filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }

    if id_path.exists() {
        let stored = std::fs::read_to_string(id_path)?;
        let stored = stored.trim();
        if !stored.is_empty() {
            return Ok(stored.to_string());
        }
    }

    if let Some(parent) = id_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let id = Uuid::new_v4().to_string();
    std::fs::write(id_path, &id)?;
    Ok(id)
}

/// Read the CLI token from a file written by the manager
pub fn read_token(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
