//! Configuration loading from TOML and environment variables.
//!
//! The server reads its configuration from:
//! 1. A TOML config file (default: config/cadre.toml)
//! 2. Environment variables (override TOML values)
//! 3. Command-line flags (override both, applied in `main`)
//!
//! Environment variable prefix: CADRE_

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cadre_hierarchy::HierarchyConfig;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// RPC server configuration.
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Hierarchy engine configuration.
    #[serde(default)]
    pub hierarchy: HierarchySection,
    /// Store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// JSON-RPC server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Address to bind the RPC server to.
    #[serde(default = "default_rpc_addr")]
    pub bind_addr: String,
    /// Maximum concurrent RPC connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Request timeout in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub request_timeout_secs: u64,
}

/// Hierarchy engine limits, mapped onto [`HierarchyConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchySection {
    /// Deepest allowed level (at most 6).
    #[serde(default = "default_max_level")]
    pub max_level: u32,
    /// Per-operation timeout in milliseconds; 0 disables it.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
    /// Lock re-resolution attempts per mutation.
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,
    /// Re-validate affected trees after every commit.
    #[serde(default)]
    pub verify_after_commit: bool,
}

/// Store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Forest snapshot loaded at start-up and rewritten after every
    /// committed mutation. Purely in-memory when unset.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cadre_hierarchy=debug").
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output JSON-formatted logs.
    #[serde(default)]
    pub json_format: bool,
}

// -- Defaults --

fn default_rpc_addr() -> String {
    "127.0.0.1:9470".to_string()
}
fn default_max_connections() -> usize {
    32
}
fn default_rpc_timeout() -> u64 {
    30
}
fn default_max_level() -> u32 {
    cadre_protocol::MAX_LEVEL
}
fn default_operation_timeout() -> u64 {
    cadre_protocol::DEFAULT_OPERATION_TIMEOUT_MS
}
fn default_lock_retries() -> u32 {
    cadre_protocol::DEFAULT_LOCK_RETRIES
}
fn default_log_level() -> String {
    "info".to_string()
}

// -- Trait impls --

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_rpc_addr(),
            max_connections: default_max_connections(),
            request_timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for HierarchySection {
    fn default() -> Self {
        Self {
            max_level: default_max_level(),
            operation_timeout_ms: default_operation_timeout(),
            lock_retries: default_lock_retries(),
            verify_after_commit: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl HierarchySection {
    pub fn to_engine_config(&self) -> HierarchyConfig {
        HierarchyConfig {
            max_level: self.max_level,
            operation_timeout: (self.operation_timeout_ms > 0)
                .then(|| Duration::from_millis(self.operation_timeout_ms)),
            lock_retries: self.lock_retries,
            verify_after_commit: self.verify_after_commit,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, with environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let mut config = if let Some(path) = path {
            if path.exists() {
                Self::from_file(path)?
            } else {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not found, using defaults"
                );
                Self::default()
            }
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CADRE_RPC_BIND_ADDR") {
            self.rpc.bind_addr = val;
        }
        if let Ok(val) = std::env::var("CADRE_RPC_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                self.rpc.max_connections = n;
            }
        }
        if let Ok(val) = std::env::var("CADRE_RPC_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.rpc.request_timeout_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("CADRE_MAX_LEVEL") {
            if let Ok(level) = val.parse() {
                self.hierarchy.max_level = level;
            }
        }
        if let Ok(val) = std::env::var("CADRE_OPERATION_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.hierarchy.operation_timeout_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("CADRE_LOCK_RETRIES") {
            if let Ok(n) = val.parse() {
                self.hierarchy.lock_retries = n;
            }
        }
        if let Ok(val) = std::env::var("CADRE_VERIFY_AFTER_COMMIT") {
            self.hierarchy.verify_after_commit = val == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("CADRE_SNAPSHOT_PATH") {
            self.store.snapshot_path = (!val.is_empty()).then(|| PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("CADRE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("CADRE_LOG_JSON") {
            self.logging.json_format = val == "true" || val == "1";
        }
    }

    /// Parse the RPC bind address into a SocketAddr.
    pub fn rpc_socket_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        Ok(self.rpc.bind_addr.parse()?)
    }
}
