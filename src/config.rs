//! Configuration for the launcher
//!
//! Loaded from a TOML file, with secrets optionally supplied through the
//! environment (a `.env` file is honoured). Every section has defaults so a
//! minimal file only needs the network and key settings.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Environment variable that overrides `keys.private_keys`
pub const PRIVATE_KEYS_ENV: &str = "LAUNCHER_PRIVATE_KEYS";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub keys: KeysConfig,

    #[serde(default)]
    pub gas: GasConfig,

    #[serde(default)]
    pub nonce: NonceConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP API binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Deadline applied to every coordinator operation
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the embedded database
    #[serde(default = "default_storage_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Name the nonce counter is keyed by
    #[serde(default = "default_network_name")]
    pub name: String,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// JSON-RPC endpoint used for gas price and broadcast
    #[serde(default)]
    pub rpc_url: Option<String>,

    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Comma separated hex private keys
    #[serde(default)]
    pub private_keys: Option<String>,
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysConfig")
            .field(
                "private_keys",
                &self.private_keys.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GasConfig {
    /// Fixed gas price in wei; when unset the node is asked
    #[serde(default)]
    pub fixed_gas_price: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NonceConfig {
    /// First nonce handed out, written on first run; ignored once a counter exists
    #[serde(default)]
    pub initial_value: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    /// Age after which a PENDING log counts as long pending
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_dispatch_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    #[serde(default = "default_contract_call_gas_limit")]
    pub contract_call_gas_limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Serve Prometheus metrics at /metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

// Default value functions
fn default_listen_addr() -> String { "0.0.0.0:3000".to_string() }
fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_storage_path() -> String { "launcher-db".to_string() }
fn default_network_name() -> String { "mainnet".to_string() }
fn default_chain_id() -> u64 { 1 }
fn default_rpc_timeout_ms() -> u64 { 5_000 }
fn default_monitor_interval() -> u64 { 10 }
fn default_stale_after() -> u64 { 600 }
fn default_dispatch_interval() -> u64 { 5 }
fn default_gas_limit() -> u64 { 21_000 }
fn default_contract_call_gas_limit() -> u64 { 200_000 }
fn default_true() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_storage_path() }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: default_network_name(),
            chain_id: default_chain_id(),
            rpc_url: None,
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            stale_after_secs: default_stale_after(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_dispatch_interval(),
            gas_limit: default_gas_limit(),
            contract_call_gas_limit: default_contract_call_gas_limit(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { enable_metrics: default_true() }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env();
        Ok(config)
    }

    /// Overlay secrets taken from the environment
    pub fn apply_env(&mut self) {
        if let Ok(keys) = std::env::var(PRIVATE_KEYS_ENV) {
            if !keys.trim().is_empty() {
                self.keys.private_keys = Some(keys);
            }
        }
    }

    /// Reject settings the service cannot start with
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr()?;
        if self.server.request_timeout_ms == 0 {
            bail!("server.request_timeout_ms must be positive");
        }
        if self.storage.path.trim().is_empty() {
            bail!("storage.path must not be empty");
        }
        if self.network.name.trim().is_empty() {
            bail!("network.name must not be empty");
        }
        if self.monitor.interval_secs == 0 {
            bail!("monitor.interval_secs must be positive");
        }
        if let Some(price) = &self.gas.fixed_gas_price {
            crate::types::parse_amount("gas.fixed_gas_price", price)
                .map_err(|e| anyhow::anyhow!(e))?;
        } else if self.network.rpc_url.is_none() {
            bail!("either gas.fixed_gas_price or network.rpc_url must be set");
        }
        if self.dispatch.enabled {
            if self.network.rpc_url.is_none() {
                bail!("dispatch.enabled requires network.rpc_url");
            }
            if self.dispatch.interval_secs == 0 {
                bail!("dispatch.interval_secs must be positive");
            }
            if self.dispatch.gas_limit == 0 || self.dispatch.contract_call_gas_limit == 0 {
                bail!("dispatch gas limits must be positive");
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .listen_addr
            .parse()
            .with_context(|| format!("invalid server.listen_addr {}", self.server.listen_addr))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.monitor.stale_after_secs)
    }
}
