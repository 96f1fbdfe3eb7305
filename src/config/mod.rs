//! Configuration management for payhost
//!
//! Handles configuration loading (TOML or JSON), defaults and validation for
//! the server, wallet, payment, paymail and storage sections.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Networks a payment request may be issued for.
pub const KNOWN_NETWORKS: [&str; 4] = ["mainnet", "testnet", "regtest", "signet"];

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Wallet/key-derivation configuration
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Payment request configuration
    #[serde(default)]
    pub payments: PaymentsConfig,

    /// Paymail settlement configuration
    #[serde(default)]
    pub paymail: PaymailConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the payment API binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Hostname embedded into payment URLs handed to payers.
    /// Must be reachable by the payer, not necessarily the bind address.
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8443".parse().expect("static default address")
}

fn default_hostname() -> String {
    "localhost:8443".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            hostname: default_hostname(),
        }
    }
}

/// Wallet/key-derivation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Name of the master key payment scripts derive from.
    /// Created on startup if it does not exist yet.
    #[serde(default = "default_key_name")]
    pub key_name: String,

    /// Derivation path prefix; each payment request reserves the next
    /// index under this prefix (`{prefix}/{index}`).
    #[serde(default = "default_derivation_prefix")]
    pub derivation_prefix: String,

    /// Network advertised in payment requests (mainnet, testnet, regtest, signet)
    #[serde(default = "default_network")]
    pub network: String,
}

fn default_key_name() -> String {
    "masterkey".to_string()
}

fn default_derivation_prefix() -> String {
    "0".to_string()
}

fn default_network() -> String {
    "mainnet".to_string()
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            key_name: default_key_name(),
            derivation_prefix: default_derivation_prefix(),
            network: default_network(),
        }
    }
}

/// Payment request configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    /// Hours a payment request stays valid after creation
    #[serde(default = "default_request_expiry_hours")]
    pub request_expiry_hours: u64,

    /// Merchant name surfaced in the payment request's merchantData
    #[serde(default = "default_merchant_name")]
    pub merchant_name: String,

    /// Optional avatar URL surfaced in merchantData
    #[serde(default)]
    pub merchant_avatar_url: Option<String>,
}

fn default_request_expiry_hours() -> u64 {
    24
}

fn default_merchant_name() -> String {
    "payhost".to_string()
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            request_expiry_hours: default_request_expiry_hours(),
            merchant_name: default_merchant_name(),
            merchant_avatar_url: None,
        }
    }
}

impl PaymentsConfig {
    /// Payment request validity window in seconds.
    pub fn request_expiry_secs(&self) -> i64 {
        (self.request_expiry_hours * 3600) as i64
    }
}

/// Paymail settlement configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymailConfig {
    /// Route settlements through a paymail counterpart instead of the
    /// wallet validator (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Paymail handle settlements are forwarded to (required when enabled)
    #[serde(default)]
    pub counterpart: Option<String>,

    /// Seconds a stored paymail reference stays usable.
    /// Defaults to the payment request expiry window.
    #[serde(default)]
    pub reference_ttl_secs: Option<u64>,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Embedded sled database (default, requires the `sled` feature)
    Sled,
    /// In-memory store, state lost on shutdown; intended for tests
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// Data directory for persistent backends
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sled
}

fn default_data_dir() -> String {
    "data/payhost".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            data_dir: default_data_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "payhost=debug"). Falls back to the
    /// RUST_LOG environment variable, then to "info".
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON-formatted log lines (for log aggregation systems)
    #[serde(default)]
    pub json_format: bool,
}

impl Config {
    /// Load configuration from a file, selecting the parser by extension
    /// (`.toml` parses as TOML, anything else as JSON).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?;
            Ok(config)
        } else {
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse JSON config: {}", e))?;
            Ok(config)
        }
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_toml_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize TOML config: {}", e))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.hostname.is_empty() {
            return Err(anyhow::anyhow!(
                "server.hostname must be set; it is embedded into payment URLs"
            ));
        }
        if self.wallet.key_name.is_empty() {
            return Err(anyhow::anyhow!("wallet.key_name must not be empty"));
        }
        if !KNOWN_NETWORKS.contains(&self.wallet.network.as_str()) {
            return Err(anyhow::anyhow!(
                "wallet.network '{}' is not one of {:?}",
                self.wallet.network,
                KNOWN_NETWORKS
            ));
        }
        if self.payments.request_expiry_hours == 0 {
            return Err(anyhow::anyhow!(
                "payments.request_expiry_hours must be greater than 0"
            ));
        }
        // One year keeps the seconds conversion comfortably inside i64.
        if self.payments.request_expiry_hours > 8760 {
            return Err(anyhow::anyhow!(
                "payments.request_expiry_hours must be at most 8760 (one year)"
            ));
        }
        if self.paymail.enabled && self.paymail.counterpart.is_none() {
            return Err(anyhow::anyhow!(
                "paymail.counterpart must be set when paymail.enabled = true"
            ));
        }
        #[cfg(not(feature = "sled"))]
        if self.storage.backend == StorageBackend::Sled {
            return Err(anyhow::anyhow!(
                "storage.backend = \"sled\" requires the 'sled' feature"
            ));
        }
        Ok(())
    }

    /// Return warnings for configurations that work but deserve an operator's
    /// attention. Logged at startup, never fatal.
    pub fn validate_security(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.server.listen_addr.ip().is_loopback() {
            warnings.push(format!(
                "SECURITY WARNING: payment API is binding to {} (non-localhost); \
                 put a TLS-terminating, authenticating proxy in front of it",
                self.server.listen_addr
            ));
        }
        if self.storage.backend == StorageBackend::Memory {
            warnings.push(
                "storage.backend = \"memory\" loses the script-key ledger on shutdown; \
                 unsettled invoices will become unpayable"
                    .to_string(),
            );
        }
        warnings
    }

    /// Seconds a paymail reference stays usable before it is purged.
    pub fn paymail_reference_ttl_secs(&self) -> u64 {
        self.paymail
            .reference_ttl_secs
            .unwrap_or(self.payments.request_expiry_hours * 3600)
    }
}
