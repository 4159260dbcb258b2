//! Node configuration loading and management.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bitcoin::Network;
use hashloan_core::config::amount_string;
use hashloan_core::{Account, Amount, ProtocolParams};
use serde::{Deserialize, Serialize};

/// Full configuration for the devnet node.
///
/// `protocol` is last: TOML needs plain values before nested tables.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HashloanConfig {
    /// Bitcoin side settings.
    #[serde(default)]
    pub bitcoin: BitcoinConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Block production and funded accounts.
    #[serde(default)]
    pub devnet: DevnetConfig,

    /// Protocol parameters for the loan book.
    #[serde(default)]
    pub protocol: ProtocolParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinConfig {
    /// Network for derived addresses (bitcoin, testnet, signet, regtest).
    #[serde(default = "default_network")]
    pub network: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevnetConfig {
    /// Milliseconds between settlement-chain blocks.
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
    /// Accounts credited on the settlement chain at startup.
    #[serde(default)]
    pub accounts: Vec<DevAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevAccount {
    pub name: Account,
    #[serde(with = "amount_string")]
    pub balance: Amount,
}

// Default value functions
fn default_network() -> String {
    "regtest".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_block_interval_ms() -> u64 {
    1_000
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            block_interval_ms: default_block_interval_ms(),
            accounts: Vec::new(),
        }
    }
}

impl HashloanConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: HashloanConfig = toml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn network(&self) -> anyhow::Result<Network> {
        self.bitcoin
            .network
            .parse::<Network>()
            .with_context(|| format!("unknown bitcoin network '{}'", self.bitcoin.network))
    }

    /// Check everything a running node depends on.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.network()?;
        self.protocol.validate()?;
        if self.devnet.block_interval_ms == 0 {
            anyhow::bail!("devnet.block_interval_ms must be positive");
        }
        Ok(())
    }
}
