//! Layered configuration: defaults, then `proxyup.toml`, then `PROXYUP_*` environment.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::NetworkId;

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "proxyup.toml";

/// Prefix of environment variables overriding the configuration.
pub const ENV_PREFIX: &str = "PROXYUP_";

/// Default local development RPC (anvil / hardhat node).
const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// First anvil development account.
const DEFAULT_SENDER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

/// Connection and confirmation policy for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name; also the registry file name.
    pub name: NetworkId,
    /// JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Account unlocked on the node that sends every transaction.
    pub from: Address,
    /// Blocks required on top of the inclusion block (1 = included).
    pub confirmations: u64,
    /// Interval between receipt polls.
    pub poll_interval_ms: u64,
    /// How long to wait for a receipt before declaring the transaction dropped.
    pub receipt_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: NetworkId::from("local"),
            rpc_url: Url::parse(DEFAULT_RPC_URL).expect("default RPC URL is valid"),
            from: DEFAULT_SENDER.parse().expect("default sender is a valid address"),
            confirmations: 1,
            poll_interval_ms: 500,
            receipt_timeout_secs: 120,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    /// Directory holding one registry file per network.
    pub registry_dir: PathBuf,
    /// Foundry `out/` directory with compiled artifacts.
    pub artifacts_dir: PathBuf,
    /// Owner of transparent proxies and beacons. Defaults to the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_owner: Option<Address>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            registry_dir: PathBuf::from("deployments"),
            artifacts_dir: PathBuf::from("out"),
            proxy_owner: None,
        }
    }
}

impl Config {
    /// Load the configuration from `path` (or the default locations) and the environment.
    ///
    /// Environment variables use `__` to reach nested keys, e.g.
    /// `PROXYUP_NETWORK__RPC_URL`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(path) = Self::default_path() {
                    tracing::debug!(path = %path.display(), "Using configuration file");
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to load configuration")?;

        tracing::debug!(network = %config.network.name, rpc_url = %config.network.rpc_url, "Configuration loaded");
        Ok(config)
    }

    /// `./proxyup.toml`, falling back to `<config dir>/proxyup/proxyup.toml`.
    pub fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILENAME);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("proxyup").join(CONFIG_FILENAME))
            .filter(|path| path.exists())
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Owner used for transparent proxies and beacons.
    pub fn owner(&self) -> Address {
        self.proxy_owner.unwrap_or(self.network.from)
    }
}
