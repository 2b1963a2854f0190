//! Migration file model: network profiles, compiler settings, parameters and steps.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{params::ParameterConfig, step::Step};

/// The default name of the migration file.
pub const MIGRATIONS_FILENAME: &str = "Migrations.toml";

/// Default gas limit per transaction when a profile sets none.
pub const DEFAULT_GAS_LIMIT: u64 = 6_721_975;

/// Default gas price (100 gwei) when a profile sets none.
pub const DEFAULT_GAS_PRICE: u128 = 100_000_000_000;

/// Default expected block time in seconds.
pub const DEFAULT_BLOCK_TIME_SECS: u64 = 15;

/// Lower bound for the derived confirmation timeout.
const MIN_CONFIRMATION_TIMEOUT_SECS: u64 = 60;

/// Number of block times to wait per confirmation before giving up.
const BLOCKS_PER_CONFIRMATION_BUDGET: u64 = 4;

/// Network identifier selector of a profile.
///
/// `"*"` matches whatever the node reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "NetworkIdRepr", into = "NetworkIdRepr")]
pub enum NetworkId {
    Any,
    Id(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum NetworkIdRepr {
    Id(u64),
    Text(String),
}

impl TryFrom<NetworkIdRepr> for NetworkId {
    type Error = String;

    fn try_from(repr: NetworkIdRepr) -> Result<Self, Self::Error> {
        match repr {
            NetworkIdRepr::Id(id) => Ok(Self::Id(id)),
            NetworkIdRepr::Text(text) if text == "*" => Ok(Self::Any),
            NetworkIdRepr::Text(text) => text
                .parse()
                .map(Self::Id)
                .map_err(|_| format!("invalid network id `{text}`, expected a number or \"*\"")),
        }
    }
}

impl From<NetworkId> for NetworkIdRepr {
    fn from(id: NetworkId) -> Self {
        match id {
            NetworkId::Any => Self::Text("*".to_string()),
            NetworkId::Id(id) => Self::Id(id),
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

fn default_confirmations() -> u64 {
    1
}

fn default_block_time() -> u64 {
    DEFAULT_BLOCK_TIME_SECS
}

/// Connection and gas settings for one target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub host: String,
    pub port: u16,
    pub network_id: NetworkId,
    /// Gas limit per transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    /// Gas price in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,
    /// Sending account. The first account unlocked on the node otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Expected block time in seconds.
    #[serde(default = "default_block_time")]
    pub block_time: u64,
    /// Confirmation timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl NetworkProfile {
    /// A profile pointing at a local development node.
    pub fn local(port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            network_id: NetworkId::Any,
            gas: None,
            gas_price: None,
            from: None,
            confirmations: default_confirmations(),
            block_time: default_block_time(),
            timeout: None,
        }
    }

    pub fn rpc_url(&self) -> Result<Url> {
        Url::parse(&format!("http://{}:{}", self.host, self.port))
            .with_context(|| format!("Invalid RPC endpoint {}:{}", self.host, self.port))
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas.unwrap_or(DEFAULT_GAS_LIMIT)
    }

    pub fn gas_price(&self) -> u128 {
        self.gas_price.unwrap_or(DEFAULT_GAS_PRICE)
    }

    /// How long a submitted transaction may stay unconfirmed.
    ///
    /// Defaults to a few block times per required confirmation.
    pub fn confirmation_timeout(&self) -> Duration {
        let secs = self.timeout.unwrap_or_else(|| {
            self.block_time
                .saturating_mul(self.confirmations.max(1))
                .saturating_mul(BLOCKS_PER_CONFIRMATION_BUDGET)
                .max(MIN_CONFIRMATION_TIMEOUT_SECS)
        });
        Duration::from_secs(secs)
    }
}

/// Solidity optimizer settings the artifacts were compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub enabled: bool,
    pub runs: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            runs: 200,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolcConfig {
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build/contracts")
}

/// The complete migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Directory holding compiled artifacts, relative to the migration file.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkProfile>,
    #[serde(default)]
    pub solc: SolcConfig,
    #[serde(default)]
    pub parameters: ParameterConfig,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl MigrationConfig {
    /// Load the migration file. A directory is resolved to its `Migrations.toml`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Migration file or directory not found: {}", path.display());
        }

        let config_path = if path.is_dir() {
            path.join(MIGRATIONS_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read migrations from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse migration file as TOML")?;

        tracing::info!(
            path = %config_path.display(),
            networks = config.networks.len(),
            steps = config.steps.len(),
            "Migration file loaded"
        );
        Ok(config)
    }

    /// Look up a network profile and apply `CHAINMIG_*` environment overrides.
    ///
    /// `CHAINMIG_HOST=10.0.0.2` overrides the host of whichever profile is selected.
    pub fn network(&self, name: &str) -> Result<NetworkProfile> {
        self.network_with_env(name, Env::prefixed("CHAINMIG_").only(PROFILE_ENV_KEYS))
    }

    fn network_with_env(&self, name: &str, env: Env) -> Result<NetworkProfile> {
        let profile = self.networks.get(name).with_context(|| {
            format!(
                "Unknown network `{}`, known networks: {}",
                name,
                self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })?;

        Figment::from(Serialized::defaults(profile))
            .merge(env)
            .extract()
            .with_context(|| format!("Invalid network profile `{name}`"))
    }
}

/// Profile keys that may be overridden from the environment.
const PROFILE_ENV_KEYS: &[&str] = &[
    "host",
    "port",
    "network_id",
    "gas",
    "gas_price",
    "from",
    "confirmations",
    "block_time",
    "timeout",
];
