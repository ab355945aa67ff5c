//! Configuration management for the PledgePool client
//!
//! Loads configuration from TOML files with environment variable substitution.
//! A `.env` file in the working directory is read first, so `${VAR}` references
//! can point at values kept there.

use anyhow::{Context, Result};
use ethers::types::U256;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static::lazy_static! {
    static ref ENV_VAR_PATTERN: regex::Regex =
        regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    pub gas: GasConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    pub contracts: ContractsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    /// Gas limit for contract calls unless overridden per call
    pub limit: u64,
    /// Gas limit for contract deployments
    #[serde(default = "default_deploy_limit")]
    pub deploy_limit: u64,
    pub strategy: GasPriceStrategy,
    /// Price used by the fixed strategy
    #[serde(default)]
    pub price_gwei: Option<u64>,
    /// Percentage added on top of the node's suggestion
    #[serde(default)]
    pub buffer_percent: u64,
    /// Ceiling applied to the node's suggestion
    #[serde(default)]
    pub max_price_gwei: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    /// Always use `price_gwei`
    Fixed,
    /// Ask the node (`eth_gasPrice`), buffer and cap
    Node,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmationConfig {
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            timeout_secs: 120,
        }
    }
}

impl ConfirmationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
    pub pool: ContractConfig,
    pub token: Option<ContractConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    /// May be empty for the pool when only deploying
    #[serde(default)]
    pub address: String,
    pub abi_path: PathBuf,
}

fn default_deploy_limit() -> u64 {
    5_000_000
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("PLEDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        dotenv::dotenv().ok();

        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let mut settings = Self::parse(&config_str)?;

        // ABI paths are relative to the config file
        if let Some(base) = config_path.parent() {
            settings.contracts.pool.abi_path = resolve(base, &settings.contracts.pool.abi_path);
            if let Some(token) = settings.contracts.token.as_mut() {
                token.abi_path = resolve(base, &token.abi_path);
            }
        }

        Ok(settings)
    }

    /// Parse and validate a configuration document
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.network.rpc_url.is_empty() {
            anyhow::bail!("Network {} has no RPC URL configured", self.network.name);
        }
        if self.network.chain_id == 0 {
            anyhow::bail!("Network {} has chain id 0", self.network.name);
        }
        if self.gas.limit == 0 {
            anyhow::bail!("Gas limit must be positive");
        }
        if self.gas.strategy == GasPriceStrategy::Fixed && self.gas.price_gwei.is_none() {
            anyhow::bail!("Fixed gas strategy requires price_gwei");
        }
        if self.wallet.private_key_env.is_empty() {
            anyhow::bail!("wallet.private_key_env must name an environment variable");
        }
        if self.confirmation.poll_interval_ms == 0 {
            anyhow::bail!("confirmation.poll_interval_ms must be positive");
        }
        if self.contracts.pool.address.is_empty() {
            tracing::warn!("No pool address configured - only deployment is available");
        }

        Ok(())
    }

    /// Read the signing key from the configured environment variable
    pub fn private_key(&self) -> Result<String> {
        env::var(&self.wallet.private_key_env).with_context(|| {
            format!(
                "Environment variable {} is not set",
                self.wallet.private_key_env
            )
        })
    }
}

impl GasConfig {
    pub fn limit(&self) -> U256 {
        U256::from(self.limit)
    }

    pub fn deploy_limit(&self) -> U256 {
        U256::from(self.deploy_limit)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
