use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::Address;
use serde::Deserialize;

/// Upper bound on indexer retries after a burn. Polling is a best-effort
/// catch-up, not a wait loop.
pub const MAX_POLL_RETRIES: u32 = 10;

/// Top-level client configuration loaded from TOML.
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub indexer: IndexerConfig,
    /// Absent means read-only: nothing can be signed or sent.
    pub wallet: Option<WalletConfig>,
    #[serde(default)]
    pub polling: PollPolicy,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Factory that deploys and looks up confidential wrappers.
    pub factory_address: Address,
}

#[derive(Debug, Deserialize)]
pub struct IndexerConfig {
    /// GraphQL endpoint of the unwrap event indexer.
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct WalletConfig {
    pub private_key: String,
}

/// Bounded retry policy for picking up a freshly burned unwrap request.
///
/// The first query runs after `initial_delay`; up to `max_retries` more
/// follow, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PollPolicy {
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub max_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            interval: Duration::from_secs(3),
            max_retries: 2,
        }
    }
}

impl PollPolicy {
    /// A policy that never sleeps, for tests and in-process demos.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            interval: Duration::ZERO,
            max_retries,
        }
    }

    /// Total number of indexer queries this policy allows.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding the custom token list.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./custom_tokens.json"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TokensConfig {
    /// Curated ERC20s always shown, ahead of custom tokens.
    #[serde(default)]
    pub mainstream: Vec<Address>,
}

/// Errors from config loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl ClientConfig {
    /// Load and validate a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.rpc_url.trim().is_empty() {
            return Err(ConfigError::Validation("network.rpc_url must not be empty".into()));
        }
        if self.indexer.url.trim().is_empty() {
            return Err(ConfigError::Validation("indexer.url must not be empty".into()));
        }

        if self.polling.max_retries > MAX_POLL_RETRIES {
            return Err(ConfigError::Validation(format!(
                "polling.max_retries must be at most {MAX_POLL_RETRIES}"
            )));
        }

        let mut seen = HashSet::new();
        for token in &self.tokens.mainstream {
            if !seen.insert(token) {
                return Err(ConfigError::Validation(format!(
                    "tokens.mainstream lists {token} more than once"
                )));
            }
        }

        Ok(())
    }
}
