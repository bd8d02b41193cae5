use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use vb_chain_client::ChainClientConfig;
use vb_worker::WorkerConfig;

/// Node configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result function applied to each task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ComputerKind {
    /// keccak-256 of the fixed seed `"1"`, the same for every task.
    #[default]
    FixedDigest,
    /// SHA-256 of the fixed seed `"1"`.
    FixedSha256,
    /// keccak-256 over the ABI-encoded task id and input data.
    InputDigest,
}

/// Node configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// EVM node connection.
    pub chain: ChainClientConfig,
    /// Listener, processor and submitter settings.
    pub worker: WorkerConfig,
    /// Result function.
    pub computer: ComputerKind,
    /// Prometheus metrics port (0 disables the endpoint).
    pub metrics_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain: ChainClientConfig::default(),
            worker: WorkerConfig::default(),
            computer: ComputerKind::default(),
            metrics_port: 9100,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.rpc_url.is_empty() {
            return Err(ConfigError::Invalid("chain.rpc_url cannot be empty".to_string()));
        }

        if !self.chain.rpc_url.starts_with("http://") && !self.chain.rpc_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(
                "chain.rpc_url must start with http:// or https://".to_string(),
            ));
        }

        if self.chain.contract_address.is_empty() {
            return Err(ConfigError::Invalid(
                "chain.contract_address cannot be empty".to_string(),
            ));
        }

        self.worker
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
