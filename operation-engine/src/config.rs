//! Configuration for the operation engine

use crate::types::NetworkId;
use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Network ID mixed into sign messages
    pub network_id: String,

    /// Object pool configuration
    pub pool: PoolConfig,

    /// Fact validation limits
    pub limits: LimitsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "operation-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            network_id: "local-network".to_string(),
            pool: PoolConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Object pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Idle orchestrators kept for reuse
    pub orchestrator_capacity: usize,

    /// Idle per-type processors kept for reuse (per type)
    pub processor_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            orchestrator_capacity: 16,
            processor_capacity: 1024, // roughly one block's worth
        }
    }
}

/// Fact validation limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum items per fact
    pub max_items: usize,

    /// Maximum keys per account
    pub max_keys: usize,

    /// Maximum amounts per item
    pub max_amounts_per_item: usize,

    /// Maximum authentication methods per DID document
    pub max_did_methods: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_items: 10,
            max_keys: 10,
            max_amounts_per_item: 10,
            max_did_methods: 8,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(network_id) = std::env::var("OPENGINE_NETWORK_ID") {
            config.network_id = network_id;
        }

        if let Ok(capacity) = std::env::var("OPENGINE_PROCESSOR_POOL_CAPACITY") {
            config.pool.processor_capacity = capacity.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid OPENGINE_PROCESSOR_POOL_CAPACITY: {}", e))
            })?;
        }

        if let Ok(level) = std::env::var("OPENGINE_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(json) = std::env::var("OPENGINE_LOG_JSON") {
            config.logging.json = matches!(json.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Network ID as bytes
    pub fn network_id(&self) -> NetworkId {
        NetworkId::new(self.network_id.as_bytes().to_vec())
    }

    fn validate(&self) -> crate::Result<()> {
        if self.network_id.is_empty() {
            return Err(crate::Error::Config("network_id must not be empty".to_string()));
        }
        if self.limits.max_items == 0 || self.limits.max_keys == 0 {
            return Err(crate::Error::Config(
                "limits.max_items and limits.max_keys must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "operation-engine");
        assert_eq!(config.limits.max_items, 10);
        assert_eq!(config.network_id().as_bytes(), b"local-network");
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.network_id = "testnet".to_string();
        config.pool.processor_capacity = 8;
        write!(file, "{}", toml::to_string(&config).unwrap()).unwrap();

        let loaded = Config::from_file(file.path()).unwrap();
        assert_eq!(loaded.network_id, "testnet");
        assert_eq!(loaded.pool.processor_capacity, 8);
    }

    #[test]
    fn test_config_rejects_empty_network_id() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.network_id = String::new();
        write!(file, "{}", toml::to_string(&config).unwrap()).unwrap();

        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
