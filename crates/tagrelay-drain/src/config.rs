// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Drain configuration.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! max_rows_per_insert = 10000
//!
//! [warehouse]
//! project = "my-project"
//! dataset = "raw_packets"
//! table = "measurements"
//! ```

use crate::ingest::DEFAULT_MAX_ROWS_PER_INSERT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
pub use tagrelay::config::ConfigError;

/// Drain service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    /// HTTP listen address for the push endpoint.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Upper bound on rows per warehouse insert call.
    #[serde(default = "default_max_rows")]
    pub max_rows_per_insert: usize,

    #[serde(default)]
    pub warehouse: WarehouseConfig,
}

/// BigQuery table settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// API base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub project: String,

    #[serde(default)]
    pub dataset: String,

    #[serde(default)]
    pub table: String,

    /// Environment variable holding the OAuth bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Seconds allowed for one insert request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS_PER_INSERT
}

fn default_endpoint() -> String {
    "https://bigquery.googleapis.com".to_string()
}

fn default_token_env() -> String {
    "BIGQUERY_TOKEN".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_rows_per_insert: default_max_rows(),
            warehouse: WarehouseConfig::default(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            project: String::new(),
            dataset: String::new(),
            table: String::new(),
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl DrainConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rows_per_insert == 0 {
            return Err(ConfigError::Invalid(
                "max_rows_per_insert must be > 0".into(),
            ));
        }
        if self.max_rows_per_insert > DEFAULT_MAX_ROWS_PER_INSERT {
            return Err(ConfigError::Invalid(format!(
                "max_rows_per_insert must be <= {} (warehouse per-call limit)",
                DEFAULT_MAX_ROWS_PER_INSERT
            )));
        }
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid("listen address is empty".into()));
        }
        Ok(())
    }
}

impl WarehouseConfig {
    /// Check that a destination table is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.is_empty() || self.dataset.is_empty() || self.table.is_empty() {
            return Err(ConfigError::Invalid(
                "warehouse.project, warehouse.dataset and warehouse.table are required".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "warehouse.request_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_config_defaults() {
        let config = DrainConfig::from_toml("").unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.max_rows_per_insert, 10_000);
        assert_eq!(config.warehouse.token_env, "BIGQUERY_TOKEN");
        assert!(config.warehouse.validate().is_err());
    }

    #[test]
    fn test_drain_config_parse() {
        let toml = r#"
listen = "127.0.0.1:9000"
max_rows_per_insert = 500

[warehouse]
project = "proj"
dataset = "raw"
table = "measurements"
"#;
        let config = DrainConfig::from_toml(toml).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.max_rows_per_insert, 500);
        assert!(config.warehouse.validate().is_ok());
        assert_eq!(config.warehouse.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_drain_config_rejects_chunk_out_of_range() {
        assert!(matches!(
            DrainConfig::from_toml("max_rows_per_insert = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DrainConfig::from_toml("max_rows_per_insert = 10001"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(DrainConfig::from_toml("max_rows_per_insert = 10000").is_ok());
    }

    #[test]
    fn test_drain_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drain.toml");
        std::fs::write(&path, "listen = \"127.0.0.1:1\"\n").unwrap();
        assert_eq!(DrainConfig::from_file(&path).unwrap().listen, "127.0.0.1:1");
    }
}
