// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration.
//!
//! One TOML file is shared by the capture and publisher processes:
//!
//! ```toml
//! hub_id = "hub-01"
//! database = "/var/lib/tagrelay/measurements.db"
//!
//! [capture]
//! radio_index = 0
//! bundle_size = 100
//!
//! [publisher]
//! batch_size = 20000
//!
//! [transport]
//! project = "my-project"
//! topic = "tag-measurements"
//! ```
//!
//! Every key is optional; command-line flags override file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway identity attached to every envelope (defaults to the host name).
    #[serde(default)]
    pub hub_id: Option<String>,

    /// SQLite batch store path.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Seconds a writer waits for the store lock.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

/// Capture process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Local radio (hci) the advertisements come from.
    #[serde(default)]
    pub radio_index: u32,

    /// Readings per store write.
    #[serde(default = "default_bundle_size")]
    pub bundle_size: usize,

    /// Maximum seconds a reading waits in the bundle.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Drop advertisements weaker than this (dBm).
    #[serde(default)]
    pub min_rssi: Option<i32>,
}

/// Publisher process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Records per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Milliseconds between ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Seconds to wait for a publish acknowledgement.
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,

    /// Seconds a batch may keep failing before it is dead-lettered (0 = never).
    #[serde(default = "default_max_retry_age")]
    pub max_retry_age_secs: u64,
}

/// Pub/Sub transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// API base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Cloud project id.
    #[serde(default)]
    pub project: String,

    /// Topic name within the project.
    #[serde(default)]
    pub topic: String,

    /// Environment variable holding the OAuth bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_database() -> PathBuf {
    PathBuf::from("measurements.db")
}

fn default_busy_timeout() -> u64 {
    30
}

fn default_bundle_size() -> usize {
    100
}

fn default_flush_interval() -> u64 {
    60
}

fn default_batch_size() -> usize {
    20_000
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_publish_timeout() -> u64 {
    300
}

fn default_max_retry_age() -> u64 {
    7 * 24 * 3600
}

fn default_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}

fn default_token_env() -> String {
    "PUBSUB_TOKEN".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            hub_id: None,
            database: default_database(),
            busy_timeout_secs: default_busy_timeout(),
            capture: CaptureConfig::default(),
            publisher: PublisherConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            radio_index: 0,
            bundle_size: default_bundle_size(),
            flush_interval_secs: default_flush_interval(),
            min_rssi: None,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            tick_interval_ms: default_tick_interval(),
            publish_timeout_secs: default_publish_timeout(),
            max_retry_age_secs: default_max_retry_age(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            project: String::new(),
            topic: String::new(),
            token_env: default_token_env(),
        }
    }
}

impl GatewayConfig {
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
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database path is empty".into()));
        }
        if self.capture.bundle_size == 0 {
            return Err(ConfigError::Invalid("capture.bundle_size must be > 0".into()));
        }
        if self.publisher.batch_size == 0 {
            return Err(ConfigError::Invalid("publisher.batch_size must be > 0".into()));
        }
        if self.publisher.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "publisher.tick_interval_ms must be > 0".into(),
            ));
        }
        if self.publisher.publish_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "publisher.publish_timeout_secs must be > 0".into(),
            ));
        }
        if let Some(hub) = &self.hub_id {
            if hub.trim().is_empty() {
                return Err(ConfigError::Invalid("hub_id is empty".into()));
            }
        }
        Ok(())
    }

    /// Gateway identity: configured value, else the host name, else `"unknown"`.
    pub fn hub_id(&self) -> String {
        self.hub_id.clone().unwrap_or_else(host_name)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

impl CaptureConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl PublisherConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    /// `None` when dead-lettering is disabled.
    pub fn max_retry_age(&self) -> Option<Duration> {
        match self.max_retry_age_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl TransportConfig {
    /// Check that a publish target is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.is_empty() || self.topic.is_empty() {
            return Err(ConfigError::Invalid(
                "transport.project and transport.topic are required".into(),
            ));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "transport.endpoint is not an HTTP URL: {}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
