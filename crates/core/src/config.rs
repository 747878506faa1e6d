//! Configuration management for the custody chain.
//!
//! Every field has a default so an empty TOML document is a valid config.

use crate::error::{CustodyError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodyConfig {
    pub expiry: ExpiryConfig,
    pub notification: NotificationConfig,
    pub service: ServiceConfig,
    pub directory: DirectoryConfig,
}

/// Time-in-state limits for unconfirmed handoffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Seconds a handoff may sit in `pending`/`confirmed_by_sender` before it expires
    pub ttl_secs: u64,
    /// Seconds between background expiry sweeps
    pub sweep_interval_secs: u64,
}

impl ExpiryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Channel used when a command does not name one (`sms`, `whatsapp`, `telegram`)
    pub default_channel: String,
    /// Base URL receivers open to confirm a handoff
    pub public_base_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_channel: "sms".to_string(),
            public_base_url: "http://localhost:8095".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: String,
    /// SQLite file; `None` keeps handoffs in memory
    pub database_path: Option<String>,
    pub json_logs: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8095".to_string(),
            database_path: None,
            json_logs: false,
        }
    }
}

/// Static directory seed for deployments without a directory service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub containers: Vec<ContainerEntry>,
    pub drivers: Vec<DriverEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEntry {
    pub container_ref: String,
    pub company: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverEntry {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl CustodyConfig {
    #[cfg(feature = "config-file")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CustodyError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    #[cfg(feature = "config-file")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CustodyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.expiry.ttl_secs == 0 {
            return Err(CustodyError::Config(
                "expiry.ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.notification.default_channel.trim().is_empty() {
            return Err(CustodyError::Config(
                "notification.default_channel must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
