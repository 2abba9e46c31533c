//! Configuration management.

use crate::error::{Result, StackError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persistent operator defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub ident_endpoint: String,
    pub nchain_endpoint: String,
    pub privacy_endpoint: String,
    pub vault_endpoint: String,
    pub tunnel_broker_url: String,
    pub images: ImageConfig,
    pub readiness_timeout_secs: u64,
    pub api_health_timeout_secs: u64,
}

/// Image references for every service the stack can run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageConfig {
    pub api: String,
    pub ident: String,
    pub nchain: String,
    pub privacy: String,
    pub vault: String,
    pub messaging: String,
    pub database: String,
    pub cache: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            api: "provide/baseline:latest".to_string(),
            ident: "provide/ident:latest".to_string(),
            nchain: "provide/nchain:latest".to_string(),
            privacy: "provide/privacy:latest".to_string(),
            vault: "provide/vault:latest".to_string(),
            messaging: "provide/nats-server:2.5.0-PRVD".to_string(),
            database: "postgres:13".to_string(),
            cache: "redis:6".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            ident_endpoint: "https://ident.provide.services".to_string(),
            nchain_endpoint: "https://nchain.provide.services".to_string(),
            privacy_endpoint: "https://privacy.provide.services".to_string(),
            vault_endpoint: "https://vault.provide.services".to_string(),
            tunnel_broker_url: "wss://tunnel.provide.services/tunnels".to_string(),
            images: ImageConfig::default(),
            readiness_timeout_secs: 60,
            api_health_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_path()
    }

    /// Load configuration from disk, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| StackError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        serde_json::from_str(&content).map_err(|e| StackError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StackError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| StackError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content)
            .map_err(|e| StackError::IoError { path: path.to_path_buf(), source: e })
    }

    /// Platform bearer token from the environment.
    ///
    /// Token caching is owned by the login flow; this only reads what it left.
    pub fn access_token() -> Option<String> {
        std::env::var("BPI_ACCESS_TOKEN").ok().filter(|t| !t.is_empty())
    }

    /// Tunnel broker credential from the environment.
    pub fn tunnel_token() -> Option<String> {
        std::env::var("BPI_TUNNEL_TOKEN").ok().filter(|t| !t.is_empty())
    }
}
