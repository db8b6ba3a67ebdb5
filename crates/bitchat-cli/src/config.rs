//! BitChat CLI Configuration Management
//!
//! Layered configuration with figment, lowest priority first:
//! - built-in defaults
//! - `bitchat.toml` in the working directory
//! - the file given with `--config`
//! - `BITCHAT_` environment variables, nested with `__`
//!   (`BITCHAT_MESH__SCAN_DURATION_SECS=5`)
//!
//! Command-line flags are applied on top by the caller.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bitchat_core::{BitchatConfig, MeshConfig, StoreConfig};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the BitChat CLI application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Discovery and radio link settings
    pub mesh: MeshConfig,
    /// Conversation store settings
    pub store: StoreConfig,
    /// CLI-specific settings
    pub cli: CliConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Display name used in the device name shown by `whoami`
    pub nickname: String,
    /// Print peers as they are discovered instead of only at the end
    pub live_scan_output: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            nickname: "anonymous".to_string(),
            live_scan_output: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration with the standard priority order
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file("bitchat.toml"));

        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        }

        Self::from_figment(figment.merge(Env::prefixed("BITCHAT_").split("__")))
    }

    /// Extract and validate a configuration from an assembled figment
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.core()
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        if self.cli.nickname.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Nickname must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Core service configuration
    pub fn core(&self) -> BitchatConfig {
        BitchatConfig {
            mesh: self.mesh.clone(),
            store: self.store.clone(),
        }
    }

    /// Render as TOML, suitable as a starting `bitchat.toml`
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialization(e.to_string()))
    }
}

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(#[from] Box<figment::Error>),

    #[error("Configuration file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
