//! Centralized Configuration Management
//!
//! Configuration for the connection manager and the conversation store, kept
//! in one serde-friendly tree so shells can layer it from files and the
//! environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BitchatError, Result};

// ----------------------------------------------------------------------------
// Mesh Configuration
// ----------------------------------------------------------------------------

/// Configuration for peer discovery and radio connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Wall-clock length of one discovery scan
    pub scan_duration_secs: u64,
    /// Upper bound on connect plus capability enumeration
    pub connection_timeout_secs: u64,
    /// Upper bound on one acknowledged characteristic write
    pub write_timeout_secs: u64,
    /// Advertised-name substring a peer must carry to be surfaced
    pub name_marker: String,
    /// Buffered notifications per subscription before backpressure
    pub notification_buffer: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            scan_duration_secs: 30,
            connection_timeout_secs: 10,
            write_timeout_secs: 5,
            name_marker: "BitChat".to_string(),
            notification_buffer: 64,
        }
    }
}

impl MeshConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set scan duration
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration_secs = duration.as_secs();
        self
    }

    /// Set connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_secs = timeout.as_secs();
        self
    }

    /// Set write timeout
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the advertised-name marker
    pub fn with_name_marker(mut self, marker: impl Into<String>) -> Self {
        self.name_marker = marker.into();
        self
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.scan_duration_secs == 0 {
            return Err(BitchatError::config_error(
                "Scan duration must be greater than 0",
            ));
        }
        if self.connection_timeout_secs == 0 || self.write_timeout_secs == 0 {
            return Err(BitchatError::config_error(
                "Radio timeouts must be greater than 0",
            ));
        }
        if self.name_marker.trim().is_empty() {
            return Err(BitchatError::config_error("Name marker must not be empty"));
        }
        if self.notification_buffer == 0 {
            return Err(BitchatError::config_error(
                "Notification buffer must hold at least one payload",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Store Configuration
// ----------------------------------------------------------------------------

/// Configuration for the local conversation store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the durable key-value files
    ///
    /// Defaults to `~/.bitchat/store` when unset.
    pub data_dir: Option<PathBuf>,
    /// Namespace prepended to every storage key
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            key_prefix: "bitchat".to_string(),
        }
    }
}

impl StoreConfig {
    /// Set the data directory
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Resolve the effective data directory
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".bitchat").join("store"))
            .ok_or_else(|| BitchatError::config_error("No home directory for the default store"))
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() || self.key_prefix.contains(':') {
            return Err(BitchatError::config_error(
                "Key prefix must be non-empty and must not contain ':'",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Combined Configuration
// ----------------------------------------------------------------------------

/// Complete core configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitchatConfig {
    pub mesh: MeshConfig,
    pub store: StoreConfig,
}

impl BitchatConfig {
    pub fn validate(&self) -> Result<()> {
        self.mesh.validate()?;
        self.store.validate()
    }
}
