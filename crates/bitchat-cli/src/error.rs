//! Error handling for the BitChat CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("BitChat error: {0}")]
    Bitchat(#[from] bitchat_core::BitchatError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] bitchat_store::StorageError),

    #[error("Bluetooth is not available; enable it and try again")]
    RadioNotReady,

    #[error("No peer {0} nearby; run `bitchat scan` to list peers")]
    PeerNotNearby(String),

    #[error("No chat with id {0}")]
    UnknownChat(String),

    #[error("{0}")]
    Refused(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
