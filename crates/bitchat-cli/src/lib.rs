//! BitChat CLI library
//!
//! Command-line shell over the BitChat connection manager and conversation
//! store: argument parsing, layered configuration and the command flows.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::App;
pub use cli::{Cli, Commands};
pub use config::{AppConfig, CliConfig, ConfigError};
pub use error::{CliError, Result};

// Re-export commonly used types
pub use bitchat_core::{Chat, ChatMessage, PeerId, Route};
