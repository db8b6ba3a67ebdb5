//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Data directory for the conversation store
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Use an in-process simulated radio with two demo peers
    #[arg(long)]
    pub simulated: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Scan for nearby BitChat devices
    Scan,
    /// Connect to a peer, open a chat and listen until Ctrl-C
    Connect {
        /// Peer id as printed by `scan`
        peer: String,
    },
    /// Connect to a peer, send one message and exit
    Send {
        /// Peer id as printed by `scan`
        peer: String,
        /// Message text
        message: String,
    },
    /// List stored chats
    Chats,
    /// Show the messages of one chat
    Messages {
        /// Chat id as printed by `chats`
        chat_id: String,
    },
    /// Show storage statistics
    Stats,
    /// Print the local anonymous user id
    Whoami,
    /// Delete all chats, messages and contacts (identity is kept)
    Clear {
        /// Skip the confirmation requirement
        #[arg(long)]
        yes: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

impl Commands {
    /// Whether the command needs the radio at all
    pub fn uses_radio(&self) -> bool {
        matches!(
            self,
            Commands::Scan | Commands::Connect { .. } | Commands::Send { .. }
        )
    }
}
