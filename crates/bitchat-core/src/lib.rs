//! BitChat Mobile Core
//!
//! Foundational types shared by the connection manager (`bitchat-ble`) and the
//! conversation store (`bitchat-store`): peer identifiers, timestamps, the chat
//! data model, the unified error taxonomy and service configuration.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod models;
pub mod navigation;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{BitchatConfig, MeshConfig, StoreConfig};
pub use errors::{BitchatError, BitchatResult, Result, StorageError};
pub use models::{Chat, ChatMessage, Contact, StorageStats};
pub use navigation::{ChatRoute, Route};
pub use types::{generate_id, PeerId, Timestamp};
