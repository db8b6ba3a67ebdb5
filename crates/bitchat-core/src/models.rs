//! Chat data model
//!
//! Records persisted by the conversation store. Field names serialize in
//! camelCase so stored records stay readable by other clients of the same
//! local store.

use serde::{Deserialize, Serialize};

use crate::types::{generate_id, PeerId, Timestamp};

/// Preview text recorded on a chat created right after connecting
pub const CONNECTED_PREVIEW: &str = "Connected via Bluetooth";

// ----------------------------------------------------------------------------
// Chat
// ----------------------------------------------------------------------------

/// A conversation thread with one peer device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub name: String,
    /// Preview of the most recent message
    pub last_message: String,
    /// Last activity
    pub timestamp: Timestamp,
    pub unread: u32,
    pub device_id: PeerId,
    /// Mirrors whether a connection to `device_id` currently exists
    #[serde(default)]
    pub is_connected: bool,
}

impl Chat {
    /// Create the chat opened right after connecting to a peer
    pub fn for_peer(device_id: PeerId, name: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: format!("chat_{}_{}", device_id, now.as_millis()),
            name: name.into(),
            last_message: CONNECTED_PREVIEW.to_string(),
            timestamp: now,
            unread: 0,
            device_id,
            is_connected: true,
        }
    }

    /// Fold a new message into the preview, activity time and unread counter
    pub fn apply_message(&mut self, message: &ChatMessage) {
        self.last_message = message.text.clone();
        self.timestamp = message.timestamp;
        if !message.is_own {
            self.unread = self.unread.saturating_add(1);
        }
    }
}

// ----------------------------------------------------------------------------
// Chat Message
// ----------------------------------------------------------------------------

/// One entry in a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Time-derived unique id
    pub id: String,
    pub chat_id: String,
    pub text: String,
    pub timestamp: Timestamp,
    /// Sent by the local user
    pub is_own: bool,
    /// Advisory only; payloads are not encrypted
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<PeerId>,
}

impl ChatMessage {
    fn build(chat_id: &str, text: impl Into<String>, is_own: bool, device_id: Option<PeerId>) -> Self {
        Self {
            id: generate_id("msg"),
            chat_id: chat_id.to_string(),
            text: text.into(),
            timestamp: Timestamp::now(),
            is_own,
            encrypted: false,
            device_id,
        }
    }

    /// Message composed by the local user
    pub fn outgoing(chat_id: &str, text: impl Into<String>) -> Self {
        Self::build(chat_id, text, true, None)
    }

    /// Message received from a connected peer
    pub fn incoming(chat_id: &str, text: impl Into<String>, device_id: PeerId) -> Self {
        Self::build(chat_id, text, false, Some(device_id))
    }
}

// ----------------------------------------------------------------------------
// Contact
// ----------------------------------------------------------------------------

/// A remembered peer, keyed by device id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub device_id: PeerId,
    pub name: String,
    /// Placeholder; no key exchange exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub added_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Storage Statistics
// ----------------------------------------------------------------------------

/// Record counts reported by the conversation store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub messages: usize,
    pub chats: usize,
    pub contacts: usize,
}
