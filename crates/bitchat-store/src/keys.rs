//! Storage key layout
//!
//! ```text
//! <ns>:message:<hex(chat_id)>:<seq:020>   message record
//! <ns>:message_ref:<hex(message_id)>      primary key of a message record
//! <ns>:chat:<hex(chat_id)>                chat record
//! <ns>:contact:<hex(device_id)>           contact record
//! <ns>:meta:message_seq / chat_seq        last issued sequence numbers
//! <ns>:user_id, public_key, private_key   identity strings
//! ```
//!
//! Ids are hex-encoded so a `:` inside an id can never bleed into a prefix.

use serde::{Deserialize, Serialize};

use bitchat_core::{Chat, ChatMessage};

#[derive(Debug, Clone)]
pub(crate) struct Keys {
    ns: String,
}

impl Keys {
    pub(crate) fn new(namespace: impl Into<String>) -> Self {
        Self { ns: namespace.into() }
    }

    pub(crate) fn messages(&self) -> String {
        format!("{}:message:", self.ns)
    }

    pub(crate) fn chat_messages(&self, chat_id: &str) -> String {
        format!("{}:message:{}:", self.ns, hex::encode(chat_id))
    }

    pub(crate) fn message(&self, chat_id: &str, seq: u64) -> String {
        format!("{}{:020}", self.chat_messages(chat_id), seq)
    }

    pub(crate) fn message_refs(&self) -> String {
        format!("{}:message_ref:", self.ns)
    }

    pub(crate) fn message_ref(&self, message_id: &str) -> String {
        format!("{}{}", self.message_refs(), hex::encode(message_id))
    }

    pub(crate) fn message_seq(&self) -> String {
        format!("{}:meta:message_seq", self.ns)
    }

    pub(crate) fn chats(&self) -> String {
        format!("{}:chat:", self.ns)
    }

    pub(crate) fn chat(&self, chat_id: &str) -> String {
        format!("{}{}", self.chats(), hex::encode(chat_id))
    }

    pub(crate) fn chat_seq(&self) -> String {
        format!("{}:meta:chat_seq", self.ns)
    }

    pub(crate) fn contacts(&self) -> String {
        format!("{}:contact:", self.ns)
    }

    pub(crate) fn contact(&self, device_id: &str) -> String {
        format!("{}{}", self.contacts(), hex::encode(device_id))
    }

    pub(crate) fn user_id(&self) -> String {
        format!("{}:user_id", self.ns)
    }

    pub(crate) fn public_key(&self) -> String {
        format!("{}:public_key", self.ns)
    }

    pub(crate) fn private_key(&self) -> String {
        format!("{}:private_key", self.ns)
    }
}

// ----------------------------------------------------------------------------
// Record Envelopes
// ----------------------------------------------------------------------------

/// Stored form of a message; `seq` fixes its insertion position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MessageRecord {
    pub(crate) seq: u64,
    pub(crate) message: ChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatRecord {
    pub(crate) seq: u64,
    pub(crate) chat: Chat,
}
