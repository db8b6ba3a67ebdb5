//! Conversation store
//!
//! Typed persistence for chats, messages, contacts and the local identity on
//! top of a [`KeyValueStore`]. Every record lives under its own key; listing
//! operations scan a key prefix and restore insertion order from the
//! sequence number stored in each record.
//!
//! Public operations never fail. Storage errors and corrupt records are
//! logged and replaced by an empty result or a no-op, so a damaged store
//! degrades conversation history instead of taking the caller down.
//!
//! Writes are serialised through one async mutex. Reads take no lock.
//!
//! Messages are not checked against existing chats; a chat removal cascades
//! to its messages, nothing else enforces the link.

use std::collections::BTreeMap;

use bitchat_core::{
    generate_id, Chat, ChatMessage, Contact, PeerId, StorageError, StorageStats, StoreConfig,
    Timestamp,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::keys::{ChatRecord, Keys, MessageRecord};
use crate::kv::{KeyValueStore, StoreResult};

// ----------------------------------------------------------------------------
// Conversation Store
// ----------------------------------------------------------------------------

/// Local conversation history and identity
pub struct ConversationStore<S: KeyValueStore> {
    kv: S,
    keys: Keys,
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> ConversationStore<S> {
    /// Create a store using the default `bitchat` key namespace
    pub fn new(kv: S) -> Self {
        Self::with_config(kv, &StoreConfig::default())
    }

    pub fn with_config(kv: S, config: &StoreConfig) -> Self {
        Self {
            kv,
            keys: Keys::new(config.key_prefix.clone()),
            write_lock: Mutex::new(()),
        }
    }

    /// Underlying key-value store
    pub fn backend(&self) -> &S {
        &self.kv
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    /// Append a message, or replace it in place when its id already exists
    pub async fn save_message(&self, message: &ChatMessage) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.put_message(message).await {
            warn!("Failed to save message {}: {}", message.id, e);
        }
    }

    /// Every stored message in insertion order
    pub async fn get_all_messages(&self) -> Vec<ChatMessage> {
        let prefix = self.keys.messages();
        self.load_messages(&prefix).await
    }

    /// Messages of one chat in insertion order
    pub async fn get_messages_for_chat(&self, chat_id: &str) -> Vec<ChatMessage> {
        let prefix = self.keys.chat_messages(chat_id);
        self.load_messages(&prefix).await
    }

    pub async fn delete_message(&self, message_id: &str) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.remove_message(message_id).await {
            warn!("Failed to delete message {}: {}", message_id, e);
        }
    }

    /// Save a message and fold it into its chat's preview and unread count
    ///
    /// Returns the updated chat, or `None` when the chat is not stored.
    pub async fn record_message(&self, message: &ChatMessage) -> Option<Chat> {
        let _guard = self.write_lock.lock().await;
        let result: StoreResult<Option<Chat>> = async {
            self.put_message(message).await?;
            let key = self.keys.chat(&message.chat_id);
            let Some(mut record) = self.read_record::<ChatRecord>(&key).await? else {
                return Ok(None);
            };
            record.chat.apply_message(message);
            self.write_record(&key, &record).await?;
            Ok(Some(record.chat))
        }
        .await;

        result.unwrap_or_else(|e| {
            warn!("Failed to record message {}: {}", message.id, e);
            None
        })
    }

    // ------------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------------

    /// Insert or replace a chat, keeping the position of an existing entry
    pub async fn save_chat(&self, chat: &Chat) {
        let _guard = self.write_lock.lock().await;
        let key = self.keys.chat(&chat.id);
        let result: StoreResult<()> = async {
            let seq = match self.read_record::<ChatRecord>(&key).await? {
                Some(existing) => existing.seq,
                None => self.next_seq(&self.keys.chat_seq()).await?,
            };
            self.write_record(
                &key,
                &ChatRecord {
                    seq,
                    chat: chat.clone(),
                },
            )
            .await
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to save chat {}: {}", chat.id, e);
        }
    }

    /// Every chat in insertion order
    pub async fn get_all_chats(&self) -> Vec<Chat> {
        let mut records: Vec<ChatRecord> = self.scan_or_default(&self.keys.chats()).await;
        records.sort_by_key(|record| record.seq);
        records.into_iter().map(|record| record.chat).collect()
    }

    pub async fn get_chat(&self, chat_id: &str) -> Option<Chat> {
        match self.read_record::<ChatRecord>(&self.keys.chat(chat_id)).await {
            Ok(record) => record.map(|record| record.chat),
            Err(e) => {
                warn!("Failed to load chat {}: {}", chat_id, e);
                None
            }
        }
    }

    /// Most recently created chat with a peer
    pub async fn find_chat_for_device(&self, device_id: &PeerId) -> Option<Chat> {
        self.get_all_chats()
            .await
            .into_iter()
            .rev()
            .find(|chat| &chat.device_id == device_id)
    }

    /// Reset a chat's unread counter
    pub async fn mark_chat_read(&self, chat_id: &str) {
        let _guard = self.write_lock.lock().await;
        let key = self.keys.chat(chat_id);
        let result: StoreResult<()> = async {
            if let Some(mut record) = self.read_record::<ChatRecord>(&key).await? {
                if record.chat.unread != 0 {
                    record.chat.unread = 0;
                    self.write_record(&key, &record).await?;
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to mark chat {} read: {}", chat_id, e);
        }
    }

    /// Remove a chat and every message belonging to it
    pub async fn delete_chat(&self, chat_id: &str) {
        let _guard = self.write_lock.lock().await;
        let result: StoreResult<usize> = async {
            let mut doomed = vec![self.keys.chat(chat_id)];
            let message_keys = self
                .kv
                .keys_with_prefix(&self.keys.chat_messages(chat_id))
                .await?;
            let removed = message_keys.len();

            for key in message_keys {
                if let Some(record) = self.read_record::<MessageRecord>(&key).await? {
                    doomed.push(self.keys.message_ref(&record.message.id));
                }
                doomed.push(key);
            }

            self.kv.remove(&doomed).await?;
            Ok(removed)
        }
        .await;

        match result {
            Ok(removed) => debug!("Deleted chat {} with {} messages", chat_id, removed),
            Err(e) => warn!("Failed to delete chat {}: {}", chat_id, e),
        }
    }

    // ------------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------------

    /// Insert or replace the contact for a device
    pub async fn save_contact(&self, device_id: &PeerId, name: &str, public_key: Option<&str>) {
        let contact = Contact {
            device_id: device_id.clone(),
            name: name.to_string(),
            public_key: public_key.map(str::to_string),
            added_at: Timestamp::now(),
        };

        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.write_record(&self.keys.contact(device_id), &contact).await {
            warn!("Failed to save contact {}: {}", device_id, e);
        }
    }

    pub async fn get_contacts(&self) -> BTreeMap<PeerId, Contact> {
        self.scan_or_default::<Contact>(&self.keys.contacts())
            .await
            .into_iter()
            .map(|contact| (contact.device_id.clone(), contact))
            .collect()
    }

    pub async fn delete_contact(&self, device_id: &PeerId) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.kv.remove(&[self.keys.contact(device_id)]).await {
            warn!("Failed to delete contact {}: {}", device_id, e);
        }
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    /// The persisted anonymous user id, generated on first use
    ///
    /// A stored id that is not valid text is replaced. When the id cannot be
    /// persisted a transient one is returned and generation is attempted again
    /// on the next call.
    pub async fn get_user_id(&self) -> String {
        let key = self.keys.user_id();
        match self.read_string(&key).await {
            Ok(Some(id)) => return id,
            Ok(None) | Err(StorageError::Corrupt { .. }) => {}
            Err(e) => {
                warn!("Failed to read user id: {}", e);
                return transient_user_id();
            }
        }

        let _guard = self.write_lock.lock().await;
        // Another caller may have generated it while we waited
        match self.read_string(&key).await {
            Ok(Some(id)) => return id,
            Ok(None) => {}
            Err(e @ StorageError::Corrupt { .. }) => {
                warn!("Replacing unreadable user id: {}", e);
            }
            Err(e) => {
                warn!("Failed to read user id: {}", e);
                return transient_user_id();
            }
        }

        let id = generate_id("user");
        match self.kv.set(&key, id.clone().into_bytes()).await {
            Ok(()) => {
                info!("Generated user id {}", id);
                id
            }
            Err(e) => {
                warn!("Failed to persist user id: {}", e);
                transient_user_id()
            }
        }
    }

    /// Store the key placeholders; no derivation happens here
    pub async fn save_keys(&self, public_key: &str, private_key: &str) {
        let _guard = self.write_lock.lock().await;
        let result: StoreResult<()> = async {
            self.kv
                .set(&self.keys.public_key(), public_key.as_bytes().to_vec())
                .await?;
            self.kv
                .set(&self.keys.private_key(), private_key.as_bytes().to_vec())
                .await
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to save keys: {}", e);
        }
    }

    pub async fn get_public_key(&self) -> Option<String> {
        self.string_or_none(&self.keys.public_key()).await
    }

    pub async fn get_private_key(&self) -> Option<String> {
        self.string_or_none(&self.keys.private_key()).await
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Remove messages, chats and contacts; identity and keys stay
    pub async fn clear_all(&self) {
        let _guard = self.write_lock.lock().await;
        let result: StoreResult<usize> = async {
            let mut doomed = Vec::new();
            for prefix in [
                self.keys.messages(),
                self.keys.message_refs(),
                self.keys.chats(),
                self.keys.contacts(),
            ] {
                doomed.extend(self.kv.keys_with_prefix(&prefix).await?);
            }
            self.kv.remove(&doomed).await?;
            Ok(doomed.len())
        }
        .await;

        match result {
            Ok(removed) => info!("Cleared conversation data ({} records)", removed),
            Err(e) => warn!("Failed to clear conversation data: {}", e),
        }
    }

    /// Count stored messages, chats and contacts
    pub async fn get_storage_stats(&self) -> StorageStats {
        let result: StoreResult<StorageStats> = async {
            Ok(StorageStats {
                messages: self.kv.keys_with_prefix(&self.keys.messages()).await?.len(),
                chats: self.kv.keys_with_prefix(&self.keys.chats()).await?.len(),
                contacts: self.kv.keys_with_prefix(&self.keys.contacts()).await?.len(),
            })
        }
        .await;

        result.unwrap_or_else(|e| {
            warn!("Failed to read storage stats: {}", e);
            StorageStats::default()
        })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Caller holds the write lock
    async fn put_message(&self, message: &ChatMessage) -> StoreResult<()> {
        let ref_key = self.keys.message_ref(&message.id);

        let existing = match self.read_string(&ref_key).await? {
            Some(primary) => self
                .read_record::<MessageRecord>(&primary)
                .await?
                .map(|record| (primary, record.seq)),
            None => None,
        };

        let (primary, seq) = match existing {
            Some((primary, seq)) => {
                let moved = self.keys.message(&message.chat_id, seq);
                if moved != primary {
                    // Chat id changed; keep the sequence, move the record
                    self.kv.remove(std::slice::from_ref(&primary)).await?;
                }
                (moved, seq)
            }
            None => {
                let seq = self.next_seq(&self.keys.message_seq()).await?;
                (self.keys.message(&message.chat_id, seq), seq)
            }
        };

        self.write_record(
            &primary,
            &MessageRecord {
                seq,
                message: message.clone(),
            },
        )
        .await?;
        self.kv.set(&ref_key, primary.into_bytes()).await
    }

    /// Caller holds the write lock
    async fn remove_message(&self, message_id: &str) -> StoreResult<()> {
        let ref_key = self.keys.message_ref(message_id);
        match self.read_string(&ref_key).await? {
            Some(primary) => self.kv.remove(&[primary, ref_key]).await,
            None => Ok(()),
        }
    }

    async fn load_messages(&self, prefix: &str) -> Vec<ChatMessage> {
        let mut records: Vec<MessageRecord> = self.scan_or_default(prefix).await;
        records.sort_by_key(|record| record.seq);
        records.into_iter().map(|record| record.message).collect()
    }

    /// Caller holds the write lock
    async fn next_seq(&self, key: &str) -> StoreResult<u64> {
        let current = self.read_record::<u64>(key).await?.unwrap_or(0);
        let next = current + 1;
        self.write_record(key, &next).await?;
        Ok(next)
    }

    /// Read and decode one record; corrupt records read as absent
    async fn read_record<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let Some(bytes) = self.kv.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    "{}",
                    StorageError::Corrupt {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                );
                Ok(None)
            }
        }
    }

    async fn write_record<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.kv.set(key, bytes).await
    }

    /// Decode every record under a prefix, skipping corrupt ones
    async fn scan<T: DeserializeOwned>(&self, prefix: &str) -> StoreResult<Vec<T>> {
        let mut records = Vec::new();
        for key in self.kv.keys_with_prefix(prefix).await? {
            if let Some(record) = self.read_record(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn scan_or_default<T: DeserializeOwned>(&self, prefix: &str) -> Vec<T> {
        self.scan(prefix).await.unwrap_or_else(|e| {
            warn!("Failed to list records under {}: {}", prefix, e);
            Vec::new()
        })
    }

    async fn read_string(&self, key: &str) -> StoreResult<Option<String>> {
        match self.kv.get(key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn string_or_none(&self, key: &str) -> Option<String> {
        self.read_string(key).await.unwrap_or_else(|e| {
            warn!("Failed to read {}: {}", key, e);
            None
        })
    }
}

fn transient_user_id() -> String {
    format!("user_{}", Timestamp::now().as_millis())
}
