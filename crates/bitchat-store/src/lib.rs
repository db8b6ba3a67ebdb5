//! Local conversation store for BitChat
//!
//! Chats, messages, contacts and the anonymous local identity, persisted on
//! the device without any server. [`ConversationStore`] is the typed API;
//! [`KeyValueStore`] is the byte-level seam it runs on.
//!
//! ```rust,no_run
//! use bitchat_core::ChatMessage;
//! use bitchat_store::{ConversationStore, FileStore};
//!
//! # async fn example() -> Result<(), bitchat_store::StorageError> {
//! let store = ConversationStore::new(FileStore::open("/tmp/bitchat").await?);
//! store.save_message(&ChatMessage::outgoing("chat_1", "hello")).await;
//! assert_eq!(store.get_messages_for_chat("chat_1").await.len(), 1);
//! # Ok(())
//! # }
//! ```

mod keys;
pub mod kv;
pub mod store;

pub use bitchat_core::StorageError;
pub use kv::{FileStore, KeyValueStore, MemoryStore, StoreResult};
pub use store::ConversationStore;
