//! Durable key-value storage abstraction
//!
//! The conversation store is a typed layer over [`KeyValueStore`]. Two
//! implementations ship here: an in-memory map for tests and ephemeral use,
//! and a directory-backed store holding one file per key.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bitchat_core::StorageError;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub type StoreResult<T> = std::result::Result<T, StorageError>;

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// Byte-string storage partitioned by string key
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Remove every listed key; absent keys are ignored
    async fn remove(&self, keys: &[String]) -> StoreResult<()>;

    /// All keys starting with `prefix`, in ascending order
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

// ----------------------------------------------------------------------------
// Memory Storage Implementation
// ----------------------------------------------------------------------------

/// In-memory storage implementation for testing and fallback
#[derive(Debug)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing storage going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.check()?;
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> StoreResult<()> {
        self.check()?;
        let mut data = self.data.write().await;
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        Ok(self
            .data
            .read()
            .await
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ----------------------------------------------------------------------------
// File Storage Implementation
// ----------------------------------------------------------------------------

const TEMP_SUFFIX: &str = ".tmp";
/// Bytes of the big-endian key length that open every record file
const KEY_LEN_BYTES: usize = 4;

/// Directory-backed storage, one file per key
///
/// A file is named by the SHA-256 digest of its key, so file names have a
/// fixed length however long the key is. The file holds the key followed by
/// the value, which lets [`FileStore::open`] rebuild the key index. Writes go
/// to a temporary file first and are renamed into place.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    index: RwLock<BTreeSet<String>>,
    next_temp: AtomicU64,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        let index = Self::load_index(&dir).await?;
        debug!(
            "Opened file store at {} with {} keys",
            dir.display(),
            index.len()
        );
        Ok(Self {
            dir,
            index: RwLock::new(index),
            next_temp: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }

    fn encode_record(key: &str, value: &[u8]) -> StoreResult<Vec<u8>> {
        let key_len = u32::try_from(key.len()).map_err(|_| StorageError::Corrupt {
            key: key.to_string(),
            reason: "key too long".to_string(),
        })?;
        let mut record = Vec::with_capacity(KEY_LEN_BYTES + key.len() + value.len());
        record.extend_from_slice(&key_len.to_be_bytes());
        record.extend_from_slice(key.as_bytes());
        record.extend_from_slice(value);
        Ok(record)
    }

    /// Split a record file into its key and value
    fn decode_record(mut record: Vec<u8>) -> Option<(String, Vec<u8>)> {
        let len_bytes: [u8; KEY_LEN_BYTES] = record.get(..KEY_LEN_BYTES)?.try_into().ok()?;
        let key_end = KEY_LEN_BYTES.checked_add(u32::from_be_bytes(len_bytes) as usize)?;
        let key = std::str::from_utf8(record.get(KEY_LEN_BYTES..key_end)?)
            .ok()?
            .to_string();
        let value = record.split_off(key_end);
        Some((key, value))
    }

    async fn load_index(dir: &Path) -> StoreResult<BTreeSet<String>> {
        let mut index = BTreeSet::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let record = match fs::read(entry.path()).await {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", name, e);
                    continue;
                }
            };
            match Self::decode_record(record) {
                Some((key, _)) if Self::file_name(&key) == name => {
                    index.insert(key);
                }
                _ => debug!("Ignoring foreign file {}", name),
            }
        }
        Ok(index)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let record = match fs::read(self.path_for(key)).await {
            Ok(record) => record,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match Self::decode_record(record) {
            Some((stored_key, value)) if stored_key == key => Ok(Some(value)),
            _ => Err(StorageError::Corrupt {
                key: key.to_string(),
                reason: "record file does not hold this key".to_string(),
            }),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let record = Self::encode_record(key, &value)?;
        let target = self.path_for(key);
        let serial = self.next_temp.fetch_add(1, Ordering::Relaxed);
        let temp = self
            .dir
            .join(format!("{}.{}{}", Self::file_name(key), serial, TEMP_SUFFIX));

        fs::write(&temp, record).await?;
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        self.index.write().await.insert(key.to_string());
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> StoreResult<()> {
        for key in keys {
            match fs::remove_file(self.path_for(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.index.write().await.remove(key);
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .index
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
