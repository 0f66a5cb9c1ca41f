//! Persistent key-value store shared by every context.
//!
//! Values are JSON documents stored under string keys. Every write that
//! actually changes a key is announced on a broadcast channel so other
//! contexts holding a handle to the same store can follow along.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;

pub const NOTES_KEY: &str = "notes";
pub const SETTINGS_KEY: &str = "settings";

/// Capacity of the change notification channel.
const CHANGE_BUFFER: usize = 256;

/// Identifies the component that issued a write.
pub type WriterId = u64;

static NEXT_WRITER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a writer id unique within the process.
pub fn next_writer_id() -> WriterId {
    NEXT_WRITER_ID.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("malformed value under '{key}': {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// A key whose stored value changed. `new_value` is `None` when removed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    /// Writer that made the change, if it identified itself.
    pub writer: Option<WriterId>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Key-value storage with change subscription.
pub trait Store: Send + Sync {
    /// Read the given keys. Missing keys are absent from the map.
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError>;

    /// Write all entries as one unit on behalf of `writer` and notify
    /// subscribers of the keys whose value changed. Notices go out in the
    /// same order as the writes they describe.
    fn set_as(
        &self,
        writer: Option<WriterId>,
        entries: Vec<(String, Value)>,
    ) -> Result<(), StoreError>;

    /// Anonymous write.
    fn set(&self, entries: Vec<(String, Value)>) -> Result<(), StoreError> {
        self.set_as(None, entries)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Decode a typed value from a `get` result.
pub fn decode<T: serde::de::DeserializeOwned>(
    values: &mut HashMap<String, Value>,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match values.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                key: key.to_string(),
                source,
            }),
    }
}

fn notify(tx: &broadcast::Sender<StoreChange>, changes: Vec<StoreChange>) {
    for change in changes {
        // No receivers is fine; nobody is listening yet.
        let _ = tx.send(change);
    }
}

// ============================================================================
// Sled-backed Store
// ============================================================================

#[derive(Clone)]
pub struct SledStore {
    tree: sled::Tree,
    tx: broadcast::Sender<StoreChange>,
    /// Serializes commit and notification across handles.
    write_lock: Arc<Mutex<()>>,
}

impl SledStore {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        let tree = db.open_tree("synapse:local")?;
        let (tx, _) = broadcast::channel(CHANGE_BUFFER);
        Ok(Self {
            tree,
            tx,
            write_lock: Arc::new(Mutex::new(())),
        })
    }
}

impl Store for SledStore {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError> {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(bytes) = self.tree.get(key.as_bytes())? {
                let value = serde_json::from_slice(&bytes).map_err(|source| {
                    StoreError::Malformed {
                        key: key.to_string(),
                        source,
                    }
                })?;
                out.insert(key.to_string(), value);
            }
        }
        Ok(out)
    }

    fn set_as(
        &self,
        writer: Option<WriterId>,
        entries: Vec<(String, Value)>,
    ) -> Result<(), StoreError> {
        let encoded: Vec<(String, Vec<u8>)> = entries
            .iter()
            .map(|(key, value)| {
                serde_json::to_vec(value)
                    .map(|bytes| (key.clone(), bytes))
                    .map_err(|source| StoreError::Malformed {
                        key: key.clone(),
                        source,
                    })
            })
            .collect::<Result<_, _>>()?;

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous: Vec<Option<sled::IVec>> = self
            .tree
            .transaction(|tx| {
                let mut previous = Vec::with_capacity(encoded.len());
                for (key, bytes) in &encoded {
                    previous.push(tx.insert(key.as_str(), bytes.as_slice())?);
                }
                Ok::<_, sled::transaction::ConflictableTransactionError<()>>(previous)
            })
            .map_err(|e| StoreError::Backend(format!("{:?}", e)))?;
        self.tree.flush()?;

        let changes = entries
            .into_iter()
            .zip(encoded.iter())
            .zip(previous)
            .filter(|((_, (_, bytes)), old)| old.as_deref() != Some(bytes.as_slice()))
            .map(|(((key, value), _), old)| StoreChange {
                key,
                writer,
                old_value: old.and_then(|v| serde_json::from_slice(&v).ok()),
                new_value: Some(value),
            })
            .collect();
        notify(&self.tx, changes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }
}

// ============================================================================
// In-memory Store
// ============================================================================

#[derive(Clone)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, Value>>>,
    tx: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            values: Arc::new(Mutex::new(HashMap::new())),
            tx,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError> {
        let values = self
            .values
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))?;
        Ok(keys
            .iter()
            .filter_map(|k| values.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn set_as(
        &self,
        writer: Option<WriterId>,
        entries: Vec<(String, Value)>,
    ) -> Result<(), StoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))?;
        let mut changes = Vec::new();
        for (key, value) in entries {
            let old = values.insert(key.clone(), value.clone());
            if old.as_ref() != Some(&value) {
                changes.push(StoreChange {
                    key,
                    writer,
                    old_value: old,
                    new_value: Some(value),
                });
            }
        }
        // Still holding the lock so notices leave in write order.
        notify(&self.tx, changes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
