//! User-asserted "I am safe" flag, replicated across independently
//! writable stores.
//!
//! Reads are the logical OR of every store; an unreadable store counts as
//! `false`. Consumption clears every store before the caller proceeds. A
//! store that cannot be cleared is logged and otherwise ignored: a stray
//! `true` left behind is only observed after the episode has resolved, when
//! cancellation is no longer acted upon.

use crate::error::StoreError;
use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const PRIMARY_KEY: &str = "safe_primary";
pub const MIRROR_KEY: &str = "safe_mirror";

/// One physical boolean entry.
pub trait FlagStore: Send + Sync {
    fn key(&self) -> &str;
    fn read(&self) -> Result<bool, StoreError>;
    fn write(&self, value: bool) -> Result<(), StoreError>;
}

/// The single contract the coordinator sees, however many stores back it.
pub trait SafetyFlag: Send + Sync {
    fn is_set(&self) -> bool;
    fn clear_all(&self);

    /// Returns `true` and clears every store if the flag was set.
    fn consume(&self) -> bool {
        if self.is_set() {
            self.clear_all();
            true
        } else {
            false
        }
    }
}

pub struct MemoryFlagStore {
    key: String,
    value: AtomicBool,
}

impl MemoryFlagStore {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: AtomicBool::new(false),
        }
    }
}

impl FlagStore for MemoryFlagStore {
    fn key(&self) -> &str {
        &self.key
    }

    fn read(&self) -> Result<bool, StoreError> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    fn write(&self, value: bool) -> Result<(), StoreError> {
        self.value.store(value, Ordering::SeqCst);
        Ok(())
    }
}

/// A JSON object file (`{"<key>": bool}`) that other processes may write.
pub struct FileFlagStore {
    key: String,
    path: PathBuf,
}

impl FileFlagStore {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
        }
    }

    fn load(&self) -> Result<HashMap<String, bool>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(HashMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl FlagStore for FileFlagStore {
    fn key(&self) -> &str {
        &self.key
    }

    fn read(&self) -> Result<bool, StoreError> {
        Ok(self.load()?.get(&self.key).copied().unwrap_or(false))
    }

    fn write(&self, value: bool) -> Result<(), StoreError> {
        // Unreadable contents are replaced rather than blocking the write.
        let mut entries = self.load().unwrap_or_default();
        entries.insert(self.key.clone(), value);

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        // One temp file per write: concurrent writers never share it
        let tmp = self
            .path
            .with_file_name(format!("{}.{}.tmp", self.key, Uuid::new_v4()));
        let result = serde_json::to_vec(&entries)
            .map_err(StoreError::from)
            .and_then(|bytes| fs::write(&tmp, bytes).map_err(StoreError::from))
            .and_then(|()| fs::rename(&tmp, &self.path).map_err(StoreError::from));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}

/// OR-read / clear-all reconciliation over any number of stores.
pub struct ReplicatedFlag {
    stores: Vec<Arc<dyn FlagStore>>,
}

impl ReplicatedFlag {
    pub fn new(stores: Vec<Arc<dyn FlagStore>>) -> Self {
        Self { stores }
    }

    /// The standard deployment: `safe_primary.json` and `safe_mirror.json` under `dir`.
    pub fn primary_and_mirror(dir: &Path) -> Self {
        let primary: Arc<dyn FlagStore> =
            Arc::new(FileFlagStore::new(PRIMARY_KEY, dir.join("safe_primary.json")));
        let mirror: Arc<dyn FlagStore> =
            Arc::new(FileFlagStore::new(MIRROR_KEY, dir.join("safe_mirror.json")));
        Self::new(vec![primary, mirror])
    }

    pub fn in_memory() -> Self {
        let primary: Arc<dyn FlagStore> = Arc::new(MemoryFlagStore::new(PRIMARY_KEY));
        let mirror: Arc<dyn FlagStore> = Arc::new(MemoryFlagStore::new(MIRROR_KEY));
        Self::new(vec![primary, mirror])
    }

    pub fn store(&self, key: &str) -> Option<&Arc<dyn FlagStore>> {
        self.stores.iter().find(|s| s.key() == key)
    }

    /// Sets a single named store, as an independent execution context would.
    pub fn raise(&self, key: &str) -> Result<(), StoreError> {
        let store = self
            .store(key)
            .ok_or_else(|| StoreError::UnknownStore(key.to_string()))?;
        store.write(true)?;
        debug!("safety flag raised via {}", key);
        Ok(())
    }
}

impl SafetyFlag for ReplicatedFlag {
    fn is_set(&self) -> bool {
        // Every store is polled so read failures are always reported.
        self.stores.iter().fold(false, |set, store| {
            let value = store.read().unwrap_or_else(|e| {
                warn!("safety flag store {} unreadable, treating as clear: {}", store.key(), e);
                false
            });
            set || value
        })
    }

    fn clear_all(&self) {
        for store in &self.stores {
            if let Err(e) = store.write(false) {
                warn!(
                    "safety flag store {} could not be cleared, stores may disagree: {}",
                    store.key(),
                    e
                );
            }
        }
    }
}
