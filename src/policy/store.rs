use super::unlock::TemporaryUnlock;
use crate::classifier::StringSet;
use rustc_hash::FxHashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("policy store lock poisoned")]
    Poisoned,
}

/// Persistent string-keyed configuration source shared with the host.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-process store, used for tests and when persistence is disabled.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<FxHashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.read().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.write().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// Typed readers. A read failure or a corrupt value degrades to the default and
// is logged; it never propagates.

pub(crate) fn read_raw(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to read policy key '{}': {}", key, e);
            None
        }
    }
}

pub(crate) fn read_bool(store: &dyn KeyValueStore, key: &str, default: bool) -> bool {
    match read_raw(store, key).as_deref().map(str::trim) {
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            warn!("Ignoring non-boolean value '{}' for '{}'", other, key);
            default
        }
        None => default,
    }
}

pub(crate) fn read_string(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    read_raw(store, key).filter(|s| !s.trim().is_empty())
}

/// Reads a JSON array of strings, normalising each entry with `normalize`.
pub(crate) fn read_set(
    store: &dyn KeyValueStore,
    key: &str,
    normalize: fn(&str) -> String,
) -> Option<StringSet> {
    let raw = read_raw(store, key)?;
    match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
        Ok(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(normalize)
                .filter(|s| !s.is_empty())
                .map(String::into_boxed_str)
                .collect(),
        ),
        Err(e) => {
            warn!("Corrupt list under '{}', treating as empty: {}", key, e);
            Some(StringSet::default())
        }
    }
}

pub(crate) fn read_unlocks(store: &dyn KeyValueStore) -> Vec<TemporaryUnlock> {
    let Some(raw) = read_raw(store, super::keys::TEMP_APP_UNLOCKS) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<TemporaryUnlock>>(&raw) {
        Ok(list) => list,
        Err(e) => {
            warn!("Corrupt temporary unlock list, treating as empty: {}", e);
            Vec::new()
        }
    }
}

/// Sorted JSON array, so persisted values are stable across writes.
pub(crate) fn encode_set(set: &StringSet) -> Result<String, StoreError> {
    let mut items: Vec<&str> = set.iter().map(|s| &**s).collect();
    items.sort_unstable();
    Ok(serde_json::to_string(&items)?)
}
