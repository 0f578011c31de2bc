//! Per-node handles into a shared cache substrate.
//!
//! A [`CacheStorage`] is created once by the scheduler and shared by every
//! node. Each node gets a [`Cache`] scoped to its path, which can be further
//! split into named partitions with [`Cache::sub_cache`]. Partitions share
//! the storage but never each other's keys.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use camino::Utf8Path;
use serde_json::Value;

/// BLAKE3 fingerprint of a file's content, hex encoded.
fn fingerprint(path: &Utf8Path) -> std::io::Result<String> {
    let hash = blake3::Hasher::new().update_mmap(path)?.finalize();
    Ok(hash.to_hex().to_string())
}

type Partition = HashMap<String, Value>;

/// The shared substrate behind every node cache.
#[derive(Clone, Default)]
pub struct CacheStorage {
    inner: Arc<RwLock<HashMap<String, Partition>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, prefix: &str, key: &str) -> Option<Value> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.get(prefix).and_then(|part| part.get(key)).cloned()
    }

    fn set(&self, prefix: &str, key: &str, value: Value) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .entry(prefix.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn invalidate(&self, prefix: &str, key: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .get_mut(prefix)
            .is_some_and(|part| part.remove(key).is_some())
    }

    fn drop_partition(&self, prefix: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.remove(prefix);
    }
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheStorage(*)")
    }
}

/// A cache namespace addressed by a prefix inside a [`CacheStorage`].
#[derive(Clone, Debug)]
pub struct Cache {
    storage: CacheStorage,
    prefix: String,
}

impl Cache {
    pub fn new(storage: CacheStorage, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns an independent partition named `name` on the same storage.
    pub fn sub_cache(&self, name: &str) -> Cache {
        Cache::new(self.storage.clone(), format!("{}/{}", self.prefix, name))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.storage.get(&self.prefix, key)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.storage.set(&self.prefix, key, value.into());
    }

    /// Removes `key`, returning whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.storage.invalidate(&self.prefix, key)
    }

    /// Forgets every key of this partition. Sub-caches are left untouched.
    pub fn destruct(&self) {
        self.storage.drop_partition(&self.prefix);
    }

    /// Remembers the current content fingerprint of `path` under `key`.
    pub fn cache_file_info(&self, key: &str, path: &Utf8Path) -> std::io::Result<()> {
        self.set(key, fingerprint(path)?);
        Ok(())
    }

    /// Checks whether `path` changed since [`Cache::cache_file_info`] was last
    /// called with the same key. Missing files always need a rebuild.
    pub fn need_rebuild_file(&self, key: &str, path: &Utf8Path) -> bool {
        let Ok(hash) = fingerprint(path) else {
            return true;
        };

        match self.get(key) {
            Some(Value::String(old)) => old != hash,
            _ => true,
        }
    }
}
