//! In-memory implementation of the store traits.
//!
//! Primarily for tests. Same semantics as SQLite, nothing persisted.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use filer_sync_core::{Entry, FullPath};

use crate::error::{Result, StoreError};
use crate::traits::{FilerStore, KvStore, OffsetStore};

/// In-memory store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Directory -> children by name.
    dirs: HashMap<FullPath, BTreeMap<String, Entry>>,

    /// Side KV table (offsets, signature).
    kv: HashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Number of entries across all directories.
    pub fn entry_count(&self) -> usize {
        self.read().dirs.values().map(BTreeMap::len).sum()
    }

    /// Every stored entry keyed by full path, for comparing store states.
    pub fn snapshot(&self) -> BTreeMap<FullPath, Entry> {
        self.read()
            .dirs
            .iter()
            .flat_map(|(dir, children)| {
                children
                    .values()
                    .map(move |entry| (dir.child(&entry.name), entry.clone()))
            })
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FilerStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert_entry(&self, dir: &FullPath, entry: &Entry) -> Result<()> {
        let mut inner = self.write();
        inner
            .dirs
            .entry(dir.clone())
            .or_default()
            .insert(entry.name.clone(), entry.clone());
        Ok(())
    }

    async fn update_entry(&self, dir: &FullPath, entry: &Entry) -> Result<()> {
        let mut inner = self.write();
        match inner
            .dirs
            .get_mut(dir)
            .and_then(|children| children.get_mut(&entry.name))
        {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(dir.child(&entry.name).to_string())),
        }
    }

    async fn find_entry(&self, path: &FullPath) -> Result<Option<Entry>> {
        let inner = self.read();
        Ok(inner
            .dirs
            .get(&path.parent())
            .and_then(|children| children.get(path.name()))
            .cloned())
    }

    async fn delete_entry(&self, path: &FullPath) -> Result<()> {
        let mut inner = self.write();
        let parent = path.parent();
        if let Some(children) = inner.dirs.get_mut(&parent) {
            children.remove(path.name());
            if children.is_empty() {
                inner.dirs.remove(&parent);
            }
        }
        Ok(())
    }

    async fn delete_folder_children(&self, dir: &FullPath) -> Result<()> {
        let mut inner = self.write();
        inner.dirs.retain(|key, _| !key.is_under(dir));
        Ok(())
    }

    async fn list_directory_entries(
        &self,
        dir: &FullPath,
        start_file_name: &str,
        include_start: bool,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        let inner = self.read();
        let Some(children) = inner.dirs.get(dir) else {
            return Ok(Vec::new());
        };

        let lower = if start_file_name.is_empty() {
            Bound::Unbounded
        } else if include_start {
            Bound::Included(start_file_name.to_string())
        } else {
            Bound::Excluded(start_file_name.to_string())
        };

        Ok(children
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    fn offsets(&self) -> Option<&dyn OffsetStore> {
        Some(self)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn kv_put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write().kv.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn kv_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.read().kv.get(key).cloned())
    }

    async fn kv_delete(&self, key: &[u8]) -> Result<()> {
        self.write().kv.remove(key);
        Ok(())
    }
}
