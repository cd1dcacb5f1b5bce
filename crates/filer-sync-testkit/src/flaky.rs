//! A store wrapper with injectable write failures.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use filer_sync_core::{Entry, FullPath};
use filer_sync_store::{FilerStore, KvStore, OffsetStore, Result, StoreError};

/// Wraps a store, failing writes on demand and counting the ones that
/// went through.
pub struct FlakyStore<S> {
    inner: S,
    failing_entry_writes: AtomicUsize,
    failing_kv_writes: AtomicUsize,
    entry_writes: AtomicUsize,
    kv_writes: AtomicUsize,
    offsets_enabled: AtomicBool,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing_entry_writes: AtomicUsize::new(0),
            failing_kv_writes: AtomicUsize::new(0),
            entry_writes: AtomicUsize::new(0),
            kv_writes: AtomicUsize::new(0),
            offsets_enabled: AtomicBool::new(true),
        }
    }

    /// Hide the offset capability, like a backend without a KV table.
    pub fn without_offsets(self) -> Self {
        self.offsets_enabled.store(false, Ordering::SeqCst);
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail the next `count` entry writes (insert, update, delete).
    pub fn fail_next_entry_writes(&self, count: usize) {
        self.failing_entry_writes.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` KV writes, which include offset checkpoints.
    pub fn fail_next_kv_writes(&self, count: usize) {
        self.failing_kv_writes.store(count, Ordering::SeqCst);
    }

    /// Entry writes that reached the inner store.
    pub fn entry_writes(&self) -> usize {
        self.entry_writes.load(Ordering::SeqCst)
    }

    /// KV writes that reached the inner store.
    pub fn kv_writes(&self) -> usize {
        self.kv_writes.load(Ordering::SeqCst)
    }

    fn admit(failing: &AtomicUsize, done: &AtomicUsize, what: &str) -> Result<()> {
        let injected = failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable(format!("injected {} failure", what)));
        }
        done.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn admit_entry_write(&self) -> Result<()> {
        Self::admit(&self.failing_entry_writes, &self.entry_writes, "entry write")
    }

    fn admit_kv_write(&self) -> Result<()> {
        Self::admit(&self.failing_kv_writes, &self.kv_writes, "kv write")
    }
}

#[async_trait]
impl<S: FilerStore + KvStore> FilerStore for FlakyStore<S> {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn insert_entry(&self, dir: &FullPath, entry: &Entry) -> Result<()> {
        self.admit_entry_write()?;
        self.inner.insert_entry(dir, entry).await
    }

    async fn update_entry(&self, dir: &FullPath, entry: &Entry) -> Result<()> {
        self.admit_entry_write()?;
        self.inner.update_entry(dir, entry).await
    }

    async fn find_entry(&self, path: &FullPath) -> Result<Option<Entry>> {
        self.inner.find_entry(path).await
    }

    async fn delete_entry(&self, path: &FullPath) -> Result<()> {
        self.admit_entry_write()?;
        self.inner.delete_entry(path).await
    }

    async fn delete_folder_children(&self, dir: &FullPath) -> Result<()> {
        self.admit_entry_write()?;
        self.inner.delete_folder_children(dir).await
    }

    async fn list_directory_entries(
        &self,
        dir: &FullPath,
        start_file_name: &str,
        include_start: bool,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        self.inner
            .list_directory_entries(dir, start_file_name, include_start, limit)
            .await
    }

    fn offsets(&self) -> Option<&dyn OffsetStore> {
        if self.offsets_enabled.load(Ordering::SeqCst) {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl<S: KvStore> KvStore for FlakyStore<S> {
    async fn kv_put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.admit_kv_write()?;
        self.inner.kv_put(key, value).await
    }

    async fn kv_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.kv_get(key).await
    }

    async fn kv_delete(&self, key: &[u8]) -> Result<()> {
        self.admit_kv_write()?;
        self.inner.kv_delete(key).await
    }
}
