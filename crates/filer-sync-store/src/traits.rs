//! Store traits: the narrow capability contract the replication engine needs
//! from a filer's local metadata store.

use async_trait::async_trait;
use filer_sync_core::{Entry, FullPath, PeerAddress, StoreSignature, TsNs};

use crate::error::{Result, StoreError};

/// KV key under which a store keeps its own signature.
pub const SIGNATURE_KEY: &[u8] = b"filer.store.id";

/// Entry persistence.
///
/// Entries are keyed by `(directory, entry.name)`.
///
/// # Design Notes
///
/// - `insert_entry` is an upsert. Replication replays creates as inserts and
///   must be able to re-deliver them after a restart.
/// - `delete_entry` on a missing path succeeds for the same reason.
#[async_trait]
pub trait FilerStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Insert or overwrite `entry` under `dir`.
    async fn insert_entry(&self, dir: &FullPath, entry: &Entry) -> Result<()>;

    /// Overwrite an existing entry. Fails with `NotFound` if it is missing.
    async fn update_entry(&self, dir: &FullPath, entry: &Entry) -> Result<()>;

    /// Look up an entry by its full path.
    async fn find_entry(&self, path: &FullPath) -> Result<Option<Entry>>;

    /// Remove an entry. Missing entries are not an error.
    async fn delete_entry(&self, path: &FullPath) -> Result<()>;

    /// Remove every entry below `dir`, recursively. `dir` itself stays.
    async fn delete_folder_children(&self, dir: &FullPath) -> Result<()>;

    /// List the entries of `dir` ordered by name.
    ///
    /// Starts after `start_file_name` (or at it, with `include_start`) and
    /// returns at most `limit` entries. An empty start lists from the top.
    async fn list_directory_entries(
        &self,
        dir: &FullPath,
        start_file_name: &str,
        include_start: bool,
        limit: usize,
    ) -> Result<Vec<Entry>>;

    /// The durable offset capability, if this store has one.
    fn offsets(&self) -> Option<&dyn OffsetStore> {
        None
    }
}

/// A small key/value table kept next to the entries.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn kv_put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// `None` when the key was never written.
    async fn kv_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn kv_delete(&self, key: &[u8]) -> Result<()>;
}

/// Durable per-peer replication offsets.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// The last persisted offset for `peer`; `None` on first contact.
    async fn read_offset(&self, peer: &PeerAddress) -> Result<Option<TsNs>>;

    /// Persist the offset for `peer`.
    async fn write_offset(&self, peer: &PeerAddress, ts: TsNs) -> Result<()>;
}

/// KV key of the offset record for `peer`.
pub fn offset_key(peer: &PeerAddress) -> Vec<u8> {
    let mut key = b"meta".to_vec();
    key.extend_from_slice(peer.as_str().as_bytes());
    key
}

#[async_trait]
impl<K: KvStore + ?Sized> OffsetStore for K {
    async fn read_offset(&self, peer: &PeerAddress) -> Result<Option<TsNs>> {
        match self.kv_get(&offset_key(peer)).await? {
            None => Ok(None),
            Some(bytes) => TsNs::from_be_slice(&bytes).map(Some).ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "offset for {} has {} bytes, expected 8",
                    peer,
                    bytes.len()
                ))
            }),
        }
    }

    async fn write_offset(&self, peer: &PeerAddress, ts: TsNs) -> Result<()> {
        self.kv_put(&offset_key(peer), &ts.to_be_bytes()).await
    }
}

/// Read the store's signature, generating and persisting one on first use.
///
/// Every filer opening the same backing store thus reports the same
/// signature.
pub async fn load_or_create_signature<K: KvStore + ?Sized>(kv: &K) -> Result<StoreSignature> {
    if let Some(bytes) = kv.kv_get(SIGNATURE_KEY).await? {
        let arr: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
            StoreError::InvalidData(format!("store signature has {} bytes", bytes.len()))
        })?;
        return Ok(StoreSignature(i32::from_be_bytes(arr)));
    }

    let signature = StoreSignature::generate();
    kv.kv_put(SIGNATURE_KEY, &signature.as_i32().to_be_bytes())
        .await?;
    tracing::info!(%signature, "generated new store signature");
    Ok(signature)
}

/// Convenience helpers on top of [`FilerStore`].
pub trait FilerStoreExt: FilerStore {
    /// List a whole directory by paging through `list_directory_entries`.
    fn list_all_entries(
        &self,
        dir: &FullPath,
        page_size: usize,
    ) -> impl std::future::Future<Output = Result<Vec<Entry>>> + Send;
}

impl<S: FilerStore + ?Sized> FilerStoreExt for S {
    async fn list_all_entries(&self, dir: &FullPath, page_size: usize) -> Result<Vec<Entry>> {
        let page_size = page_size.max(1);
        let mut all = Vec::new();
        let mut last_name = String::new();

        loop {
            let page = self
                .list_directory_entries(dir, &last_name, false, page_size)
                .await?;
            let full = page.len() == page_size;
            if let Some(last) = page.last() {
                last_name = last.name.clone();
            }
            all.extend(page);
            if !full {
                break;
            }
        }

        Ok(all)
    }
}
