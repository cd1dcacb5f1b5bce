//! SQLite implementation of the store traits.
//!
//! Uses rusqlite with bundled SQLite; every call runs on the blocking pool
//! via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use filer_sync_core::{Entry, FullPath};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{FilerStore, KvStore, OffsetStore};

/// SQLite-based store.
///
/// Thread-safe via an internal Mutex around the single connection.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, creating and migrating it
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

/// 64-bit hash of a directory path, the leading half of the entry key.
fn dir_hash(dir: &FullPath) -> i64 {
    let hash = blake3::hash(dir.as_str().as_bytes());
    let mut first = [0u8; 8];
    first.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_be_bytes(first)
}

/// LIKE pattern matching everything strictly below `dir`.
fn descendants_pattern(dir: &FullPath) -> String {
    let mut escaped = String::with_capacity(dir.as_str().len() + 2);
    for c in dir.as_str().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    if !dir.is_root() {
        escaped.push('/');
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl FilerStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_entry(&self, dir: &FullPath, entry: &Entry) -> Result<()> {
        let meta = entry.encode_attributes_and_chunks()?;
        let dir = dir.clone();
        let name = entry.name.clone();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO filemeta (dirhash, name, directory, meta)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(dirhash, name) DO UPDATE
                 SET directory = excluded.directory, meta = excluded.meta",
                params![dir_hash(&dir), name, dir.as_str(), meta],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_entry(&self, dir: &FullPath, entry: &Entry) -> Result<()> {
        let meta = entry.encode_attributes_and_chunks()?;
        let dir = dir.clone();
        let name = entry.name.clone();

        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE filemeta SET meta = ?3 WHERE dirhash = ?1 AND name = ?2",
                params![dir_hash(&dir), name, meta],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(dir.child(&name).to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn find_entry(&self, path: &FullPath) -> Result<Option<Entry>> {
        let dir = path.parent();
        let name = path.name().to_string();

        self.run(move |conn| {
            let meta: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT meta FROM filemeta WHERE dirhash = ?1 AND name = ?2",
                    params![dir_hash(&dir), name],
                    |row| row.get(0),
                )
                .optional()?;

            match meta {
                Some(bytes) => Ok(Some(Entry::decode_attributes_and_chunks(name, &bytes)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn delete_entry(&self, path: &FullPath) -> Result<()> {
        let dir = path.parent();
        let name = path.name().to_string();

        self.run(move |conn| {
            conn.execute(
                "DELETE FROM filemeta WHERE dirhash = ?1 AND name = ?2",
                params![dir_hash(&dir), name],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_folder_children(&self, dir: &FullPath) -> Result<()> {
        let dir = dir.clone();

        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM filemeta WHERE directory = ?1 OR directory LIKE ?2 ESCAPE '\\'",
                params![dir.as_str(), descendants_pattern(&dir)],
            )?;
            tracing::debug!(dir = %dir, removed, "deleted folder children");
            Ok(())
        })
        .await
    }

    async fn list_directory_entries(
        &self,
        dir: &FullPath,
        start_file_name: &str,
        include_start: bool,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        let dir = dir.clone();
        let start = start_file_name.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.run(move |conn| {
            let sql = if include_start {
                "SELECT name, meta FROM filemeta
                 WHERE dirhash = ?1 AND name >= ?2
                 ORDER BY name ASC LIMIT ?3"
            } else {
                "SELECT name, meta FROM filemeta
                 WHERE dirhash = ?1 AND name > ?2
                 ORDER BY name ASC LIMIT ?3"
            };

            let mut stmt = conn.prepare(sql)?;
            let rows: Vec<(String, Vec<u8>)> = stmt
                .query_map(params![dir_hash(&dir), start, limit], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(name, meta)| Ok(Entry::decode_attributes_and_chunks(name, &meta)?))
                .collect()
        })
        .await
    }

    fn offsets(&self) -> Option<&dyn OffsetStore> {
        Some(self)
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn kv_put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let key = key.to_vec();
        let value = value.to_vec();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn kv_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = key.to_vec();

        self.run(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
        .await
    }

    async fn kv_delete(&self, key: &[u8]) -> Result<()> {
        let key = key.to_vec();

        self.run(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::load_or_create_signature;
    use filer_sync_core::{FileChunk, PeerAddress, TsNs};

    fn path(s: &str) -> FullPath {
        FullPath::parse(s).unwrap()
    }

    fn chunked_file(name: &str, size: u64) -> Entry {
        let mut entry = Entry::file(name);
        entry.attributes.file_size = size;
        entry.chunks.push(FileChunk {
            file_id: format!("7,{}", name),
            offset: 0,
            size,
            modified_ts_ns: 1,
        });
        entry
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = SqliteStore::open_memory().unwrap();
        let entry = chunked_file("movie.mkv", 1 << 20);

        store.insert_entry(&path("/media"), &entry).await.unwrap();

        let found = store.find_entry(&path("/media/movie.mkv")).await.unwrap();
        assert_eq!(found, Some(entry));
        assert!(store.find_entry(&path("/media/other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_overwrites() {
        let store = SqliteStore::open_memory().unwrap();
        let dir = path("/media");

        store.insert_entry(&dir, &chunked_file("a", 1)).await.unwrap();
        store.insert_entry(&dir, &chunked_file("a", 2)).await.unwrap();

        let found = store.find_entry(&path("/media/a")).await.unwrap().unwrap();
        assert_eq!(found.attributes.file_size, 2);
        assert_eq!(store.list_directory_entries(&dir, "", false, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let store = SqliteStore::open_memory().unwrap();
        let dir = path("/media");

        assert!(matches!(
            store.update_entry(&dir, &chunked_file("a", 1)).await,
            Err(StoreError::NotFound(_))
        ));

        store.insert_entry(&dir, &chunked_file("a", 1)).await.unwrap();
        store.update_entry(&dir, &chunked_file("a", 5)).await.unwrap();
        let found = store.find_entry(&path("/media/a")).await.unwrap().unwrap();
        assert_eq!(found.attributes.file_size, 5);
    }

    #[tokio::test]
    async fn test_delete_folder_children_respects_boundaries() {
        let store = SqliteStore::open_memory().unwrap();
        store.insert_entry(&path("/a_b"), &Entry::file("x")).await.unwrap();
        store.insert_entry(&path("/a"), &Entry::file("y")).await.unwrap();
        store.insert_entry(&path("/a/deep"), &Entry::file("z")).await.unwrap();
        store.insert_entry(&path("/ab"), &Entry::file("w")).await.unwrap();

        store.delete_folder_children(&path("/a")).await.unwrap();

        assert!(store.find_entry(&path("/a/y")).await.unwrap().is_none());
        assert!(store.find_entry(&path("/a/deep/z")).await.unwrap().is_none());
        assert!(store.find_entry(&path("/a_b/x")).await.unwrap().is_some());
        assert!(store.find_entry(&path("/ab/w")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_pages() {
        let store = SqliteStore::open_memory().unwrap();
        let dir = path("/logs");
        for i in 0..5 {
            store
                .insert_entry(&dir, &Entry::file(format!("log-{}", i)))
                .await
                .unwrap();
        }

        let page = store.list_directory_entries(&dir, "log-1", false, 2).await.unwrap();
        let names: Vec<_> = page.into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["log-2", "log-3"]);
    }

    #[tokio::test]
    async fn test_offsets_and_signature_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("filer.db");
        let peer = PeerAddress::from("filer-c:8888");

        let signature = {
            let store = SqliteStore::open(&db).unwrap();
            store.write_offset(&peer, TsNs(123_456)).await.unwrap();
            load_or_create_signature(&store).await.unwrap()
        };

        let store = SqliteStore::open(&db).unwrap();
        assert_eq!(store.read_offset(&peer).await.unwrap(), Some(TsNs(123_456)));
        assert_eq!(load_or_create_signature(&store).await.unwrap(), signature);
    }

    #[test]
    fn test_descendants_pattern_escapes() {
        assert_eq!(descendants_pattern(&path("/a_b")), "/a\\_b/%");
        assert_eq!(descendants_pattern(&FullPath::root()), "/%");
    }

    #[tokio::test]
    async fn test_upsert_rewrites_directory_column() {
        let store = SqliteStore::open_memory().unwrap();
        let dir = path("/a");
        store.insert_entry(&dir, &chunked_file("f", 1)).await.unwrap();

        // Same key, different directory text, as after a dirhash collision.
        store
            .run(|conn| {
                conn.execute("UPDATE filemeta SET directory = '/stale'", [])?;
                Ok(())
            })
            .await
            .unwrap();

        store.insert_entry(&dir, &chunked_file("f", 2)).await.unwrap();
        let directory: String = store
            .run(|conn| {
                Ok(conn.query_row("SELECT directory FROM filemeta", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(directory, "/a");

        store.delete_folder_children(&dir).await.unwrap();
        assert!(store.find_entry(&path("/a/f")).await.unwrap().is_none());
    }
}
