//! Durable stream store for serialized indices.
//!
//! Streams are addressed by a string key and guarded by a checksum: a read
//! only returns data when the stored checksum equals the requested one.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::checksum::Checksum;
use crate::error::Result;

pub trait PersistentStorage: Send + Sync {
    /// Data stored under `key`, if its checksum matches.
    fn read_stream(&self, key: &str, checksum: &Checksum) -> Result<Option<Vec<u8>>>;

    /// Replaces whatever is stored under `key`. Returns false when the store
    /// does not persist anything.
    fn write_stream(&self, key: &str, checksum: &Checksum, data: &[u8]) -> Result<bool>;
}

/// Storage for sessions without persistence. Every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpStorage;

impl PersistentStorage for NoOpStorage {
    fn read_stream(&self, _key: &str, _checksum: &Checksum) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn write_stream(&self, _key: &str, _checksum: &Checksum, _data: &[u8]) -> Result<bool> {
        Ok(false)
    }
}

pub struct SqliteStorage {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStorage {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|conn| conn.execute_batch(PRAGMAS));
        let pool = Pool::builder().build(manager)?;
        let storage = Self { pool };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Each in-memory connection is its own database, so the pool holds one.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| conn.execute_batch(PRAGMAS));
        let pool = Pool::builder().max_size(1).build(manager)?;
        let storage = Self { pool };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS streams (
                key TEXT PRIMARY KEY,
                checksum BLOB NOT NULL,
                data BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn stream_count(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM streams", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Total size of stored payloads in bytes.
    pub fn total_bytes(&self) -> Result<u64> {
        let conn = self.pool.get()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(data)), 0) FROM streams",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    pub fn remove_stream(&self, key: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        let removed = conn.execute("DELETE FROM streams WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM streams", [])?;
        Ok(())
    }
}

/// - WAL mode: readers proceed while a stream is being written
/// - NORMAL synchronous: durable enough for a rebuildable cache
const PRAGMAS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA cache_size = -64000;
    PRAGMA temp_store = MEMORY;
"#;

impl PersistentStorage for SqliteStorage {
    fn read_stream(&self, key: &str, checksum: &Checksum) -> Result<Option<Vec<u8>>> {
        let conn = self.pool.get()?;
        let row: Option<(Vec<u8>, Vec<u8>)> = conn
            .query_row(
                "SELECT checksum, data FROM streams WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(stored, data)| {
            (stored.as_slice() == checksum.as_bytes().as_slice()).then_some(data)
        }))
    }

    fn write_stream(&self, key: &str, checksum: &Checksum, data: &[u8]) -> Result<bool> {
        let conn = self.pool.get()?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        conn.execute(
            "INSERT OR REPLACE INTO streams (key, checksum, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![key, checksum.as_bytes().as_slice(), data, now],
        )?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_requires_matching_checksum() {
        let storage = SqliteStorage::in_memory().unwrap();
        let checksum = Checksum::create(b"v1");

        assert!(storage.write_stream("key", &checksum, b"payload").unwrap());
        assert_eq!(
            storage.read_stream("key", &checksum).unwrap(),
            Some(b"payload".to_vec())
        );
        assert_eq!(
            storage.read_stream("key", &Checksum::create(b"v2")).unwrap(),
            None
        );
        assert_eq!(storage.read_stream("other", &checksum).unwrap(), None);
    }

    #[test]
    fn test_write_replaces_previous_stream() {
        let storage = SqliteStorage::in_memory().unwrap();
        let old = Checksum::create(b"old");
        let new = Checksum::create(b"new");

        storage.write_stream("key", &old, b"first").unwrap();
        storage.write_stream("key", &new, b"second").unwrap();

        assert_eq!(storage.stream_count().unwrap(), 1);
        assert_eq!(storage.read_stream("key", &old).unwrap(), None);
        assert_eq!(
            storage.read_stream("key", &new).unwrap(),
            Some(b"second".to_vec())
        );
        assert_eq!(storage.total_bytes().unwrap(), 6);
    }

    #[test]
    fn test_streams_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("streams.db");
        let checksum = Checksum::create(b"data");

        {
            let storage = SqliteStorage::new(&path).unwrap();
            storage.write_stream("key", &checksum, b"kept").unwrap();
        }

        let storage = SqliteStorage::new(&path).unwrap();
        assert_eq!(
            storage.read_stream("key", &checksum).unwrap(),
            Some(b"kept".to_vec())
        );
        assert!(storage.remove_stream("key").unwrap());
        assert_eq!(storage.stream_count().unwrap(), 0);
    }

    #[test]
    fn test_noop_storage_always_misses() {
        let storage = NoOpStorage;
        let checksum = Checksum::create(b"x");
        assert!(!storage.write_stream("key", &checksum, b"data").unwrap());
        assert_eq!(storage.read_stream("key", &checksum).unwrap(), None);
    }
}
