//! Tier-2 store of the transaction log: an on-disk SQLite table that never
//! evicts and lives only as long as its write transaction.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::PageContainer;
use crate::types::{Result, VersoError};

/// Writes between two explicit syncs of the side store.
pub const FLUSH_AFTER: u64 = 10_000;
const DB_FILE: &str = "log.db";

struct Store {
    conn: Connection,
    writes: u64,
}

/// Persistent, non-evicting page-container store rooted at a place directory.
pub struct PersistentCache {
    place: PathBuf,
    store: Mutex<Option<Store>>,
}

impl PersistentCache {
    /// Creates a fresh store at `place`, discarding leftovers of an earlier
    /// crashed transaction.
    pub fn open(place: impl Into<PathBuf>) -> Result<Self> {
        let place = place.into();
        if place.exists() {
            debug!(place = %place.display(), "log.tier2.discard_stale");
            fs::remove_dir_all(&place)?;
        }
        fs::create_dir_all(&place)?;
        let conn = Connection::open(place.join(DB_FILE))?;
        conn.pragma_update(None, "journal_mode", "OFF")?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.execute(
            "CREATE TABLE entries (
                key INTEGER PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )?;
        conn.execute_batch("BEGIN")?;
        Ok(Self {
            place,
            store: Mutex::new(Some(Store { conn, writes: 0 })),
        })
    }

    /// Directory backing this store.
    pub fn place(&self) -> &Path {
        &self.place
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut Store) -> Result<T>) -> Result<T> {
        let mut guard = self.store.lock();
        let store = guard
            .as_mut()
            .ok_or(VersoError::Invalid("transaction log already closed"))?;
        f(store)
    }

    /// Inserts or replaces the container stored under `key`.
    pub fn put(&self, key: u64, container: &PageContainer) -> Result<()> {
        let bytes = container.encode()?;
        self.with_store(|store| {
            store.conn.execute(
                "INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)",
                params![key as i64, bytes],
            )?;
            store.writes += 1;
            if store.writes % FLUSH_AFTER == 0 {
                store.conn.execute_batch("COMMIT; BEGIN")?;
                debug!(writes = store.writes, "log.tier2.sync");
            }
            Ok(())
        })
    }

    /// Stores every container of `entries`.
    pub fn put_all<'a>(&self, entries: impl IntoIterator<Item = (u64, &'a PageContainer)>) -> Result<()> {
        for (key, container) in entries {
            self.put(key, container)?;
        }
        Ok(())
    }

    /// Container stored under `key`.
    pub fn get(&self, key: u64) -> Result<Option<PageContainer>> {
        let raw: Option<Vec<u8>> = self.with_store(|store| {
            Ok(store
                .conn
                .query_row(
                    "SELECT value FROM entries WHERE key = ?1",
                    params![key as i64],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        raw.map(|bytes| PageContainer::decode(&bytes)).transpose()
    }

    /// Deletes the container stored under `key`.
    pub fn remove(&self, key: u64) -> Result<()> {
        self.with_store(|store| {
            store
                .conn
                .execute("DELETE FROM entries WHERE key = ?1", params![key as i64])?;
            Ok(())
        })
    }

    /// Deletes every container.
    pub fn clear(&self) -> Result<()> {
        self.with_store(|store| {
            store.conn.execute("DELETE FROM entries", [])?;
            Ok(())
        })
    }

    /// Number of stored containers.
    pub fn len(&self) -> Result<u64> {
        self.with_store(|store| {
            let count: i64 = store
                .conn
                .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Closes the store and deletes its directory. Idempotent.
    pub fn close(&self) -> Result<()> {
        let store = self.store.lock().take();
        if store.is_none() {
            return Ok(());
        }
        drop(store);
        if self.place.exists() {
            fs::remove_dir_all(&self.place)?;
        }
        debug!(place = %self.place.display(), "log.tier2.closed");
        Ok(())
    }
}

impl Drop for PersistentCache {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(error = %err, "log.tier2.close_failed");
        }
    }
}

impl std::fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("place", &self.place)
            .finish()
    }
}
