//! Embedded key-value backend on SQLite.
//!
//! Pages live in `pages(key INTEGER PRIMARY KEY, value BLOB)`; key `-1`
//! holds the first reference. A writer keeps one open transaction and
//! commits it when the first reference is published, so unpublished pages
//! vanish with the writer.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{Reader, Storage, StorageKind, Writer};
use crate::page::{self, Page, PageReference};
use crate::primitives::handler::Pipeline;
use crate::types::{Result, VersoError};

const DATA_FILE: &str = "resource.kv";
const FIRST_REFERENCE_KEY: i64 = -1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pages (
            key INTEGER PRIMARY KEY,
            value BLOB NOT NULL
        )",
        [],
    )?;
    Ok(conn)
}

fn read_value(conn: &Connection, key: i64) -> Result<Option<Vec<u8>>> {
    Ok(conn
        .query_row("SELECT value FROM pages WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?)
}

fn read_page(conn: &Connection, pipeline: &Pipeline, key: u64) -> Result<Page> {
    let raw = read_value(conn, key as i64)?
        .ok_or_else(|| VersoError::corrupt(format!("no page stored under key {key}")))?;
    page::deserialize(&pipeline.deserialize(raw)?)
}

fn first_reference(conn: &Connection, pipeline: &Pipeline) -> Result<PageReference> {
    let raw = read_value(conn, FIRST_REFERENCE_KEY)?.ok_or_else(|| {
        VersoError::Io(io::Error::new(ErrorKind::NotFound, "no revision published"))
    })?;
    let raw: [u8; 8] = raw
        .as_slice()
        .try_into()
        .map_err(|_| VersoError::corrupt("first reference is not 8 bytes"))?;
    let key = u64::try_from(i64::from_be_bytes(raw))
        .map_err(|_| VersoError::corrupt("negative first reference"))?;
    let page = read_page(conn, pipeline, key)?;
    page.as_uber()?;
    Ok(PageReference::resolved(key, page))
}

/// SQLite backend factory.
#[derive(Debug)]
pub struct KvStorage {
    path: PathBuf,
    pipeline: Arc<Pipeline>,
}

impl KvStorage {
    /// Backend storing its database inside `dir`.
    pub fn new(dir: &Path, pipeline: Arc<Pipeline>) -> Self {
        Self {
            path: dir.join(DATA_FILE),
            pipeline,
        }
    }

    fn files(&self) -> [PathBuf; 3] {
        let mut wal = self.path.clone().into_os_string();
        wal.push("-wal");
        let mut shm = self.path.clone().into_os_string();
        shm.push("-shm");
        [self.path.clone(), wal.into(), shm.into()]
    }
}

impl Storage for KvStorage {
    fn reader(&self) -> Result<Box<dyn Reader>> {
        Ok(Box::new(KvReader {
            conn: open_connection(&self.path)?,
            pipeline: self.pipeline.clone(),
        }))
    }

    fn writer(&self) -> Result<Box<dyn Writer>> {
        Ok(Box::new(KvWriter::new(
            open_connection(&self.path)?,
            self.pipeline.clone(),
        )?))
    }

    fn exists(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let conn = open_connection(&self.path)?;
        Ok(read_value(&conn, FIRST_REFERENCE_KEY)?.is_some())
    }

    fn clear_persistent(&self) -> Result<()> {
        for file in self.files() {
            match fs::remove_file(&file) {
                Err(err) if err.kind() != ErrorKind::NotFound => return Err(err.into()),
                _ => {}
            }
        }
        Ok(())
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Kv
    }

    fn size_on_disk(&self) -> Result<u64> {
        let mut total = 0;
        for file in self.files() {
            match fs::metadata(&file) {
                Ok(meta) => total += meta.len(),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(total)
    }
}

/// Reader with its own SQLite connection.
pub struct KvReader {
    conn: Connection,
    pipeline: Arc<Pipeline>,
}

impl Reader for KvReader {
    fn read_first_reference(&mut self) -> Result<PageReference> {
        first_reference(&self.conn, &self.pipeline)
    }

    fn read(&mut self, key: u64) -> Result<Page> {
        read_page(&self.conn, &self.pipeline, key)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn next_free_key(conn: &Connection) -> Result<u64> {
    let max: i64 = conn.query_row("SELECT COALESCE(MAX(key), 0) FROM pages", [], |row| {
        row.get(0)
    })?;
    Ok(max.max(0) as u64 + 1)
}

/// Writer holding one deferred transaction until publish.
pub struct KvWriter {
    conn: Connection,
    pipeline: Arc<Pipeline>,
    next_key: u64,
    in_txn: bool,
}

impl KvWriter {
    fn new(conn: Connection, pipeline: Arc<Pipeline>) -> Result<Self> {
        let next_key = next_free_key(&conn)?;
        Ok(Self {
            conn,
            pipeline,
            next_key,
            in_txn: false,
        })
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_txn {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_txn = true;
        }
        Ok(())
    }
}

impl Reader for KvWriter {
    fn read_first_reference(&mut self) -> Result<PageReference> {
        first_reference(&self.conn, &self.pipeline)
    }

    fn read(&mut self, key: u64) -> Result<Page> {
        read_page(&self.conn, &self.pipeline, key)
    }

    fn close(&mut self) -> Result<()> {
        if self.in_txn {
            self.in_txn = false;
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

impl Writer for KvWriter {
    fn write(&mut self, page: &Page) -> Result<u64> {
        let bytes = self.pipeline.serialize(page::serialize(page))?;
        self.begin()?;
        let key = self.next_key;
        self.conn.execute(
            "INSERT INTO pages (key, value) VALUES (?1, ?2)",
            params![key as i64, bytes],
        )?;
        self.next_key += 1;
        Ok(key)
    }

    fn write_first_reference(&mut self, key: u64) -> Result<()> {
        self.begin()?;
        self.conn.execute(
            "INSERT OR REPLACE INTO pages (key, value) VALUES (?1, ?2)",
            params![FIRST_REFERENCE_KEY, (key as i64).to_be_bytes().to_vec()],
        )?;
        self.conn.execute_batch("COMMIT")?;
        self.in_txn = false;
        debug!(key, "storage.kv.first_reference_published");
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        if self.in_txn {
            Reader::close(self)?;
            self.next_key = next_free_key(&self.conn)?;
            debug!(next_key = self.next_key, "storage.kv.aborted");
        }
        Ok(())
    }
}

impl Drop for KvWriter {
    fn drop(&mut self) {
        if let Err(err) = Reader::close(self) {
            debug!(error = %err, "storage.kv.rollback_failed");
        }
    }
}
