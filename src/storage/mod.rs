#![forbid(unsafe_code)]
//! Persistent page stores.
//!
//! A store keeps immutable serialized pages under storage keys plus one
//! mutable slot, the first reference, naming the current uber page.
//! Publishing a new first reference is the single commit point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::page::{Page, PageReference};
use crate::primitives::handler::Pipeline;
use crate::types::Result;

mod file;
mod kv;

pub use file::{BeaconLatch, FileReader, FileStorage, FileWriter, BEACON_LEN};
pub use kv::{KvReader, KvStorage, KvWriter};

/// Backend selected by a resource configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Append-only data file with a beacon at offset 0.
    File,
    /// Embedded SQLite key-value table.
    Kv,
}

impl StorageKind {
    /// Name used in reports and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::File => "file",
            StorageKind::Kv => "kv",
        }
    }
}

/// Read access to persisted pages.
pub trait Reader: Send {
    /// Reads the published uber page. Fails when nothing was published yet.
    fn read_first_reference(&mut self) -> Result<PageReference>;
    /// Reads the page stored under `key`.
    fn read(&mut self, key: u64) -> Result<Page>;
    /// Releases backend handles.
    fn close(&mut self) -> Result<()>;
}

/// Append access to persisted pages.
pub trait Writer: Reader {
    /// Persists `page` and returns its new storage key.
    fn write(&mut self, page: &Page) -> Result<u64>;
    /// Durably publishes `key` as the first reference.
    fn write_first_reference(&mut self, key: u64) -> Result<()>;
    /// Discards every page written since the last publish.
    fn abort(&mut self) -> Result<()>;
}

/// Factory for readers and writers of one resource.
pub trait Storage: Send + Sync {
    /// Opens an independent reader.
    fn reader(&self) -> Result<Box<dyn Reader>>;
    /// Opens the writer.
    fn writer(&self) -> Result<Box<dyn Writer>>;
    /// True when a first reference has been published.
    fn exists(&self) -> Result<bool>;
    /// Deletes all persisted data.
    fn clear_persistent(&self) -> Result<()>;
    /// Backend kind.
    fn kind(&self) -> StorageKind;
    /// Bytes occupied on disk.
    fn size_on_disk(&self) -> Result<u64>;
}

/// Directory holding a resource's backend files.
pub fn data_dir(resource_dir: &Path) -> PathBuf {
    resource_dir.join(crate::access::ResourcePaths::Data.file_name())
}

/// Opens the backend `kind` inside `resource_dir`.
pub fn open(kind: StorageKind, resource_dir: &Path, pipeline: Pipeline) -> Result<Arc<dyn Storage>> {
    let dir = data_dir(resource_dir);
    std::fs::create_dir_all(&dir)?;
    let pipeline = Arc::new(pipeline);
    debug!(kind = kind.as_str(), dir = %dir.display(), handlers = pipeline.len(), "storage.open");
    Ok(match kind {
        StorageKind::File => Arc::new(FileStorage::new(&dir, pipeline)),
        StorageKind::Kv => Arc::new(KvStorage::new(&dir, pipeline)),
    })
}
