//! Per-resource session: the factory for read and write transactions.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::config::{ResourceConfiguration, ResourcePaths};
use super::node_trx::NodeReadTrx;
use super::node_write_trx::NodeWriteTrx;
use super::page_read_trx::PageReadTrx;
use super::page_write_trx::PageWriteTrx;
use super::path_summary::PathSummary;
use crate::primitives::handler::{KeyMaterial, Pipeline};
use crate::storage::{self, Storage};
use crate::types::{Result, VersoError};

struct ResourceInner {
    config: Arc<ResourceConfiguration>,
    storage: Arc<dyn Storage>,
    resource_dir: PathBuf,
    writer_active: Arc<AtomicBool>,
}

/// Releases the resource's writer slot when dropped.
pub(crate) struct WriterPermit(Arc<AtomicBool>);

impl WriterPermit {
    pub(crate) fn claim(slot: &Arc<AtomicBool>) -> Result<Self> {
        slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| VersoError::Invalid("writer already active"))?;
        Ok(Self(slot.clone()))
    }
}

impl Drop for WriterPermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle on one resource. Cheap to clone and shareable across threads;
/// any number of readers, at most one writer.
#[derive(Clone)]
pub struct Session {
    inner: Arc<ResourceInner>,
}

impl Session {
    pub(crate) fn open(
        resource_dir: PathBuf,
        config: ResourceConfiguration,
        key: Option<&KeyMaterial>,
    ) -> Result<Self> {
        let pipeline = Pipeline::new(&config.byte_handlers, key)?;
        let storage = storage::open(config.storage, &resource_dir, pipeline)?;
        debug!(resource = %config.name, "session.open");
        Ok(Self {
            inner: Arc::new(ResourceInner {
                config: Arc::new(config),
                storage,
                resource_dir,
                writer_active: Arc::new(AtomicBool::new(false)),
            }),
        })
    }

    /// Settings the resource was created with.
    pub fn config(&self) -> &ResourceConfiguration {
        &self.inner.config
    }

    /// Resource directory.
    pub fn resource_dir(&self) -> &Path {
        &self.inner.resource_dir
    }

    /// Storage backend of the resource.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    /// Number of the latest published revision.
    pub fn most_recent_revision(&self) -> Result<u32> {
        let mut reader = self.inner.storage.reader()?;
        let uber = reader
            .read_first_reference()?
            .take_page()
            .ok_or_else(|| VersoError::corrupt("first reference without page"))?
            .into_uber()?;
        reader.close()?;
        Ok(uber.revision())
    }

    /// Page-level read transaction on `revision` (latest when `None`).
    pub fn begin_page_read_trx(&self, revision: Option<u32>) -> Result<PageReadTrx> {
        let config = &self.inner.config;
        PageReadTrx::open(
            self.inner.storage.reader()?,
            revision,
            config.page_cache_capacity,
            config.window(),
        )
    }

    /// Node-level read transaction on `revision` (latest when `None`).
    pub fn begin_read_trx(&self, revision: Option<u32>) -> Result<NodeReadTrx> {
        NodeReadTrx::new(self.begin_page_read_trx(revision)?)
    }

    /// The resource's write transaction. Fails with `Invalid` while another
    /// one is open.
    pub fn begin_write_trx(&self) -> Result<NodeWriteTrx> {
        let permit = WriterPermit::claim(&self.inner.writer_active)?;
        let page = PageWriteTrx::begin(
            self.inner.storage.as_ref(),
            self.inner.config.clone(),
            self.inner
                .resource_dir
                .join(ResourcePaths::TransactionLog.file_name()),
        )?;
        NodeWriteTrx::new(page, permit)
    }

    /// Path-summary cursor for `revision` (latest when `None`).
    pub fn open_path_summary(&self, revision: Option<u32>) -> Result<PathSummary<PageReadTrx>> {
        PathSummary::new(self.begin_page_read_trx(revision)?)
    }
}
