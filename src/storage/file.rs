//! Append-only single-file backend.
//!
//! Layout: an 8-byte big-endian beacon at offset 0 holding the storage key
//! of the current uber page, followed by records `len: u32 BE` + pipeline
//! bytes. A record's storage key is its file offset. Only the beacon is ever
//! overwritten.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{Reader, Storage, StorageKind, Writer};
use crate::page::{self, Page, PageReference};
use crate::primitives::handler::Pipeline;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{Result, VersoError};

/// Size of the beacon at the head of the data file.
pub const BEACON_LEN: u64 = 8;
const LEN_PREFIX: u64 = 4;
const DATA_FILE: &str = "resource.data";

/// Serialises beacon reads against beacon rewrites within one process.
#[derive(Clone, Debug, Default)]
pub struct BeaconLatch(Arc<RwLock<()>>);

fn read_beacon(io: &dyn FileIo, latch: &BeaconLatch) -> Result<Option<u64>> {
    let _guard = latch.0.read();
    if io.len()? < BEACON_LEN {
        return Ok(None);
    }
    let mut raw = [0u8; BEACON_LEN as usize];
    io.read_at(0, &mut raw)?;
    match i64::from_be_bytes(raw) {
        0 => Ok(None),
        key if key >= BEACON_LEN as i64 => Ok(Some(key as u64)),
        _ => Err(VersoError::corrupt("beacon points into the file header")),
    }
}

fn read_record(io: &dyn FileIo, pipeline: &Pipeline, key: u64) -> Result<Page> {
    if key < BEACON_LEN {
        return Err(VersoError::corrupt(format!("storage key {key} inside file header")));
    }
    let mut len = [0u8; LEN_PREFIX as usize];
    io.read_at(key, &mut len)?;
    let len = u32::from_be_bytes(len) as u64;
    if key + LEN_PREFIX + len > io.len()? {
        return Err(VersoError::corrupt(format!(
            "record at {key} extends past end of file"
        )));
    }
    let mut raw = vec![0u8; len as usize];
    io.read_at(key + LEN_PREFIX, &mut raw)?;
    page::deserialize(&pipeline.deserialize(raw)?)
}

fn first_reference(io: &dyn FileIo, pipeline: &Pipeline, latch: &BeaconLatch) -> Result<PageReference> {
    let key = read_beacon(io, latch)?.ok_or_else(|| {
        VersoError::Io(io::Error::new(ErrorKind::NotFound, "no revision published"))
    })?;
    let page = read_record(io, pipeline, key)?;
    page.as_uber()?;
    Ok(PageReference::resolved(key, page))
}

/// File backend factory.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    pipeline: Arc<Pipeline>,
    latch: BeaconLatch,
}

impl FileStorage {
    /// Backend storing its data file inside `dir`.
    pub fn new(dir: &Path, pipeline: Arc<Pipeline>) -> Self {
        Self {
            path: dir.join(DATA_FILE),
            pipeline,
            latch: BeaconLatch::default(),
        }
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn reader(&self) -> Result<Box<dyn Reader>> {
        let io = StdFileIo::open_read(&self.path)?;
        Ok(Box::new(FileReader::new(
            Arc::new(io),
            self.pipeline.clone(),
            self.latch.clone(),
        )))
    }

    fn writer(&self) -> Result<Box<dyn Writer>> {
        let io = StdFileIo::open_rw(&self.path)?;
        Ok(Box::new(FileWriter::new(
            Arc::new(io),
            self.pipeline.clone(),
            self.latch.clone(),
        )?))
    }

    fn exists(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let io = StdFileIo::open_read(&self.path)?;
        Ok(read_beacon(&io, &self.latch)?.is_some())
    }

    fn clear_persistent(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn kind(&self) -> StorageKind {
        StorageKind::File
    }

    fn size_on_disk(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

/// Positioned reader over the data file.
pub struct FileReader {
    io: Arc<dyn FileIo>,
    pipeline: Arc<Pipeline>,
    latch: BeaconLatch,
}

impl FileReader {
    /// Reader over `io`.
    pub fn new(io: Arc<dyn FileIo>, pipeline: Arc<Pipeline>, latch: BeaconLatch) -> Self {
        Self { io, pipeline, latch }
    }
}

impl Reader for FileReader {
    fn read_first_reference(&mut self) -> Result<PageReference> {
        first_reference(self.io.as_ref(), &self.pipeline, &self.latch)
    }

    fn read(&mut self, key: u64) -> Result<Page> {
        read_record(self.io.as_ref(), &self.pipeline, key)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appending writer over the data file.
pub struct FileWriter {
    io: Arc<dyn FileIo>,
    pipeline: Arc<Pipeline>,
    latch: BeaconLatch,
    end: u64,
    published: u64,
}

impl FileWriter {
    /// Writer appending to `io`; reserves the beacon of an empty file.
    pub fn new(io: Arc<dyn FileIo>, pipeline: Arc<Pipeline>, latch: BeaconLatch) -> Result<Self> {
        let len = io.len()?;
        if len < BEACON_LEN {
            io.write_at(0, &[0u8; BEACON_LEN as usize])?;
        }
        let end = len.max(BEACON_LEN);
        Ok(Self {
            io,
            pipeline,
            latch,
            end,
            published: end,
        })
    }
}

impl Reader for FileWriter {
    fn read_first_reference(&mut self) -> Result<PageReference> {
        first_reference(self.io.as_ref(), &self.pipeline, &self.latch)
    }

    fn read(&mut self, key: u64) -> Result<Page> {
        read_record(self.io.as_ref(), &self.pipeline, key)
    }

    fn close(&mut self) -> Result<()> {
        self.io.sync_all()
    }
}

impl Writer for FileWriter {
    fn write(&mut self, page: &Page) -> Result<u64> {
        let bytes = self.pipeline.serialize(page::serialize(page))?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| VersoError::Invalid("page record exceeds 4 GiB"))?;
        let mut record = Vec::with_capacity(LEN_PREFIX as usize + bytes.len());
        record.extend_from_slice(&len.to_be_bytes());
        record.extend_from_slice(&bytes);
        let key = self.end;
        self.io.write_at(key, &record)?;
        self.end += record.len() as u64;
        Ok(key)
    }

    fn write_first_reference(&mut self, key: u64) -> Result<()> {
        self.io.sync_all()?;
        {
            let _guard = self.latch.0.write();
            self.io.write_at(0, &(key as i64).to_be_bytes())?;
        }
        self.io.sync_all()?;
        self.published = self.end;
        debug!(key, "storage.file.beacon_published");
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        // Records past the last publish are unreachable from the beacon.
        if self.io.len()? > self.published {
            self.io.truncate(self.published)?;
            debug!(from = self.end, to = self.published, "storage.file.aborted");
        }
        self.end = self.published;
        Ok(())
    }
}
