#![allow(missing_docs)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::{tempdir, TempDir};
use verso::access::{Database, DatabaseConfiguration, NodeRead, ResourceConfiguration, Session};
use verso::page::{IndirectPage, Page, PageReference, UberPage};
use verso::primitives::handler::Pipeline;
use verso::primitives::io::{FileIo, StdFileIo};
use verso::storage::{BeaconLatch, FileReader, FileWriter, Reader, Storage, StorageKind, Writer};
use verso::types::{Result, VersoError};

/// Forwards to a real file but can be told to fail every beacon write.
struct BeaconFault {
    inner: StdFileIo,
    armed: AtomicBool,
}

impl FileIo for BeaconFault {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.inner.read_at(off, dst)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        if off == 0 && self.armed.load(Ordering::SeqCst) {
            return Err(VersoError::Io(io::Error::other("power cut before the beacon")));
        }
        self.inner.write_at(off, src)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.truncate(len)
    }
}

fn uber(revision: u32) -> Page {
    Page::Uber(UberPage::new(revision, revision + 1, 0, PageReference::new()))
}

fn published_revision(reader: &mut dyn Reader) -> Result<u32> {
    let mut first = reader.read_first_reference()?;
    Ok(first.take_page().map(|p| p.revision()).unwrap_or(u32::MAX))
}

#[test]
fn failed_beacon_write_keeps_the_previous_uber_page() -> Result<()> {
    let dir = tempdir()?;
    let io = Arc::new(BeaconFault {
        inner: StdFileIo::open_rw(dir.path().join("resource.data"))?,
        armed: AtomicBool::new(false),
    });
    let pipeline = Arc::new(Pipeline::identity());
    let latch = BeaconLatch::default();
    let mut writer = FileWriter::new(io.clone(), pipeline.clone(), latch.clone())?;
    let mut reader = FileReader::new(io.clone(), pipeline, latch);

    writer.write(&Page::Indirect(IndirectPage::new(0)))?;
    let first = writer.write(&uber(0))?;
    writer.write_first_reference(first)?;
    assert_eq!(published_revision(&mut reader)?, 0);

    io.armed.store(true, Ordering::SeqCst);
    writer.write(&Page::Indirect(IndirectPage::new(1)))?;
    let second = writer.write(&uber(1))?;
    assert!(writer.write_first_reference(second).is_err());
    assert_eq!(published_revision(&mut reader)?, 0);
    assert!(matches!(reader.read(second)?, Page::Uber(_)));

    io.armed.store(false, Ordering::SeqCst);
    writer.write_first_reference(second)?;
    assert_eq!(published_revision(&mut reader)?, 1);
    Ok(())
}

fn resource(storage: StorageKind) -> Result<(TempDir, Database, Session)> {
    let dir = tempdir()?;
    let db_config = DatabaseConfiguration::new(dir.path().join("db"))?;
    assert!(Database::create(&db_config)?);
    let db = Database::open(db_config.file())?;
    assert!(db.create_resource(ResourceConfiguration::new("doc").storage(storage))?);
    let session = db.open_session("doc")?;
    Ok((dir, db, session))
}

fn abandoned_transaction_publishes_nothing(storage: StorageKind) -> Result<()> {
    let (_dir, _db, session) = resource(storage)?;
    let size_before = session.storage().size_on_disk()?;

    let mut wtx = session.begin_write_trx()?;
    wtx.insert_element_as_first_child("draft")?;
    wtx.insert_attribute("state", "unsaved")?;
    drop(wtx);

    assert_eq!(session.most_recent_revision()?, 0);
    let mut rtx = session.begin_read_trx(None)?;
    assert!(!rtx.move_to_first_child()?);
    assert!(session.storage().size_on_disk()? >= size_before);

    let mut wtx = session.begin_write_trx()?;
    wtx.insert_element_as_first_child("kept")?;
    assert_eq!(wtx.commit()?, 1);
    wtx.close()?;

    let mut rtx = session.begin_read_trx(None)?;
    assert!(rtx.move_to_first_child()?);
    assert_eq!(rtx.name().as_deref(), Some("kept"));
    Ok(())
}

#[test]
fn abandoned_transaction_publishes_nothing_on_file_storage() -> Result<()> {
    abandoned_transaction_publishes_nothing(StorageKind::File)
}

#[test]
fn abandoned_transaction_publishes_nothing_on_kv_storage() -> Result<()> {
    abandoned_transaction_publishes_nothing(StorageKind::Kv)
}

fn pages_without_publish_are_invisible(storage: StorageKind) -> Result<()> {
    let (_dir, _db, session) = resource(storage)?;
    let before = {
        let mut reader = session.storage().reader()?;
        published_revision(reader.as_mut())?
    };
    {
        let mut writer = session.storage().writer()?;
        writer.write(&Page::Indirect(IndirectPage::new(7)))?;
        writer.write(&uber(7))?;
        writer.close()?;
    }
    let mut reader = session.storage().reader()?;
    assert_eq!(published_revision(reader.as_mut())?, before);
    assert_eq!(session.most_recent_revision()?, 0);
    Ok(())
}

#[test]
fn file_pages_without_publish_are_invisible() -> Result<()> {
    pages_without_publish_are_invisible(StorageKind::File)
}

#[test]
fn kv_pages_without_publish_are_invisible() -> Result<()> {
    pages_without_publish_are_invisible(StorageKind::Kv)
}
