#![forbid(unsafe_code)]
//! Caches that hold dirty pages while a write transaction is open.

mod log;
mod persistent;

pub use log::{LogType, TransactionLogCache};
pub use persistent::{PersistentCache, FLUSH_AFTER};

use crate::page::{self, Page};
use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::{Result, VersoError};

/// Before/after image of one page inside a write transaction.
///
/// `complete` is the full reconstruction including every modification so
/// far; `modified` is exactly what the commit will persist.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct PageContainer {
    images: Option<(Page, Page)>,
}

impl PageContainer {
    /// Container holding both images.
    pub fn new(complete: Page, modified: Page) -> Self {
        Self {
            images: Some((complete, modified)),
        }
    }

    /// The "nothing cached" sentinel.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True for the sentinel.
    pub fn is_empty(&self) -> bool {
        self.images.is_none()
    }

    /// Full reconstruction.
    pub fn complete(&self) -> Option<&Page> {
        self.images.as_ref().map(|(complete, _)| complete)
    }

    /// Page that will be persisted.
    pub fn modified(&self) -> Option<&Page> {
        self.images.as_ref().map(|(_, modified)| modified)
    }

    /// Both images, mutably.
    pub fn images_mut(&mut self) -> Option<(&mut Page, &mut Page)> {
        self.images
            .as_mut()
            .map(|(complete, modified)| (complete, modified))
    }

    /// Consumes the container, yielding the page to persist.
    pub fn into_modified(self) -> Option<Page> {
        self.images.map(|(_, modified)| modified)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let (complete, modified) = self
            .images
            .as_ref()
            .ok_or(VersoError::Invalid("cannot persist the empty container"))?;
        let mut out = Vec::new();
        be::put_bytes(&mut out, &page::serialize(complete));
        be::put_bytes(&mut out, &page::serialize(modified));
        Ok(out)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let complete = page::deserialize(cur.read_bytes()?)?;
        let modified = page::deserialize(cur.read_bytes()?)?;
        cur.finish()?;
        Ok(Self::new(complete, modified))
    }
}
