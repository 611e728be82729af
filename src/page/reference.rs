use std::convert::TryFrom;

use super::{Page, PageKind};
use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::{Result, VersoError};

/// Lazily resolved pointer to a page.
///
/// While a page is dirty inside a write transaction it is owned inline
/// (`page`) or parked in the transaction log under `log_key`; once flushed
/// only the storage `key` remains and is authoritative.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageReference {
    key: Option<u64>,
    page: Option<Box<Page>>,
    kind: Option<PageKind>,
    log_key: Option<u64>,
}

impl PageReference {
    /// An unset reference.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference to an already persisted page.
    pub fn persisted(key: u64, kind: PageKind) -> Self {
        Self {
            key: Some(key),
            page: None,
            kind: Some(kind),
            log_key: None,
        }
    }

    /// Reference to a persisted page that has just been loaded.
    pub fn resolved(key: u64, page: Page) -> Self {
        Self {
            key: Some(key),
            kind: Some(page.kind()),
            page: Some(Box::new(page)),
            log_key: None,
        }
    }

    /// Reference owning a freshly created in-memory page.
    pub fn inline(page: Page) -> Self {
        let mut reference = Self::new();
        reference.set_page(page);
        reference
    }

    /// True when the reference points nowhere.
    pub fn is_null(&self) -> bool {
        self.key.is_none() && self.page.is_none() && self.log_key.is_none()
    }

    /// Persistent storage key.
    pub fn key(&self) -> Option<u64> {
        self.key
    }

    /// Records the storage key assigned on flush.
    pub fn set_key(&mut self, key: u64) {
        self.key = Some(key);
    }

    /// Kind of the referenced page, when known.
    pub fn kind(&self) -> Option<PageKind> {
        self.kind
    }

    /// Sets the page-kind tag.
    pub fn set_kind(&mut self, kind: PageKind) {
        self.kind = Some(kind);
    }

    /// Inline page, if resolved in memory.
    pub fn page(&self) -> Option<&Page> {
        self.page.as_deref()
    }

    /// Mutable inline page.
    pub fn page_mut(&mut self) -> Option<&mut Page> {
        self.page.as_deref_mut()
    }

    /// Binds an in-memory page, marking it dirty.
    pub fn set_page(&mut self, mut page: Page) {
        page.set_dirty(true);
        self.kind = Some(page.kind());
        self.page = Some(Box::new(page));
    }

    /// Detaches the inline page.
    pub fn take_page(&mut self) -> Option<Page> {
        self.page.take().map(|page| *page)
    }

    /// Transaction-log key of a dirty node page.
    pub fn log_key(&self) -> Option<u64> {
        self.log_key
    }

    /// Binds the reference to a transaction-log entry.
    pub fn set_log_key(&mut self, log_key: u64) {
        self.log_key = Some(log_key);
    }

    /// Drops the transaction-log binding.
    pub fn take_log_key(&mut self) -> Option<u64> {
        self.log_key.take()
    }

    /// Copy holding only the persisted identity.
    pub fn to_persisted(&self) -> Self {
        Self {
            key: self.key,
            page: None,
            kind: self.kind,
            log_key: None,
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        be::put_i64(out, self.key.map_or(-1, |k| k as i64));
        out.push(self.kind.map_or(0, PageKind::as_u8));
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let key = match cur.read_i64()? {
            -1 => None,
            k if k >= 0 => Some(k as u64),
            _ => return Err(VersoError::corrupt("negative page key")),
        };
        let kind = match cur.read_u8()? {
            0 => None,
            tag => Some(PageKind::try_from(tag)?),
        };
        Ok(Self {
            key,
            page: None,
            kind,
            log_key: None,
        })
    }
}
