//! Committed-page access shared by read and write transactions.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::page::{
    level_offset, NodePage, Page, PageReference, RevisionRootPage, UberPage, INP_LEVELS,
    MAX_TREE_KEY,
};
use crate::storage::Reader;
use crate::types::{Result, VersoError};

/// Reader plus caches of immutable pages keyed by storage key.
pub(crate) struct PageSource {
    reader: Mutex<Box<dyn Reader>>,
    pages: Mutex<LruCache<u64, Arc<Page>>>,
    node_pages: Mutex<LruCache<u64, Arc<NodePage>>>,
    window: usize,
}

impl PageSource {
    pub(crate) fn new(reader: Box<dyn Reader>, capacity: usize, window: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or(VersoError::Invalid("page cache capacity must be positive"))?;
        Ok(Self {
            reader: Mutex::new(reader),
            pages: Mutex::new(LruCache::new(capacity)),
            node_pages: Mutex::new(LruCache::new(capacity)),
            window,
        })
    }

    /// The currently published uber page.
    pub(crate) fn published_uber(&self) -> Result<UberPage> {
        let mut reference = self.reader.lock().read_first_reference()?;
        reference
            .take_page()
            .ok_or_else(|| VersoError::corrupt("first reference without page"))?
            .into_uber()
    }

    /// Loads a committed page.
    pub(crate) fn load(&self, key: u64) -> Result<Arc<Page>> {
        if let Some(page) = self.pages.lock().get(&key) {
            return Ok(page.clone());
        }
        let page = Arc::new(self.reader.lock().read(key)?);
        self.pages.lock().put(key, page.clone());
        Ok(page)
    }

    /// Raw versions of the node page stored at `key`, newest first.
    pub(crate) fn node_page_versions(&self, key: u64) -> Result<Vec<NodePage>> {
        let mut versions = Vec::new();
        let mut next = Some(key);
        let mut reader = self.reader.lock();
        while let Some(key) = next {
            if versions.len() == self.window {
                return Err(VersoError::corrupt(format!(
                    "node page chain at {key} exceeds the versioning window of {}",
                    self.window
                )));
            }
            let page = reader.read(key)?.into_node()?;
            next = page.previous().key();
            versions.push(page);
        }
        Ok(versions)
    }

    /// Full reconstruction of the node page stored at `key`.
    pub(crate) fn node_page(&self, key: u64) -> Result<Arc<NodePage>> {
        if let Some(page) = self.node_pages.lock().get(&key) {
            return Ok(page.clone());
        }
        let page = Arc::new(NodePage::combine(&self.node_page_versions(key)?)?);
        self.node_pages.lock().put(key, page.clone());
        Ok(page)
    }

    /// Storage key of the leaf for `page_key` below `root`, following inline
    /// pages first and committed pages otherwise.
    pub(crate) fn leaf_key(&self, root: &PageReference, page_key: u64) -> Result<Option<u64>> {
        if page_key > MAX_TREE_KEY {
            return Ok(None);
        }
        self.descend(root, page_key, 0)
    }

    fn descend(&self, reference: &PageReference, page_key: u64, level: usize) -> Result<Option<u64>> {
        if level == INP_LEVELS {
            return Ok(reference.key());
        }
        let offset = level_offset(page_key, level);
        if let Some(page) = reference.page() {
            return self.descend(page.as_indirect()?.reference(offset), page_key, level + 1);
        }
        match reference.key() {
            None => Ok(None),
            Some(key) => {
                let page = self.load(key)?;
                self.descend(page.as_indirect()?.reference(offset), page_key, level + 1)
            }
        }
    }

    /// Revision root of `revision` as reachable from `uber`.
    pub(crate) fn revision_root(&self, uber: &UberPage, revision: u32) -> Result<RevisionRootPage> {
        if revision >= uber.revision_count() {
            return Err(VersoError::NotFound("revision"));
        }
        let key = self
            .leaf_key(uber.revisions(), revision as u64)?
            .ok_or_else(|| VersoError::corrupt(format!("revision {revision} has no root")))?;
        Ok(self.load(key)?.as_revision_root()?.clone())
    }

    /// Loads a committed page of the expected accessor type.
    pub(crate) fn load_referenced<T>(
        &self,
        reference: &PageReference,
        pick: impl FnOnce(&Page) -> Result<&T>,
    ) -> Result<T>
    where
        T: Clone,
    {
        let key = reference
            .key()
            .ok_or_else(|| VersoError::corrupt("unresolved page reference"))?;
        let page = self.load(key)?;
        Ok(pick(page.as_ref())?.clone())
    }

    pub(crate) fn close(&self) -> Result<()> {
        self.reader.lock().close()
    }
}
