//! Read-only view of one committed revision at page level.

use std::sync::Arc;

use tracing::debug;

use super::source::PageSource;
use crate::node::{NameKind, Node, PathNode};
use crate::page::{NamePage, NodePage, Page, PageReference, PathSummaryPage, RevisionRootPage, UberPage};
use crate::storage::Reader;
use crate::types::{NodeKey, Result};

/// Page-level access shared by read and write transactions.
pub trait PageAccess {
    /// Revision this transaction reads (or builds).
    fn revision(&self) -> u32;
    /// Largest document node key.
    fn max_node_key(&self) -> u64;
    /// Live document node `key`.
    fn node(&self, key: NodeKey) -> Result<Option<Node>>;
    /// Live path-summary node `key`.
    fn path_node(&self, key: NodeKey) -> Result<Option<PathNode>>;
    /// Name stored under `key` in the `kind` dictionary.
    fn name(&self, key: i32, kind: NameKind) -> Option<String>;
    /// Reference count of `key` in the `kind` dictionary.
    fn name_count(&self, key: i32, kind: NameKind) -> u32;
}

impl<T: PageAccess + ?Sized> PageAccess for &T {
    fn revision(&self) -> u32 {
        (**self).revision()
    }

    fn max_node_key(&self) -> u64 {
        (**self).max_node_key()
    }

    fn node(&self, key: NodeKey) -> Result<Option<Node>> {
        (**self).node(key)
    }

    fn path_node(&self, key: NodeKey) -> Result<Option<PathNode>> {
        (**self).path_node(key)
    }

    fn name(&self, key: i32, kind: NameKind) -> Option<String> {
        (**self).name(key, kind)
    }

    fn name_count(&self, key: i32, kind: NameKind) -> u32 {
        (**self).name_count(key, kind)
    }
}

pub(crate) fn live(page: Option<Arc<NodePage>>, key: NodeKey) -> Option<Node> {
    page.and_then(|page| page.node(key.slot()).filter(|n| !n.is_deleted()).cloned())
}

pub(crate) fn as_path_node(node: Option<Node>) -> Option<PathNode> {
    match node {
        Some(Node::Path(path)) => Some(path),
        _ => None,
    }
}

/// Page-level read transaction bound to one revision.
pub struct PageReadTrx {
    source: PageSource,
    uber: UberPage,
    root: RevisionRootPage,
    names: NamePage,
    path_summary: PathSummaryPage,
}

impl PageReadTrx {
    /// Opens `revision` (the most recent one when `None`).
    pub fn open(
        reader: Box<dyn Reader>,
        revision: Option<u32>,
        page_cache_capacity: usize,
        window: usize,
    ) -> Result<Self> {
        let source = PageSource::new(reader, page_cache_capacity, window)?;
        let uber = source.published_uber()?;
        let revision = revision.unwrap_or_else(|| uber.revision());
        let root = source.revision_root(&uber, revision)?;
        let names = source.load_referenced(root.names(), Page::as_name)?;
        let path_summary = source.load_referenced(root.path_summary(), Page::as_path_summary)?;
        debug!(revision, "page_trx.read.open");
        Ok(Self {
            source,
            uber,
            root,
            names,
            path_summary,
        })
    }

    /// Uber page that was published when the transaction began.
    pub fn uber(&self) -> &UberPage {
        &self.uber
    }

    /// Root page of the bound revision.
    pub fn revision_root(&self) -> &RevisionRootPage {
        &self.root
    }

    /// Name dictionaries of the bound revision.
    pub fn name_page(&self) -> &NamePage {
        &self.names
    }

    /// Path-summary root of the bound revision.
    pub fn path_summary_page(&self) -> &PathSummaryPage {
        &self.path_summary
    }

    /// Reconstructed node page `page_key` of the document tree.
    pub fn node_page(&self, page_key: u64) -> Result<Option<Arc<NodePage>>> {
        self.tree_page(self.root.nodes(), page_key)
    }

    /// Reconstructed node page `page_key` of the path-summary tree.
    pub fn path_page(&self, page_key: u64) -> Result<Option<Arc<NodePage>>> {
        self.tree_page(self.path_summary.indirect(), page_key)
    }

    fn tree_page(&self, root: &PageReference, page_key: u64) -> Result<Option<Arc<NodePage>>> {
        self.source
            .leaf_key(root, page_key)?
            .map(|key| self.source.node_page(key))
            .transpose()
    }

    /// Loads any committed page by storage key.
    pub fn load(&self, key: u64) -> Result<Arc<Page>> {
        self.source.load(key)
    }

    /// Releases the reader.
    pub fn close(self) -> Result<()> {
        self.source.close()
    }
}

impl PageAccess for PageReadTrx {
    fn revision(&self) -> u32 {
        self.root.revision()
    }

    fn max_node_key(&self) -> u64 {
        self.root.max_node_key()
    }

    fn node(&self, key: NodeKey) -> Result<Option<Node>> {
        Ok(live(self.node_page(key.page_key())?, key))
    }

    fn path_node(&self, key: NodeKey) -> Result<Option<PathNode>> {
        Ok(as_path_node(live(self.path_page(key.page_key())?, key)))
    }

    fn name(&self, key: i32, kind: NameKind) -> Option<String> {
        self.names.name(key, kind).map(str::to_owned)
    }

    fn name_count(&self, key: i32, kind: NameKind) -> u32 {
        self.names.count(key, kind)
    }
}
