//! Copy-on-write page transaction that builds the next revision.
//!
//! Modified node pages live in two transaction logs (document nodes and
//! path-summary nodes) keyed by node-page key. Indirect pages on the path
//! from a tree root to a modified leaf are copied into memory and owned by
//! their references. Commit flushes everything bottom-up and publishes the
//! new uber page through the storage's first reference.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use super::config::ResourceConfiguration;
use super::page_read_trx::{as_path_node, live, PageAccess};
use super::source::PageSource;
use crate::cache::{LogType, PageContainer, TransactionLogCache};
use crate::node::{DocumentRootNode, NameKind, Node, NodeKind, PathNode, StructLinks};
use crate::page::{
    level_offset, IndirectPage, NamePage, NodePage, Page, PageKind, PageReference,
    PathSummaryPage, RevisionRootPage, UberPage, INP_LEVELS, MAX_TREE_KEY, NDP_NODE_COUNT,
};
use crate::storage::{Storage, Writer};
use crate::types::{NodeKey, Result, VersoError};

/// Which node tree an operation addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeKind {
    /// Document nodes below the revision root.
    Nodes,
    /// Path-summary nodes below the path-summary page.
    Paths,
}

const MAX_NODE_KEY: u64 = (MAX_TREE_KEY + 1) * NDP_NODE_COUNT as u64 - 1;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn node_page_mut(page: &mut Page) -> Result<&mut NodePage> {
    match page {
        Page::Node(page) => Ok(page),
        other => Err(VersoError::corrupt(format!(
            "transaction log holds a {:?} page",
            other.kind()
        ))),
    }
}

/// Makes the indirect page behind `reference` writable for `revision`.
fn prepare_indirect<'r>(
    source: &PageSource,
    reference: &'r mut PageReference,
    revision: u32,
) -> Result<&'r mut IndirectPage> {
    if reference.page().is_none() {
        let page = match reference.key() {
            Some(key) => source.load(key)?.as_indirect()?.copy_for(revision),
            None => IndirectPage::new(revision),
        };
        reference.set_page(Page::Indirect(page));
    }
    match reference.page_mut() {
        Some(Page::Indirect(page)) => Ok(page),
        _ => Err(VersoError::corrupt("expected an indirect page")),
    }
}

/// Copies the indirect path from `root` to the leaf for `key` and returns
/// the leaf reference.
fn prepare_leaf<'r>(
    source: &PageSource,
    root: &'r mut PageReference,
    key: u64,
    revision: u32,
) -> Result<&'r mut PageReference> {
    let mut current = root;
    for level in 0..INP_LEVELS {
        let indirect = prepare_indirect(source, current, revision)?;
        current = indirect.reference_mut(level_offset(key, level));
    }
    Ok(current)
}

/// Writes every dirty page below `reference`, children first.
fn flush(
    writer: &mut dyn Writer,
    reference: &mut PageReference,
    log: Option<&TransactionLogCache>,
    pages: &mut usize,
) -> Result<()> {
    if let Some(page_key) = reference.take_log_key() {
        let log = log.ok_or_else(|| VersoError::corrupt("log-bound reference outside a node tree"))?;
        let page = log.get(page_key)?.into_modified().ok_or_else(|| {
            VersoError::corrupt(format!("node page {page_key} missing from the transaction log"))
        })?;
        reference.set_key(writer.write(&page)?);
        *pages += 1;
        return Ok(());
    }
    let Some(mut page) = reference.take_page() else {
        return Ok(());
    };
    if let Page::Indirect(indirect) = &mut page {
        for child in indirect.references_mut() {
            flush(writer, child, log, pages)?;
        }
    }
    reference.set_key(writer.write(&page)?);
    *pages += 1;
    Ok(())
}

/// Writes one indirect path ending in `leaf` and returns the root reference.
fn write_single_path(
    writer: &mut dyn Writer,
    leaf: PageReference,
    key: u64,
    revision: u32,
) -> Result<PageReference> {
    let mut child = leaf;
    for level in (0..INP_LEVELS).rev() {
        let mut page = IndirectPage::new(revision);
        *page.reference_mut(level_offset(key, level)) = child;
        let stored = writer.write(&Page::Indirect(page))?;
        child = PageReference::persisted(stored, PageKind::Indirect);
    }
    Ok(child)
}

/// Writes and publishes revision 0: the document root, the document-root
/// path node and empty name dictionaries.
pub(crate) fn bootstrap(writer: &mut dyn Writer) -> Result<UberPage> {
    let mut nodes = NodePage::new(0, 0);
    nodes.set_node(
        0,
        Node::DocumentRoot(DocumentRootNode {
            links: StructLinks::default(),
        }),
    );
    let nodes_key = writer.write(&Page::Node(nodes))?;
    let nodes = write_single_path(writer, PageReference::persisted(nodes_key, PageKind::Node), 0, 0)?;

    let mut paths = NodePage::new(0, 0);
    paths.set_node(
        0,
        Node::Path(PathNode {
            key: NodeKey::DOCUMENT_ROOT,
            parent: None,
            links: StructLinks::default(),
            name_key: 0,
            path_kind: NodeKind::DocumentRoot,
            references: 1,
            level: 0,
        }),
    );
    let paths_key = writer.write(&Page::Node(paths))?;
    let mut summary = PathSummaryPage::new(0);
    summary.indirect =
        write_single_path(writer, PageReference::persisted(paths_key, PageKind::Node), 0, 0)?;
    let summary_key = writer.write(&Page::PathSummary(summary))?;
    let names_key = writer.write(&Page::Name(NamePage::new(0)))?;

    let mut root = RevisionRootPage::new(0);
    root.commit_timestamp = now_millis();
    root.nodes = nodes;
    root.names = PageReference::persisted(names_key, PageKind::Name);
    root.path_summary = PageReference::persisted(summary_key, PageKind::PathSummary);
    let root_key = writer.write(&Page::RevisionRoot(root))?;

    let revisions = write_single_path(
        writer,
        PageReference::persisted(root_key, PageKind::RevisionRoot),
        0,
        0,
    )?;
    let uber = UberPage::new(0, 1, 0, revisions);
    let uber_key = writer.write(&Page::Uber(uber.clone()))?;
    writer.write_first_reference(uber_key)?;
    info!(uber_key, "resource.bootstrap");
    Ok(uber)
}

/// Everything that belongs to the revision under construction.
struct Draft {
    root: RevisionRootPage,
    names: NamePage,
    path_summary: PathSummaryPage,
    node_log: TransactionLogCache,
    path_log: TransactionLogCache,
}

impl Draft {
    fn open(
        source: &PageSource,
        uber: &UberPage,
        config: &ResourceConfiguration,
        log_root: &Path,
    ) -> Result<Self> {
        let base = source.revision_root(uber, uber.revision())?;
        let revision = uber.revision() + 1;
        let names = source.load_referenced(base.names(), Page::as_name)?;
        let summary = source.load_referenced(base.path_summary(), Page::as_path_summary)?;
        let capacity = config.log_cache_capacity;
        Ok(Self {
            root: base.successor(revision),
            names: names.successor(revision),
            path_summary: summary.successor(revision),
            node_log: TransactionLogCache::open(log_root, LogType::Node, revision, capacity)?,
            path_log: TransactionLogCache::open(log_root, LogType::Path, revision, capacity)?,
        })
    }

    fn log(&self, tree: TreeKind) -> &TransactionLogCache {
        match tree {
            TreeKind::Nodes => &self.node_log,
            TreeKind::Paths => &self.path_log,
        }
    }

    fn tree_root(&self, tree: TreeKind) -> &PageReference {
        match tree {
            TreeKind::Nodes => &self.root.nodes,
            TreeKind::Paths => &self.path_summary.indirect,
        }
    }

    fn close_logs(&self) -> Result<()> {
        self.node_log.close()?;
        self.path_log.close()
    }
}

/// Page-level write transaction.
pub struct PageWriteTrx {
    source: PageSource,
    writer: Box<dyn Writer>,
    config: Arc<ResourceConfiguration>,
    log_root: PathBuf,
    uber: UberPage,
    draft: Draft,
}

impl PageWriteTrx {
    /// Begins building the revision after the most recent one.
    pub fn begin(
        storage: &dyn Storage,
        config: Arc<ResourceConfiguration>,
        log_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let log_root = log_root.into();
        let source = PageSource::new(storage.reader()?, config.page_cache_capacity, config.window())?;
        let writer = storage.writer()?;
        let uber = source.published_uber()?;
        let draft = Draft::open(&source, &uber, &config, &log_root)?;
        debug!(revision = draft.root.revision(), "page_trx.write.begin");
        Ok(Self {
            source,
            writer,
            config,
            log_root,
            uber,
            draft,
        })
    }

    /// Uber page this transaction builds on.
    pub fn base_uber(&self) -> &UberPage {
        &self.uber
    }

    /// Root of the revision under construction.
    pub fn revision_root(&self) -> &RevisionRootPage {
        &self.draft.root
    }

    /// Name dictionaries of the revision under construction.
    pub fn name_page(&self) -> &NamePage {
        &self.draft.names
    }

    /// Path-summary root of the revision under construction.
    pub fn path_summary_page(&self) -> &PathSummaryPage {
        &self.draft.path_summary
    }

    /// Transaction log of `tree`.
    pub fn log(&self, tree: TreeKind) -> &TransactionLogCache {
        self.draft.log(tree)
    }

    /// Record `key` of `tree` as currently visible to this transaction.
    pub fn record(&self, tree: TreeKind, key: NodeKey) -> Result<Option<Node>> {
        let container = self.draft.log(tree).get(key.page_key())?;
        if let Some(complete) = container.complete() {
            let page = complete.as_node()?;
            return Ok(page.node(key.slot()).filter(|n| !n.is_deleted()).cloned());
        }
        let page = self
            .source
            .leaf_key(self.draft.tree_root(tree), key.page_key())?
            .map(|stored| self.source.node_page(stored))
            .transpose()?;
        Ok(live(page, key))
    }

    /// Copy-on-write preparation of the node page `page_key` of `tree`.
    ///
    /// The first call per page copies the indirect path, reconstructs the
    /// committed page as `complete` and starts `modified` as either a delta
    /// or, once the version chain reaches the window, a full dump.
    pub fn prepare_node_page(&mut self, tree: TreeKind, page_key: u64) -> Result<PageContainer> {
        if page_key > MAX_TREE_KEY {
            return Err(VersoError::Invalid("node key space exhausted"));
        }
        let revision = self.draft.root.revision();
        let window = self.config.window();
        let (log, root) = match tree {
            TreeKind::Nodes => (&self.draft.node_log, &mut self.draft.root.nodes),
            TreeKind::Paths => (&self.draft.path_log, &mut self.draft.path_summary.indirect),
        };
        let container = log.get(page_key)?;
        if !container.is_empty() {
            return Ok(container);
        }
        let leaf = prepare_leaf(&self.source, root, page_key, revision)?;
        let container = match leaf.key() {
            Some(stored) => {
                let versions = self.source.node_page_versions(stored)?;
                let mut complete = NodePage::combine(&versions)?;
                complete.revision = revision;
                let modified = if versions.len() >= window {
                    complete.full_dump(revision)
                } else {
                    NodePage::delta(page_key, revision, stored)
                };
                PageContainer::new(Page::Node(complete), Page::Node(modified))
            }
            None => PageContainer::new(
                Page::Node(NodePage::new(page_key, revision)),
                Page::Node(NodePage::new(page_key, revision)),
            ),
        };
        leaf.set_log_key(page_key);
        leaf.set_kind(PageKind::Node);
        log.put(page_key, container.clone())?;
        Ok(container)
    }

    /// Allocates a key in `tree`, builds the record for it and stores it.
    pub fn create_node(&mut self, tree: TreeKind, build: impl FnOnce(NodeKey) -> Node) -> Result<Node> {
        let key = match tree {
            TreeKind::Nodes => self.next_node_key()?,
            TreeKind::Paths => self.next_path_node_key()?,
        };
        let node = build(key);
        if node.key() != key {
            return Err(VersoError::Invalid("created record must carry the allocated key"));
        }
        self.finish_node(tree, node.clone())?;
        Ok(node)
    }

    /// Copy of live record `key` of `tree`, to be changed and handed back
    /// through [`finish_node`](Self::finish_node).
    pub fn prepare_node(&mut self, tree: TreeKind, key: NodeKey) -> Result<Node> {
        self.prepare_node_page(tree, key.page_key())?;
        self.record(tree, key)?.ok_or(VersoError::NotFound("node"))
    }

    /// Stores `node` in `tree`, replacing any previous record with its key.
    pub fn finish_node(&mut self, tree: TreeKind, node: Node) -> Result<()> {
        let key = node.key();
        let mut container = self.prepare_node_page(tree, key.page_key())?;
        let (complete, modified) = container
            .images_mut()
            .ok_or_else(|| VersoError::corrupt("prepared an empty container"))?;
        node_page_mut(complete)?.set_node(key.slot(), node.clone());
        node_page_mut(modified)?.set_node(key.slot(), node);
        self.draft.log(tree).put(key.page_key(), container)
    }

    /// Tombstones record `key` of `tree`.
    pub fn remove_node(&mut self, tree: TreeKind, key: NodeKey) -> Result<()> {
        self.finish_node(tree, Node::Deleted(key))
    }

    /// Allocates the next document node key.
    pub fn next_node_key(&mut self) -> Result<NodeKey> {
        let next = self.draft.root.max_node_key + 1;
        if next > MAX_NODE_KEY {
            return Err(VersoError::Invalid("node key space exhausted"));
        }
        self.draft.root.max_node_key = next;
        Ok(NodeKey(next))
    }

    /// Allocates the next path-summary node key.
    pub fn next_path_node_key(&mut self) -> Result<NodeKey> {
        let next = self.draft.path_summary.max_path_node_key + 1;
        if next > MAX_NODE_KEY {
            return Err(VersoError::Invalid("path node key space exhausted"));
        }
        self.draft.path_summary.max_path_node_key = next;
        Ok(NodeKey(next))
    }

    /// Registers a use of `name` and returns its key.
    pub fn create_name(&mut self, name: &str, kind: NameKind) -> i32 {
        self.draft.names.set_name(name, kind)
    }

    /// Drops a use of name `key`.
    pub fn remove_name(&mut self, key: i32, kind: NameKind) {
        self.draft.names.remove_name(key, kind);
    }

    /// Flushes and publishes the revision, then starts the next one.
    pub fn commit(&mut self) -> Result<UberPage> {
        let revision = self.draft.root.revision();
        debug!(revision, "page_trx.commit.start");
        let uber = match self.publish() {
            Ok(uber) => uber,
            Err(err) => {
                if let Err(reset) = self.rollback() {
                    debug!(error = %reset, "page_trx.commit.reset_failed");
                }
                return Err(err);
            }
        };
        self.draft.close_logs()?;
        self.uber = uber.clone();
        self.draft = Draft::open(&self.source, &self.uber, &self.config, &self.log_root)?;
        info!(revision, max_node_key = uber.max_node_key(), "page_trx.commit.finish");
        Ok(uber)
    }

    fn publish(&mut self) -> Result<UberPage> {
        let revision = self.draft.root.revision();
        self.draft.node_log.to_second_cache()?;
        self.draft.path_log.to_second_cache()?;

        let writer = self.writer.as_mut();
        let draft = &mut self.draft;
        let mut pages = 0usize;
        flush(writer, &mut draft.root.nodes, Some(&draft.node_log), &mut pages)?;
        flush(writer, &mut draft.path_summary.indirect, Some(&draft.path_log), &mut pages)?;

        let summary_key = writer.write(&Page::PathSummary(draft.path_summary.clone()))?;
        draft.root.path_summary = PageReference::persisted(summary_key, PageKind::PathSummary);
        let names_key = writer.write(&Page::Name(draft.names.clone()))?;
        draft.root.names = PageReference::persisted(names_key, PageKind::Name);
        draft.root.commit_timestamp = now_millis();
        let root_key = writer.write(&Page::RevisionRoot(draft.root.clone()))?;
        pages += 3;

        let mut uber = self.uber.clone();
        let leaf = prepare_leaf(&self.source, uber.revisions_mut(), revision as u64, revision)?;
        *leaf = PageReference::persisted(root_key, PageKind::RevisionRoot);
        flush(writer, uber.revisions_mut(), None, &mut pages)?;
        uber.advance(revision, draft.root.max_node_key());
        let uber_key = writer.write(&Page::Uber(uber.clone()))?;
        debug!(revision, pages, "page_trx.commit.flushed");

        writer.write_first_reference(uber_key)?;
        Ok(uber)
    }

    /// Discards every modification and restarts from the published revision.
    pub fn rollback(&mut self) -> Result<()> {
        self.writer.abort()?;
        self.draft.close_logs()?;
        self.uber = self.source.published_uber()?;
        self.draft = Draft::open(&self.source, &self.uber, &self.config, &self.log_root)?;
        debug!(revision = self.draft.root.revision(), "page_trx.rollback");
        Ok(())
    }

    /// Discards pending modifications and releases all handles.
    pub fn close(mut self) -> Result<()> {
        self.draft.close_logs()?;
        self.writer.close()?;
        self.source.close()
    }
}

impl PageAccess for PageWriteTrx {
    fn revision(&self) -> u32 {
        self.draft.root.revision()
    }

    fn max_node_key(&self) -> u64 {
        self.draft.root.max_node_key()
    }

    fn node(&self, key: NodeKey) -> Result<Option<Node>> {
        self.record(TreeKind::Nodes, key)
    }

    fn path_node(&self, key: NodeKey) -> Result<Option<PathNode>> {
        Ok(as_path_node(self.record(TreeKind::Paths, key)?))
    }

    fn name(&self, key: i32, kind: NameKind) -> Option<String> {
        self.draft.names.name(key, kind).map(str::to_owned)
    }

    fn name_count(&self, key: i32, kind: NameKind) -> u32 {
        self.draft.names.count(key, kind)
    }
}
