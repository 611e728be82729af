use super::{DirtyFlag, PageReference, NDP_NODE_COUNT};
use crate::node::Node;
use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::{Result, VersoError};

/// A range of `NDP_NODE_COUNT` node slots.
///
/// With incremental versioning a persisted node page holds only the slots
/// changed in its revision and links to the prior version via `previous`.
#[derive(Clone, Debug, PartialEq)]
pub struct NodePage {
    pub(crate) node_page_key: u64,
    pub(crate) revision: u32,
    pub(crate) dirty: DirtyFlag,
    previous: PageReference,
    slots: Vec<Option<Node>>,
}

impl NodePage {
    /// An empty page with no predecessor.
    pub fn new(node_page_key: u64, revision: u32) -> Self {
        Self {
            node_page_key,
            revision,
            dirty: DirtyFlag::dirty(),
            previous: PageReference::new(),
            slots: vec![None; NDP_NODE_COUNT],
        }
    }

    /// An empty delta on top of the version stored at `previous`.
    pub fn delta(node_page_key: u64, revision: u32, previous: u64) -> Self {
        let mut page = Self::new(node_page_key, revision);
        page.previous = PageReference::persisted(previous, super::PageKind::Node);
        page
    }

    /// Overlays `versions` (newest first). The result carries the newest
    /// revision, no predecessor, and keeps tombstones so they keep
    /// shadowing when the result is used as a before-image.
    pub fn combine(versions: &[NodePage]) -> Result<NodePage> {
        let newest = versions
            .first()
            .ok_or_else(|| VersoError::corrupt("no node page versions to combine"))?;
        let mut complete = Self::new(newest.node_page_key, newest.revision);
        complete.dirty = DirtyFlag::default();
        for version in versions {
            if version.node_page_key != newest.node_page_key {
                return Err(VersoError::corrupt("node page chain mixes page keys"));
            }
            for (slot, node) in version.iter() {
                if complete.slots[slot].is_none() {
                    complete.slots[slot] = Some(node.clone());
                }
            }
        }
        Ok(complete)
    }

    /// Self-contained copy of the live records for `revision`.
    pub fn full_dump(&self, revision: u32) -> NodePage {
        let mut page = Self::new(self.node_page_key, revision);
        for (slot, node) in self.iter().filter(|(_, n)| !n.is_deleted()) {
            page.slots[slot] = Some(node.clone());
        }
        page
    }

    /// Logical page key (`node key >> 7`).
    pub fn node_page_key(&self) -> u64 {
        self.node_page_key
    }

    /// Revision that produced this version.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Prior version, unset for full dumps.
    pub fn previous(&self) -> &PageReference {
        &self.previous
    }

    /// Record in `slot`, including tombstones.
    pub fn node(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Stores a record in `slot`.
    pub fn set_node(&mut self, slot: usize, node: Node) {
        self.slots[slot] = Some(node);
        self.dirty.set(true);
    }

    /// Occupied slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, node)| node.as_ref().map(|n| (slot, n)))
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// True when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        be::put_u64(out, self.node_page_key);
        self.previous.encode(out);
        be::put_u32(out, self.len() as u32);
        for (slot, node) in self.iter() {
            out.push(slot as u8);
            node.encode(out);
        }
    }

    pub(crate) fn decode_body(revision: u32, cur: &mut Cursor<'_>) -> Result<Self> {
        let node_page_key = cur.read_u64()?;
        let mut page = Self::new(node_page_key, revision);
        page.dirty = DirtyFlag::default();
        page.previous = PageReference::decode(cur)?;
        let count = cur.read_u32()? as usize;
        if count > NDP_NODE_COUNT {
            return Err(VersoError::corrupt("node page slot count too large"));
        }
        for _ in 0..count {
            let slot = cur.read_u8()? as usize;
            if slot >= NDP_NODE_COUNT || page.slots[slot].is_some() {
                return Err(VersoError::corrupt("invalid node page slot"));
            }
            let node = Node::decode(cur)?;
            let key = node.key();
            if key.page_key() != node_page_key || key.slot() != slot {
                return Err(VersoError::corrupt(format!(
                    "node {key} stored in page {node_page_key} slot {slot}"
                )));
            }
            page.slots[slot] = Some(node);
        }
        Ok(page)
    }
}
