use super::{DirtyFlag, PageReference};
use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::Result;

/// Entry point of a published revision.
#[derive(Clone, Debug, PartialEq)]
pub struct UberPage {
    pub(crate) revision: u32,
    pub(crate) dirty: DirtyFlag,
    revision_count: u32,
    max_node_key: u64,
    revisions: PageReference,
}

impl UberPage {
    /// Builds an uber page for `revision`, whose revision tree is `revisions`.
    pub fn new(revision: u32, revision_count: u32, max_node_key: u64, revisions: PageReference) -> Self {
        Self {
            revision,
            dirty: DirtyFlag::default(),
            revision_count,
            max_node_key,
            revisions,
        }
    }

    /// Most recent revision reachable from this page.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Number of revisions, i.e. `revision() + 1`.
    pub fn revision_count(&self) -> u32 {
        self.revision_count
    }

    /// Largest node key of the most recent revision.
    pub fn max_node_key(&self) -> u64 {
        self.max_node_key
    }

    /// Root of the revision indirect tree.
    pub fn revisions(&self) -> &PageReference {
        &self.revisions
    }

    /// Mutable root of the revision indirect tree.
    pub fn revisions_mut(&mut self) -> &mut PageReference {
        &mut self.revisions
    }

    pub(crate) fn advance(&mut self, revision: u32, max_node_key: u64) {
        self.revision = revision;
        self.revision_count = revision + 1;
        self.max_node_key = max_node_key;
        self.dirty.set(true);
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        be::put_u32(out, self.revision_count);
        be::put_u64(out, self.max_node_key);
        self.revisions.encode(out);
    }

    pub(crate) fn decode_body(revision: u32, cur: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            revision,
            dirty: DirtyFlag::default(),
            revision_count: cur.read_u32()?,
            max_node_key: cur.read_u64()?,
            revisions: PageReference::decode(cur)?,
        })
    }
}
