use super::{DirtyFlag, PageReference};
use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::Result;

/// Root of one revision: node tree, names and path summary.
#[derive(Clone, Debug, PartialEq)]
pub struct RevisionRootPage {
    pub(crate) revision: u32,
    pub(crate) dirty: DirtyFlag,
    pub(crate) max_node_key: u64,
    pub(crate) commit_timestamp: u64,
    pub(crate) nodes: PageReference,
    pub(crate) names: PageReference,
    pub(crate) path_summary: PageReference,
}

impl RevisionRootPage {
    /// A fresh root with unset references.
    pub fn new(revision: u32) -> Self {
        Self {
            revision,
            dirty: DirtyFlag::dirty(),
            max_node_key: 0,
            commit_timestamp: 0,
            nodes: PageReference::new(),
            names: PageReference::new(),
            path_summary: PageReference::new(),
        }
    }

    /// Root for `revision` that starts from the committed state of `self`.
    pub fn successor(&self, revision: u32) -> Self {
        Self {
            revision,
            dirty: DirtyFlag::dirty(),
            max_node_key: self.max_node_key,
            commit_timestamp: self.commit_timestamp,
            nodes: self.nodes.to_persisted(),
            names: self.names.to_persisted(),
            path_summary: self.path_summary.to_persisted(),
        }
    }

    /// Revision number.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Largest node key allocated so far.
    pub fn max_node_key(&self) -> u64 {
        self.max_node_key
    }

    /// Commit time in milliseconds since the Unix epoch.
    pub fn commit_timestamp(&self) -> u64 {
        self.commit_timestamp
    }

    /// Root of the node indirect tree.
    pub fn nodes(&self) -> &PageReference {
        &self.nodes
    }

    /// Reference to the name page.
    pub fn names(&self) -> &PageReference {
        &self.names
    }

    /// Reference to the path-summary page.
    pub fn path_summary(&self) -> &PageReference {
        &self.path_summary
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        be::put_u64(out, self.max_node_key);
        be::put_u64(out, self.commit_timestamp);
        self.nodes.encode(out);
        self.names.encode(out);
        self.path_summary.encode(out);
    }

    pub(crate) fn decode_body(revision: u32, cur: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            revision,
            dirty: DirtyFlag::default(),
            max_node_key: cur.read_u64()?,
            commit_timestamp: cur.read_u64()?,
            nodes: PageReference::decode(cur)?,
            names: PageReference::decode(cur)?,
            path_summary: PageReference::decode(cur)?,
        })
    }
}
