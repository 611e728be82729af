use super::{DirtyFlag, PageReference};
use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::Result;

/// Root of a revision's path summary.
#[derive(Clone, Debug, PartialEq)]
pub struct PathSummaryPage {
    pub(crate) revision: u32,
    pub(crate) dirty: DirtyFlag,
    pub(crate) max_path_node_key: u64,
    pub(crate) indirect: PageReference,
}

impl PathSummaryPage {
    /// An empty summary.
    pub fn new(revision: u32) -> Self {
        Self {
            revision,
            dirty: DirtyFlag::dirty(),
            max_path_node_key: 0,
            indirect: PageReference::new(),
        }
    }

    /// Copy of a committed summary for the next revision.
    pub fn successor(&self, revision: u32) -> Self {
        Self {
            revision,
            dirty: DirtyFlag::dirty(),
            max_path_node_key: self.max_path_node_key,
            indirect: self.indirect.to_persisted(),
        }
    }

    /// Largest path-node key allocated so far.
    pub fn max_path_node_key(&self) -> u64 {
        self.max_path_node_key
    }

    /// Root of the path-node indirect tree.
    pub fn indirect(&self) -> &PageReference {
        &self.indirect
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        be::put_u64(out, self.max_path_node_key);
        self.indirect.encode(out);
    }

    pub(crate) fn decode_body(revision: u32, cur: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            revision,
            dirty: DirtyFlag::default(),
            max_path_node_key: cur.read_u64()?,
            indirect: PageReference::decode(cur)?,
        })
    }
}
