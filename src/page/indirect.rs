use super::{DirtyFlag, PageReference, INP_REFERENCE_COUNT};
use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::{Result, VersoError};

/// Interior page of an indirect tree: a fixed array of child references.
#[derive(Clone, Debug, PartialEq)]
pub struct IndirectPage {
    pub(crate) revision: u32,
    pub(crate) dirty: DirtyFlag,
    references: Vec<PageReference>,
}

impl IndirectPage {
    /// An indirect page with every slot unset.
    pub fn new(revision: u32) -> Self {
        Self {
            revision,
            dirty: DirtyFlag::default(),
            references: vec![PageReference::new(); INP_REFERENCE_COUNT],
        }
    }

    /// Revision that produced the page.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Copy of a committed page for the next revision.
    pub fn copy_for(&self, revision: u32) -> Self {
        Self {
            revision,
            dirty: DirtyFlag::dirty(),
            references: self.references.iter().map(PageReference::to_persisted).collect(),
        }
    }

    /// Child reference at `offset`.
    pub fn reference(&self, offset: usize) -> &PageReference {
        &self.references[offset]
    }

    /// Mutable child reference at `offset`.
    pub fn reference_mut(&mut self, offset: usize) -> &mut PageReference {
        &mut self.references[offset]
    }

    /// All child references.
    pub fn references(&self) -> &[PageReference] {
        &self.references
    }

    /// All child references, mutably.
    pub fn references_mut(&mut self) -> &mut [PageReference] {
        &mut self.references
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        let set: Vec<(usize, &PageReference)> = self
            .references
            .iter()
            .enumerate()
            .filter(|(_, r)| r.key().is_some())
            .collect();
        be::put_u32(out, set.len() as u32);
        for (offset, reference) in set {
            out.push(offset as u8);
            reference.encode(out);
        }
    }

    pub(crate) fn decode_body(revision: u32, cur: &mut Cursor<'_>) -> Result<Self> {
        let mut page = Self::new(revision);
        let count = cur.read_u32()? as usize;
        if count > INP_REFERENCE_COUNT {
            return Err(VersoError::corrupt("indirect page reference count too large"));
        }
        let mut last: Option<usize> = None;
        for _ in 0..count {
            let offset = cur.read_u8()? as usize;
            if offset >= INP_REFERENCE_COUNT || last.is_some_and(|l| l >= offset) {
                return Err(VersoError::corrupt("indirect page offsets out of order"));
            }
            last = Some(offset);
            page.references[offset] = PageReference::decode(cur)?;
        }
        Ok(page)
    }
}
