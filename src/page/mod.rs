#![forbid(unsafe_code)]
//! Page model and the persisted page format.
//!
//! A serialized page is `kind: u8`, `revision: u32 BE`, a kind-specific
//! body and a trailing `crc32: u32 BE` over everything before it.

use std::convert::TryFrom;

use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::checksum::page_crc32;
use crate::types::{Result, VersoError};

mod indirect;
mod name;
mod node_page;
mod path_summary;
mod reference;
mod revision_root;
mod uber;

pub use indirect::IndirectPage;
pub use name::{name_key, NamePage, Names};
pub use node_page::NodePage;
pub use path_summary::PathSummaryPage;
pub use reference::PageReference;
pub use revision_root::RevisionRootPage;
pub use uber::UberPage;

/// Child references per indirect page.
pub const INP_REFERENCE_COUNT: usize = 128;
/// Key bits consumed per indirect level.
pub const INP_LEVEL_SHIFT: u32 = 7;
/// Depth of every indirect tree.
pub const INP_LEVELS: usize = 4;
/// Node slots per node page.
pub const NDP_NODE_COUNT: usize = 128;
/// `log2(NDP_NODE_COUNT)`.
pub const NDP_NODE_COUNT_EXPONENT: u32 = 7;
/// Largest key addressable through an indirect tree.
pub const MAX_TREE_KEY: u64 = (1 << (INP_LEVEL_SHIFT as usize * INP_LEVELS)) - 1;

const HEADER_LEN: usize = 1 + 4;
const CRC_LEN: usize = 4;

/// Slot of `key` inside the indirect page at `level` (0 = root).
pub fn level_offset(key: u64, level: usize) -> usize {
    let shift = INP_LEVEL_SHIFT * (INP_LEVELS - 1 - level) as u32;
    ((key >> shift) & (INP_REFERENCE_COUNT as u64 - 1)) as usize
}

/// Wire tag of a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PageKind {
    /// Revision entry point.
    Uber = 1,
    /// Interior page of an indirect tree.
    Indirect = 2,
    /// Per-revision root.
    RevisionRoot = 3,
    /// Name dictionaries.
    Name = 4,
    /// Path-summary root.
    PathSummary = 5,
    /// Node records.
    Node = 6,
}

impl PageKind {
    /// Byte value written to storage.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PageKind {
    type Error = VersoError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => PageKind::Uber,
            2 => PageKind::Indirect,
            3 => PageKind::RevisionRoot,
            4 => PageKind::Name,
            5 => PageKind::PathSummary,
            6 => PageKind::Node,
            other => return Err(VersoError::corrupt(format!("unknown page kind {other}"))),
        })
    }
}

/// In-memory dirty marker. Never persisted and ignored by equality.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirtyFlag(bool);

impl DirtyFlag {
    /// A set flag.
    pub fn dirty() -> Self {
        DirtyFlag(true)
    }

    /// Current state.
    pub fn get(self) -> bool {
        self.0
    }

    /// Overwrites the state.
    pub fn set(&mut self, dirty: bool) {
        self.0 = dirty;
    }
}

impl PartialEq for DirtyFlag {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Any page.
#[derive(Clone, Debug, PartialEq)]
pub enum Page {
    /// See [`UberPage`].
    Uber(UberPage),
    /// See [`IndirectPage`].
    Indirect(IndirectPage),
    /// See [`RevisionRootPage`].
    RevisionRoot(RevisionRootPage),
    /// See [`NamePage`].
    Name(NamePage),
    /// See [`PathSummaryPage`].
    PathSummary(PathSummaryPage),
    /// See [`NodePage`].
    Node(NodePage),
}

macro_rules! page_accessors {
    ($($variant:ident => $ty:ty, $as:ident, $into:ident, $what:literal;)*) => {
        impl Page {
            $(
                #[doc = concat!("Borrows the page as ", $what, " or reports corruption.")]
                pub fn $as(&self) -> Result<&$ty> {
                    match self {
                        Page::$variant(page) => Ok(page),
                        other => Err(unexpected(PageKind::$variant, other.kind())),
                    }
                }

                #[doc = concat!("Unwraps the page as ", $what, " or reports corruption.")]
                pub fn $into(self) -> Result<$ty> {
                    match self {
                        Page::$variant(page) => Ok(page),
                        other => Err(unexpected(PageKind::$variant, other.kind())),
                    }
                }
            )*
        }
    };
}

page_accessors! {
    Uber => UberPage, as_uber, into_uber, "an uber page";
    Indirect => IndirectPage, as_indirect, into_indirect, "an indirect page";
    RevisionRoot => RevisionRootPage, as_revision_root, into_revision_root, "a revision root";
    Name => NamePage, as_name, into_name, "a name page";
    PathSummary => PathSummaryPage, as_path_summary, into_path_summary, "a path summary page";
    Node => NodePage, as_node, into_node, "a node page";
}

fn unexpected(expected: PageKind, found: PageKind) -> VersoError {
    VersoError::corrupt(format!("expected {expected:?} page, found {found:?}"))
}

impl Page {
    /// Wire tag.
    pub fn kind(&self) -> PageKind {
        match self {
            Page::Uber(_) => PageKind::Uber,
            Page::Indirect(_) => PageKind::Indirect,
            Page::RevisionRoot(_) => PageKind::RevisionRoot,
            Page::Name(_) => PageKind::Name,
            Page::PathSummary(_) => PageKind::PathSummary,
            Page::Node(_) => PageKind::Node,
        }
    }

    /// Revision that produced this page.
    pub fn revision(&self) -> u32 {
        match self {
            Page::Uber(p) => p.revision,
            Page::Indirect(p) => p.revision,
            Page::RevisionRoot(p) => p.revision,
            Page::Name(p) => p.revision,
            Page::PathSummary(p) => p.revision,
            Page::Node(p) => p.revision,
        }
    }

    fn dirty_flag(&mut self) -> &mut DirtyFlag {
        match self {
            Page::Uber(p) => &mut p.dirty,
            Page::Indirect(p) => &mut p.dirty,
            Page::RevisionRoot(p) => &mut p.dirty,
            Page::Name(p) => &mut p.dirty,
            Page::PathSummary(p) => &mut p.dirty,
            Page::Node(p) => &mut p.dirty,
        }
    }

    /// True when the page has in-memory modifications.
    pub fn is_dirty(&self) -> bool {
        match self {
            Page::Uber(p) => p.dirty.get(),
            Page::Indirect(p) => p.dirty.get(),
            Page::RevisionRoot(p) => p.dirty.get(),
            Page::Name(p) => p.dirty.get(),
            Page::PathSummary(p) => p.dirty.get(),
            Page::Node(p) => p.dirty.get(),
        }
    }

    /// Sets or clears the dirty marker.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty_flag().set(dirty);
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            Page::Uber(p) => p.encode_body(out),
            Page::Indirect(p) => p.encode_body(out),
            Page::RevisionRoot(p) => p.encode_body(out),
            Page::Name(p) => p.encode_body(out),
            Page::PathSummary(p) => p.encode_body(out),
            Page::Node(p) => p.encode_body(out),
        }
    }
}

/// Serializes a page into its persisted form.
pub fn serialize(page: &Page) -> Vec<u8> {
    let kind = page.kind().as_u8();
    let revision = page.revision();
    let mut out = Vec::with_capacity(64);
    out.push(kind);
    be::put_u32(&mut out, revision);
    page.encode_body(&mut out);
    let crc = page_crc32(kind, revision, &out[HEADER_LEN..]);
    be::put_u32(&mut out, crc);
    out
}

/// Decodes a page produced by [`serialize`]. Every structural defect is
/// reported as `Corruption`.
pub fn deserialize(bytes: &[u8]) -> Result<Page> {
    if bytes.len() < HEADER_LEN + CRC_LEN {
        return Err(VersoError::corrupt(format!(
            "page of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    let (framed, crc_bytes) = bytes.split_at(bytes.len() - CRC_LEN);
    let mut cur = Cursor::new(framed);
    let kind = PageKind::try_from(cur.read_u8()?)?;
    let revision = cur.read_u32()?;
    let stored_crc = Cursor::new(crc_bytes).read_u32()?;
    if page_crc32(kind.as_u8(), revision, &framed[HEADER_LEN..]) != stored_crc {
        return Err(VersoError::corrupt("page checksum mismatch"));
    }
    let page = match kind {
        PageKind::Uber => Page::Uber(UberPage::decode_body(revision, &mut cur)?),
        PageKind::Indirect => Page::Indirect(IndirectPage::decode_body(revision, &mut cur)?),
        PageKind::RevisionRoot => {
            Page::RevisionRoot(RevisionRootPage::decode_body(revision, &mut cur)?)
        }
        PageKind::Name => Page::Name(NamePage::decode_body(revision, &mut cur)?),
        PageKind::PathSummary => {
            Page::PathSummary(PathSummaryPage::decode_body(revision, &mut cur)?)
        }
        PageKind::Node => Page::Node(NodePage::decode_body(revision, &mut cur)?),
    };
    cur.finish()?;
    Ok(page)
}
