#![forbid(unsafe_code)]
//! Shared identifiers and the crate-wide error type.

use std::fmt;
use std::io;

use thiserror::Error;

/// Checksums used by the page format.
pub mod checksum;

/// Errors raised by the storage engine.
#[derive(Debug, Error)]
pub enum VersoError {
    /// Underlying I/O failure, including backend (SQLite) and byte pipeline failures.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// A persisted page or record failed to decode.
    #[error("corruption: {0}")]
    Corruption(String),
    /// Database or resource configuration is missing, malformed or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    /// The caller asked for something the current state does not allow.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A requested item does not exist.
    #[error("not found: {0}")]
    NotFound(&'static str),
}

impl VersoError {
    /// Shorthand for a corruption error with a static message.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        VersoError::Corruption(msg.into())
    }
}

impl From<rusqlite::Error> for VersoError {
    fn from(err: rusqlite::Error) -> Self {
        VersoError::Io(io::Error::new(io::ErrorKind::Other, err))
    }
}

impl From<serde_json::Error> for VersoError {
    fn from(err: serde_json::Error) -> Self {
        VersoError::Config(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VersoError>;

/// Identifier of a node record (document node or path-summary node).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeKey(pub u64);

impl NodeKey {
    /// The document root of every revision.
    pub const DOCUMENT_ROOT: NodeKey = NodeKey(0);

    /// Key of the node page holding this node.
    pub fn page_key(self) -> u64 {
        self.0 >> crate::page::NDP_NODE_COUNT_EXPONENT
    }

    /// Slot of this node inside its node page.
    pub fn slot(self) -> usize {
        (self.0 & (crate::page::NDP_NODE_COUNT as u64 - 1)) as usize
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
