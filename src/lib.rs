//! verso: a versioned, tree-structured document store.
//!
//! Every commit publishes an immutable revision. Pages are copy-on-write,
//! node pages are stored as deltas within a sliding window, and a single
//! atomically rewritten first reference names the latest revision.

#![warn(missing_docs)]

pub mod access;
pub mod admin;
pub mod cache;
pub mod node;
pub mod page;
pub mod primitives;
pub mod storage;
pub mod types;

pub use access::{
    Database, DatabaseConfiguration, NodeRead, NodeReadTrx, NodeWriteTrx, ResourceConfiguration,
    Session,
};
pub use types::{NodeKey, Result, VersoError};
