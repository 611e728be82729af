#![forbid(unsafe_code)]
//! Transactions, sessions and the database directory.
//!
//! [`Database`] owns the on-disk layout and hands out one [`Session`] per
//! resource. Sessions open [`NodeReadTrx`] cursors on any committed
//! revision and at most one [`NodeWriteTrx`], which builds the next
//! revision through a copy-on-write [`PageWriteTrx`].

mod config;
mod database;
mod node_trx;
mod node_write_trx;
mod page_read_trx;
mod page_write_trx;
mod path_summary;
mod session;
mod source;

pub use config::{
    DatabaseConfiguration, DatabasePaths, ResourceConfiguration, ResourcePaths, StructureCheck,
    Versioning, BINARY_VERSION,
};
pub use database::Database;
pub use node_trx::{NodeRead, NodeReadTrx};
pub use node_write_trx::NodeWriteTrx;
pub use page_read_trx::{PageAccess, PageReadTrx};
pub use page_write_trx::{PageWriteTrx, TreeKind};
pub use path_summary::PathSummary;
pub use session::Session;
