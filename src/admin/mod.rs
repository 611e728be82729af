#![forbid(unsafe_code)]

//! Resource administration utilities.
//!
//! Reporting and integrity checks used by the `verso` binary. Every entry
//! point opens the database itself and holds its lock for the duration.

mod error;
mod stats;
mod util;
mod verify;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Statistics and revision listings.
pub use stats::{
    revisions, stats, NameSection, RevisionInfo, RevisionSection, StatsReport, StorageSection,
};

/// Opening a resource for administrative work.
pub use util::{open_resource, ResourceHandle};

/// Integrity verification.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyReport, VerifySeverity};
