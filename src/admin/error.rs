use std::path::{Path, PathBuf};

use crate::types::VersoError;
use thiserror::Error;

/// Failures of the administrative entry points.
#[derive(Debug, Error)]
pub enum AdminError {
    /// No database directory exists at the given path.
    #[error("database not found: {0}")]
    MissingDatabase(PathBuf),
    /// The database exists but holds no resource with that name.
    #[error("resource '{resource}' not found in {}", db.display())]
    UnknownResource {
        /// Requested resource name.
        resource: String,
        /// Database directory that was searched.
        db: PathBuf,
    },
    /// Error raised by the storage engine.
    #[error(transparent)]
    Core(#[from] VersoError),
}

/// Result alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_database(path: impl AsRef<Path>) -> Self {
        AdminError::MissingDatabase(path.as_ref().to_path_buf())
    }

    pub(crate) fn unknown_resource(db: &Path, resource: &str) -> Self {
        AdminError::UnknownResource {
            resource: resource.to_owned(),
            db: db.to_path_buf(),
        }
    }
}
