use std::path::Path;

use crate::access::{Database, Session};
use crate::admin::error::{AdminError, Result};

/// An open database together with a session on one of its resources.
///
/// The database is kept alive so its directory lock outlasts the session.
pub struct ResourceHandle {
    /// The locked database.
    pub database: Database,
    /// Session on the requested resource.
    pub session: Session,
}

/// Opens `resource` inside the database at `path`.
///
/// # Errors
///
/// Returns [`AdminError::MissingDatabase`] if `path` does not exist and
/// [`AdminError::UnknownResource`] if the resource is unknown.
pub fn open_resource(path: &Path, resource: &str) -> Result<ResourceHandle> {
    if !path.exists() {
        return Err(AdminError::missing_database(path));
    }
    let database = Database::open(path)?;
    if !database.resource_exists(resource) {
        return Err(AdminError::unknown_resource(path, resource));
    }
    let session = database.open_session(resource)?;
    Ok(ResourceHandle { database, session })
}
