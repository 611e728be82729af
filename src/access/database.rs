//! Database directory management and resource sessions.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use parking_lot::Mutex;
use tracing::info;

use super::config::{
    DatabaseConfiguration, DatabasePaths, ResourceConfiguration, ResourcePaths, StructureCheck,
};
use super::page_write_trx::bootstrap;
use super::session::Session;
use crate::primitives::concurrency::DatabaseLock;
use crate::primitives::handler::{KeyMaterial, Pipeline};
use crate::storage;
use crate::types::{Result, VersoError};

/// An open database. Holds the directory lock until dropped.
pub struct Database {
    config: DatabaseConfiguration,
    sessions: Mutex<HashMap<String, Session>>,
    _lock: DatabaseLock,
}

impl Database {
    /// Creates the database directory layout. Returns `false` when the
    /// directory already holds anything.
    pub fn create(config: &DatabaseConfiguration) -> Result<bool> {
        let dir = config.file();
        if dir.exists() && fs::read_dir(dir)?.next().is_some() {
            return Ok(false);
        }
        fs::create_dir_all(dir)?;
        for entry in DatabasePaths::EXPECTED {
            if entry.is_folder() {
                fs::create_dir_all(config.path(entry))?;
            }
        }
        config.store()?;
        info!(path = %dir.display(), "database.create");
        Ok(true)
    }

    /// Opens the database at `path` and locks it against other processes.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match DatabasePaths::compare_structure(path)? {
            StructureCheck::Matching => {}
            other => {
                return Err(VersoError::Config(format!(
                    "{} is not a database directory ({other:?} entries than expected)",
                    path.display()
                )))
            }
        }
        let lock = DatabaseLock::acquire(path.join(DatabasePaths::Lock.file_name()))?;
        let config = DatabaseConfiguration::load(path)?;
        info!(path = %path.display(), "database.open");
        Ok(Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            _lock: lock,
        })
    }

    /// Deletes the database at `path`. Returns `false` when nothing was
    /// there; fails while another process holds it open.
    pub fn drop_database(path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(false);
        }
        let lock = DatabaseLock::acquire(path.join(DatabasePaths::Lock.file_name()))?;
        fs::remove_dir_all(path)?;
        drop(lock);
        info!(path = %path.display(), "database.drop");
        Ok(true)
    }

    /// Configuration of this database.
    pub fn config(&self) -> &DatabaseConfiguration {
        &self.config
    }

    /// Creates resource `config.name` and publishes its revision 0. Returns
    /// `false` when the resource already exists.
    pub fn create_resource(&self, config: ResourceConfiguration) -> Result<bool> {
        config.validate()?;
        let dir = self.config.resource_dir(&config.name);
        if dir.exists() {
            return Ok(false);
        }
        for entry in ResourcePaths::EXPECTED {
            if entry.is_folder() {
                fs::create_dir_all(dir.join(entry.file_name()))?;
            }
        }
        config.store(&dir)?;
        let key = if config.uses_encryption() {
            let key = KeyMaterial::generate();
            key.store(&self.config.key_file(&config.name))?;
            Some(key)
        } else {
            None
        };
        let pipeline = Pipeline::new(&config.byte_handlers, key.as_ref())?;
        let storage = storage::open(config.storage, &dir, pipeline)?;
        let mut writer = storage.writer()?;
        bootstrap(writer.as_mut())?;
        writer.close()?;
        info!(resource = %config.name, storage = config.storage.as_str(), "resource.create");
        Ok(true)
    }

    /// True when resource `name` exists.
    pub fn resource_exists(&self, name: &str) -> bool {
        self.config.resource_dir(name).is_dir()
    }

    /// Names of all resources, sorted.
    pub fn resources(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.config.path(DatabasePaths::Resources))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Session on resource `name`; repeated calls share one session.
    pub fn open_session(&self, name: &str) -> Result<Session> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(name) {
            return Ok(session.clone());
        }
        if !self.resource_exists(name) {
            return Err(VersoError::NotFound("resource"));
        }
        let dir = self.config.resource_dir(name);
        let config = ResourceConfiguration::load(&dir)?;
        let key = if config.uses_encryption() {
            Some(KeyMaterial::load(&self.config.key_file(name))?)
        } else {
            None
        };
        let session = Session::open(dir, config, key.as_ref())?;
        sessions.insert(name.to_owned(), session.clone());
        Ok(session)
    }
}
