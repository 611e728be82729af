//! Database and resource configuration, persisted as JSON next to the data.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::primitives::handler::ByteHandlerKind;
use crate::storage::StorageKind;
use crate::types::{Result, VersoError};

/// Format version written into every resource configuration.
pub const BINARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How node pages are versioned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Versioning {
    /// Every modified node page is written in full.
    Full,
    /// Modified node pages are deltas, with a full dump once the chain
    /// reaches `revisions_to_restore` versions.
    Incremental,
}

/// Result of comparing a directory against its expected layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureCheck {
    /// Some expected entries are missing.
    Fewer,
    /// Exactly the expected entries are present.
    Matching,
    /// All expected entries plus unknown ones are present.
    More,
}

fn compare_entries(dir: &Path, expected: &[&str], ignored: &[&str]) -> Result<StructureCheck> {
    if !dir.is_dir() {
        return Ok(StructureCheck::Fewer);
    }
    let (mut present, mut extra) = (0usize, 0usize);
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if ignored.contains(&name.as_ref()) {
            continue;
        }
        if expected.contains(&name.as_ref()) {
            present += 1;
        } else {
            extra += 1;
        }
    }
    Ok(if present < expected.len() {
        StructureCheck::Fewer
    } else if extra > 0 {
        StructureCheck::More
    } else {
        StructureCheck::Matching
    })
}

/// Entries of a database directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatabasePaths {
    /// `dbsetting.obj`, the database configuration.
    ConfigBinary,
    /// `keyselector/`, per-resource key material.
    KeySelector,
    /// `resources/`, one directory per resource.
    Resources,
    /// `.lock`, held while the database is open.
    Lock,
}

impl DatabasePaths {
    /// Entries created by [`crate::access::Database::create`].
    pub const EXPECTED: [DatabasePaths; 3] = [
        DatabasePaths::ConfigBinary,
        DatabasePaths::KeySelector,
        DatabasePaths::Resources,
    ];

    /// Name of the entry inside the database directory.
    pub fn file_name(self) -> &'static str {
        match self {
            DatabasePaths::ConfigBinary => "dbsetting.obj",
            DatabasePaths::KeySelector => "keyselector",
            DatabasePaths::Resources => "resources",
            DatabasePaths::Lock => ".lock",
        }
    }

    /// True for directories.
    pub fn is_folder(self) -> bool {
        matches!(self, DatabasePaths::KeySelector | DatabasePaths::Resources)
    }

    /// Compares `dir` against the expected database layout, ignoring `.lock`.
    pub fn compare_structure(dir: &Path) -> Result<StructureCheck> {
        let expected: Vec<&str> = Self::EXPECTED.iter().map(|p| p.file_name()).collect();
        compare_entries(dir, &expected, &[DatabasePaths::Lock.file_name()])
    }
}

/// Entries of a resource directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourcePaths {
    /// `ressetting.obj`, the resource configuration.
    ConfigBinary,
    /// `data/`, backend files.
    Data,
    /// `log/`, transaction-log side stores.
    TransactionLog,
}

impl ResourcePaths {
    /// Entries created with a resource.
    pub const EXPECTED: [ResourcePaths; 3] = [
        ResourcePaths::ConfigBinary,
        ResourcePaths::Data,
        ResourcePaths::TransactionLog,
    ];

    /// Name of the entry inside the resource directory.
    pub fn file_name(self) -> &'static str {
        match self {
            ResourcePaths::ConfigBinary => "ressetting.obj",
            ResourcePaths::Data => "data",
            ResourcePaths::TransactionLog => "log",
        }
    }

    /// True for directories.
    pub fn is_folder(self) -> bool {
        !matches!(self, ResourcePaths::ConfigBinary)
    }

    /// Compares `dir` against the expected resource layout.
    pub fn compare_structure(dir: &Path) -> Result<StructureCheck> {
        let expected: Vec<&str> = Self::EXPECTED.iter().map(|p| p.file_name()).collect();
        compare_entries(dir, &expected, &[])
    }
}

fn read_config(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => VersoError::Config(format!("missing {}", path.display())),
        _ => VersoError::Io(err),
    })
}

/// Location of a database; persisted as `{"file": "<absolute path>"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfiguration {
    file: PathBuf,
}

impl DatabaseConfiguration {
    /// Configuration for the database at `path`, made absolute.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(Self { file })
    }

    /// Database directory.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Path of a database entry.
    pub fn path(&self, entry: DatabasePaths) -> PathBuf {
        self.file.join(entry.file_name())
    }

    /// Directory of resource `name`.
    pub fn resource_dir(&self, name: &str) -> PathBuf {
        self.path(DatabasePaths::Resources).join(name)
    }

    /// Key file of resource `name`.
    pub fn key_file(&self, name: &str) -> PathBuf {
        self.path(DatabasePaths::KeySelector)
            .join(format!("{name}.key"))
    }

    /// Writes `dbsetting.obj`.
    pub fn store(&self) -> Result<()> {
        fs::write(
            self.path(DatabasePaths::ConfigBinary),
            serde_json::to_vec_pretty(self)?,
        )?;
        Ok(())
    }

    /// Reads `dbsetting.obj` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let raw = read_config(&dir.join(DatabasePaths::ConfigBinary.file_name()))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Per-resource settings fixed at creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfiguration {
    /// Resource name; also its directory name.
    pub name: String,
    /// Storage backend.
    pub storage: StorageKind,
    /// Byte handlers applied to every record, in write order.
    pub byte_handlers: Vec<ByteHandlerKind>,
    /// Node page versioning.
    pub versioning: Versioning,
    /// Longest node page chain a reader reconstructs.
    pub revisions_to_restore: u32,
    /// Tier-1 capacity of each transaction log.
    pub log_cache_capacity: usize,
    /// Reader page cache capacity.
    pub page_cache_capacity: usize,
    /// Version of the crate that created the resource.
    pub binary_version: String,
}

impl Default for ResourceConfiguration {
    fn default() -> Self {
        Self {
            name: String::new(),
            storage: StorageKind::File,
            byte_handlers: vec![ByteHandlerKind::Snappy],
            versioning: Versioning::Incremental,
            revisions_to_restore: 4,
            log_cache_capacity: 1024,
            page_cache_capacity: 256,
            binary_version: BINARY_VERSION.to_owned(),
        }
    }
}

impl ResourceConfiguration {
    /// Defaults for a resource called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the storage backend.
    pub fn storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the byte handler pipeline.
    pub fn byte_handlers(mut self, handlers: Vec<ByteHandlerKind>) -> Self {
        self.byte_handlers = handlers;
        self
    }

    /// Sets the versioning strategy.
    pub fn versioning(mut self, versioning: Versioning) -> Self {
        self.versioning = versioning;
        self
    }

    /// Sets the sliding window.
    pub fn revisions_to_restore(mut self, revisions: u32) -> Self {
        self.revisions_to_restore = revisions;
        self
    }

    /// Sets the tier-1 capacity of the transaction logs.
    pub fn log_cache_capacity(mut self, capacity: usize) -> Self {
        self.log_cache_capacity = capacity;
        self
    }

    /// Sets the reader page cache capacity.
    pub fn page_cache_capacity(mut self, capacity: usize) -> Self {
        self.page_cache_capacity = capacity;
        self
    }

    /// Maximum node page chain length.
    pub fn window(&self) -> usize {
        match self.versioning {
            Versioning::Full => 1,
            Versioning::Incremental => self.revisions_to_restore as usize,
        }
    }

    /// True when records are encrypted.
    pub fn uses_encryption(&self) -> bool {
        self.byte_handlers.contains(&ByteHandlerKind::Encryptor)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
        {
            return Err(VersoError::Config(format!("invalid resource name {name:?}")));
        }
        if self.revisions_to_restore == 0 {
            return Err(VersoError::Config("revisions_to_restore must be at least 1".into()));
        }
        if self.log_cache_capacity == 0 || self.page_cache_capacity == 0 {
            return Err(VersoError::Config("cache capacities must be positive".into()));
        }
        Ok(())
    }

    /// Writes `ressetting.obj` into `resource_dir`.
    pub fn store(&self, resource_dir: &Path) -> Result<()> {
        fs::write(
            resource_dir.join(ResourcePaths::ConfigBinary.file_name()),
            serde_json::to_vec_pretty(self)?,
        )?;
        Ok(())
    }

    /// Reads `ressetting.obj` from `resource_dir`.
    pub fn load(resource_dir: &Path) -> Result<Self> {
        let raw = read_config(&resource_dir.join(ResourcePaths::ConfigBinary.file_name()))?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn database_configuration_json_shape() -> Result<()> {
        let dir = tempdir()?;
        let config = DatabaseConfiguration::new(dir.path())?;
        fs::create_dir_all(config.file())?;
        config.store()?;
        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(config.path(DatabasePaths::ConfigBinary))?)?;
        assert_eq!(raw["file"], serde_json::json!(dir.path()));
        assert_eq!(DatabaseConfiguration::load(dir.path())?, config);
        Ok(())
    }

    #[test]
    fn missing_and_malformed_configs_are_config_errors() -> Result<()> {
        let dir = tempdir()?;
        assert!(matches!(
            DatabaseConfiguration::load(dir.path()),
            Err(VersoError::Config(_))
        ));
        fs::write(dir.path().join("ressetting.obj"), b"{ not json")?;
        assert!(matches!(
            ResourceConfiguration::load(dir.path()),
            Err(VersoError::Config(_))
        ));
        Ok(())
    }

    #[test]
    fn partial_resource_json_takes_defaults() -> Result<()> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("ressetting.obj"),
            br#"{"name": "shop", "storage": "kv", "versioning": "full"}"#,
        )?;
        let config = ResourceConfiguration::load(dir.path())?;
        assert_eq!(config.storage, StorageKind::Kv);
        assert_eq!(config.window(), 1);
        assert_eq!(config.byte_handlers, vec![ByteHandlerKind::Snappy]);
        Ok(())
    }

    #[test]
    fn validation_rejects_bad_names_and_windows() {
        assert!(ResourceConfiguration::new("a/b").validate().is_err());
        assert!(ResourceConfiguration::new("").validate().is_err());
        assert!(ResourceConfiguration::new("ok")
            .revisions_to_restore(0)
            .validate()
            .is_err());
        assert!(ResourceConfiguration::new("ok").validate().is_ok());
    }

    #[test]
    fn structure_check_is_tri_state() -> Result<()> {
        let dir = tempdir()?;
        assert_eq!(DatabasePaths::compare_structure(dir.path())?, StructureCheck::Fewer);
        fs::write(dir.path().join("dbsetting.obj"), b"{}")?;
        fs::create_dir(dir.path().join("keyselector"))?;
        fs::create_dir(dir.path().join("resources"))?;
        fs::write(dir.path().join(".lock"), b"")?;
        assert_eq!(DatabasePaths::compare_structure(dir.path())?, StructureCheck::Matching);
        fs::write(dir.path().join("stray"), b"")?;
        assert_eq!(DatabasePaths::compare_structure(dir.path())?, StructureCheck::More);
        Ok(())
    }
}
