#![allow(missing_docs)]

use std::fs;

use tempfile::tempdir;
use verso::access::{
    Database, DatabaseConfiguration, DatabasePaths, NodeRead, ResourceConfiguration,
    ResourcePaths, StructureCheck,
};
use verso::primitives::handler::ByteHandlerKind;
use verso::storage::StorageKind;
use verso::types::{Result, VersoError};

#[test]
fn create_lays_out_the_database_directory() -> Result<()> {
    let dir = tempdir()?;
    let config = DatabaseConfiguration::new(dir.path().join("db"))?;
    assert_eq!(
        DatabasePaths::compare_structure(config.file())?,
        StructureCheck::Fewer
    );
    assert!(Database::create(&config)?);
    assert!(!Database::create(&config)?);
    assert_eq!(
        DatabasePaths::compare_structure(config.file())?,
        StructureCheck::Matching
    );
    assert!(config.path(DatabasePaths::KeySelector).is_dir());
    assert!(config.path(DatabasePaths::Resources).is_dir());
    assert_eq!(DatabaseConfiguration::load(config.file())?, config);

    fs::write(config.file().join("stray.txt"), b"?")?;
    assert_eq!(
        DatabasePaths::compare_structure(config.file())?,
        StructureCheck::More
    );
    assert!(matches!(
        Database::open(config.file()),
        Err(VersoError::Config(_))
    ));
    Ok(())
}

#[test]
fn open_rejects_plain_directories() -> Result<()> {
    let dir = tempdir()?;
    assert!(matches!(
        Database::open(dir.path()),
        Err(VersoError::Config(_))
    ));
    assert!(matches!(
        Database::open(dir.path().join("missing")),
        Err(VersoError::Config(_))
    ));
    Ok(())
}

#[test]
fn resources_are_created_once_and_listed() -> Result<()> {
    let dir = tempdir()?;
    let config = DatabaseConfiguration::new(dir.path().join("db"))?;
    Database::create(&config)?;
    let db = Database::open(config.file())?;
    assert!(db.resources()?.is_empty());

    assert!(db.create_resource(ResourceConfiguration::new("zeta"))?);
    assert!(db.create_resource(ResourceConfiguration::new("alpha").storage(StorageKind::Kv))?);
    assert!(!db.create_resource(ResourceConfiguration::new("alpha"))?);
    assert_eq!(db.resources()?, vec!["alpha".to_string(), "zeta".to_string()]);
    assert!(db.resource_exists("zeta"));
    assert!(!db.resource_exists("omega"));
    assert!(matches!(
        db.open_session("omega"),
        Err(VersoError::NotFound("resource"))
    ));

    let resource_dir = config.resource_dir("alpha");
    assert_eq!(
        ResourcePaths::compare_structure(&resource_dir)?,
        StructureCheck::Matching
    );
    let stored = ResourceConfiguration::load(&resource_dir)?;
    assert_eq!(stored.storage, StorageKind::Kv);
    assert_eq!(stored.name, "alpha");

    let session = db.open_session("alpha")?;
    assert_eq!(session.most_recent_revision()?, 0);
    assert_eq!(db.open_session("alpha")?.resource_dir(), session.resource_dir());
    Ok(())
}

#[test]
fn invalid_resource_settings_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let config = DatabaseConfiguration::new(dir.path().join("db"))?;
    Database::create(&config)?;
    let db = Database::open(config.file())?;
    for bad in [
        ResourceConfiguration::new(""),
        ResourceConfiguration::new("a/b"),
        ResourceConfiguration::new("w").revisions_to_restore(0),
        ResourceConfiguration::new("c").log_cache_capacity(0),
    ] {
        assert!(matches!(db.create_resource(bad), Err(VersoError::Config(_))));
    }
    assert!(db.resources()?.is_empty());
    Ok(())
}

#[test]
fn encrypted_resource_round_trips_through_reopen() -> Result<()> {
    let dir = tempdir()?;
    let config = DatabaseConfiguration::new(dir.path().join("db"))?;
    Database::create(&config)?;
    {
        let db = Database::open(config.file())?;
        let resource = ResourceConfiguration::new("secret")
            .byte_handlers(vec![ByteHandlerKind::Snappy, ByteHandlerKind::Encryptor]);
        assert!(db.create_resource(resource)?);
        let session = db.open_session("secret")?;
        let mut wtx = session.begin_write_trx()?;
        wtx.insert_element_as_first_child("vault")?;
        wtx.insert_text_as_first_child("plaintext marker")?;
        wtx.commit()?;
        wtx.close()?;
    }
    assert!(config.key_file("secret").is_file());
    let data = fs::read(
        config
            .resource_dir("secret")
            .join(ResourcePaths::Data.file_name())
            .join("resource.data"),
    )?;
    assert!(!data.windows(16).any(|w| w == b"plaintext marker"));

    let db = Database::open(config.file())?;
    let session = db.open_session("secret")?;
    let mut rtx = session.begin_read_trx(None)?;
    assert!(rtx.move_to_first_child()?);
    assert_eq!(rtx.name().as_deref(), Some("vault"));
    assert!(rtx.move_to_first_child()?);
    assert_eq!(rtx.value(), Some("plaintext marker"));
    Ok(())
}

#[test]
fn drop_database_removes_everything_once() -> Result<()> {
    let dir = tempdir()?;
    let config = DatabaseConfiguration::new(dir.path().join("db"))?;
    Database::create(&config)?;
    {
        let db = Database::open(config.file())?;
        db.create_resource(ResourceConfiguration::new("doc"))?;
    }
    assert!(Database::drop_database(config.file())?);
    assert!(!config.file().exists());
    assert!(!Database::drop_database(config.file())?);
    assert!(Database::create(&config)?);
    Ok(())
}

#[test]
fn database_is_opened_once_per_process() -> Result<()> {
    let dir = tempdir()?;
    let config = DatabaseConfiguration::new(dir.path().join("db"))?;
    Database::create(&config)?;
    let db = Database::open(config.file())?;
    db.create_resource(ResourceConfiguration::new("doc"))?;

    assert!(matches!(
        Database::open(config.file()),
        Err(VersoError::Invalid(_))
    ));
    assert!(matches!(
        Database::open(dir.path().join(".").join("db")),
        Err(VersoError::Invalid(_))
    ));
    assert!(matches!(
        Database::drop_database(config.file()),
        Err(VersoError::Invalid(_))
    ));
    assert!(config.resource_dir("doc").is_dir());

    // The refused attempts must not have released the held lock.
    let mut wtx = db.open_session("doc")?.begin_write_trx()?;
    wtx.insert_element_as_first_child("kept")?;
    assert_eq!(wtx.commit()?, 1);
    wtx.close()?;
    drop(db);

    let db = Database::open(config.file())?;
    let mut rtx = db.open_session("doc")?.begin_read_trx(None)?;
    assert!(rtx.move_to_first_child()?);
    assert_eq!(rtx.name().as_deref(), Some("kept"));
    drop(rtx);
    drop(db);
    assert!(Database::drop_database(config.file())?);
    Ok(())
}
