#![allow(missing_docs)]

use std::sync::Barrier;
use std::thread;

use tempfile::{tempdir, TempDir};
use verso::access::{
    Database, DatabaseConfiguration, NodeRead, NodeReadTrx, ResourceConfiguration, Session,
    Versioning,
};
use verso::types::{NodeKey, Result, VersoError};

fn resource(config: ResourceConfiguration) -> Result<(TempDir, Database, Session)> {
    let dir = tempdir()?;
    let db_config = DatabaseConfiguration::new(dir.path().join("db"))?;
    assert!(Database::create(&db_config)?);
    let db = Database::open(db_config.file())?;
    let name = config.name.clone();
    assert!(db.create_resource(config)?);
    let session = db.open_session(&name)?;
    Ok((dir, db, session))
}

/// Pre-order dump of the document: `name`, `@name=value` and `"text"`.
fn snapshot(rtx: &mut NodeReadTrx) -> Result<Vec<String>> {
    let mut out = Vec::new();
    rtx.move_to_document_root()?;
    if !rtx.move_to_first_child()? {
        return Ok(out);
    }
    loop {
        match rtx.value() {
            Some(text) if rtx.name().is_none() => out.push(format!("{text:?}")),
            _ => out.push(rtx.name().unwrap_or_default()),
        }
        let here = rtx.node_key();
        for i in 0..rtx.attribute_count() {
            rtx.move_to_attribute(i)?;
            out.push(format!(
                "@{}={}",
                rtx.name().unwrap_or_default(),
                rtx.value().unwrap_or_default()
            ));
            rtx.move_to(here)?;
        }
        if rtx.move_to_first_child()? {
            continue;
        }
        while !rtx.move_to_right_sibling()? {
            if !rtx.move_to_parent()? || rtx.node_key() == NodeKey::DOCUMENT_ROOT {
                return Ok(out);
            }
        }
    }
}

#[test]
fn readers_keep_their_revision_while_the_writer_commits() -> Result<()> {
    let (_dir, _db, session) = resource(ResourceConfiguration::new("doc"))?;
    let mut wtx = session.begin_write_trx()?;
    wtx.insert_element_as_first_child("a")?;
    wtx.insert_text_as_first_child("first")?;
    assert_eq!(wtx.commit()?, 1);

    let mut pinned = session.begin_read_trx(Some(1))?;
    let expected = snapshot(&mut pinned)?;
    assert_eq!(expected, vec!["a".to_string(), "\"first\"".to_string()]);

    let readers = 4;
    let barrier = Barrier::new(readers + 1);
    thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::new();
        for _ in 0..readers {
            let session = session.clone();
            let barrier = &barrier;
            let expected = &expected;
            handles.push(scope.spawn(move || -> Result<()> {
                let mut rtx = session.begin_read_trx(Some(1))?;
                barrier.wait();
                for _ in 0..50 {
                    assert_eq!(&snapshot(&mut rtx)?, expected);
                    assert_eq!(rtx.revision_number(), 1);
                }
                Ok(())
            }));
        }
        barrier.wait();
        for round in 0..5 {
            wtx.move_to_document_root()?;
            wtx.move_to_first_child()?;
            wtx.insert_attribute(&format!("r{round}"), "x")?;
            wtx.move_to_parent()?;
            wtx.move_to_first_child()?;
            wtx.set_value(&format!("round {round}"))?;
            wtx.commit()?;
        }
        for handle in handles {
            handle.join().expect("reader thread panicked")?;
        }
        Ok(())
    })?;

    assert_eq!(snapshot(&mut pinned)?, expected);
    assert_eq!(session.most_recent_revision()?, 6);
    let mut latest = session.begin_read_trx(None)?;
    let now = snapshot(&mut latest)?;
    assert_eq!(now.first().map(String::as_str), Some("a"));
    assert_eq!(now.len(), 1 + 5 + 1);
    assert_eq!(now.last().map(String::as_str), Some("\"round 4\""));
    wtx.close()?;
    Ok(())
}

#[test]
fn only_one_writer_at_a_time() -> Result<()> {
    let (_dir, _db, session) = resource(ResourceConfiguration::new("doc"))?;
    let first = session.begin_write_trx()?;
    assert!(matches!(
        session.begin_write_trx(),
        Err(VersoError::Invalid("writer already active"))
    ));
    first.close()?;
    let second = session.begin_write_trx()?;
    drop(second);
    session.begin_write_trx()?.close()
}

fn history_survives_window(config: ResourceConfiguration) -> Result<()> {
    let (_dir, _db, session) = resource(config)?;
    let mut wtx = session.begin_write_trx()?;
    wtx.insert_element_as_first_child("log")?;
    let text = wtx.insert_text_as_first_child("v0")?;
    wtx.commit()?;
    for version in 1..=9 {
        wtx.move_to(text)?;
        wtx.set_value(&format!("v{version}"))?;
        wtx.commit()?;
    }
    wtx.close()?;

    assert_eq!(session.most_recent_revision()?, 10);
    for revision in 1..=10 {
        let mut rtx = session.begin_read_trx(Some(revision))?;
        assert!(rtx.move_to(text)?);
        let want = format!("v{}", revision - 1);
        assert_eq!(rtx.value(), Some(want.as_str()), "revision {revision}");
    }
    let mut before = session.begin_read_trx(Some(0))?;
    assert!(!before.move_to(text)?);
    Ok(())
}

#[test]
fn incremental_history_survives_full_dumps() -> Result<()> {
    history_survives_window(ResourceConfiguration::new("inc").revisions_to_restore(3))
}

#[test]
fn full_versioning_keeps_every_revision() -> Result<()> {
    history_survives_window(ResourceConfiguration::new("full").versioning(Versioning::Full))
}

#[test]
fn removed_nodes_disappear_only_from_later_revisions() -> Result<()> {
    let (_dir, _db, session) = resource(ResourceConfiguration::new("doc").revisions_to_restore(2))?;
    let mut wtx = session.begin_write_trx()?;
    wtx.insert_element_as_first_child("list")?;
    let first = wtx.insert_element_as_first_child("x")?;
    let second = wtx.insert_element_as_right_sibling("y")?;
    wtx.commit()?;
    wtx.move_to(first)?;
    wtx.remove()?;
    assert_eq!(wtx.node_key(), second);
    wtx.commit()?;
    assert!(matches!(wtx.set_value("ignored"), Err(VersoError::Invalid(_))));
    for _ in 0..3 {
        wtx.commit()?;
    }
    wtx.close()?;

    let mut old = session.begin_read_trx(Some(1))?;
    assert!(old.move_to(first)?);
    let mut new = session.begin_read_trx(None)?;
    assert!(!new.move_to(first)?);
    assert!(new.move_to(second)?);
    assert_eq!(new.node().links().and_then(|l| l.left_sibling), None);
    Ok(())
}
