#![allow(missing_docs)]

use std::collections::BTreeMap;

use tempfile::{tempdir, TempDir};
use verso::access::{
    Database, DatabaseConfiguration, NodeRead, PageAccess, ResourceConfiguration, Session,
};
use verso::node::NameKind;
use verso::types::{NodeKey, Result};

fn resource() -> Result<(TempDir, Database, Session)> {
    let dir = tempdir()?;
    let config = DatabaseConfiguration::new(dir.path().join("db"))?;
    Database::create(&config)?;
    let db = Database::open(config.file())?;
    db.create_resource(ResourceConfiguration::new("doc"))?;
    let session = db.open_session("doc")?;
    Ok((dir, db, session))
}

/// Every path of `revision` with its reference count.
fn paths(session: &Session, revision: Option<u32>) -> Result<BTreeMap<String, u64>> {
    let mut summary = session.open_path_summary(revision)?;
    let mut out = BTreeMap::new();
    for node in summary.descendants()? {
        assert!(summary.move_to(node.key)?);
        out.insert(summary.path()?, node.references);
    }
    Ok(out)
}

fn expect(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
    pairs.iter().map(|&(p, n)| (p.to_string(), n)).collect()
}

#[test]
fn fresh_resource_has_only_the_document_root_path() -> Result<()> {
    let (_dir, _db, session) = resource()?;
    let summary = session.open_path_summary(None)?;
    assert_eq!(summary.node().key, NodeKey::DOCUMENT_ROOT);
    assert_eq!(summary.node().level, 0);
    assert_eq!(summary.name(), None);
    assert!(summary.descendants()?.is_empty());
    Ok(())
}

#[test]
fn paths_follow_inserts_removes_and_renames() -> Result<()> {
    let (_dir, _db, session) = resource()?;
    let mut wtx = session.begin_write_trx()?;
    wtx.insert_element_as_first_child("r")?;
    let first = wtx.insert_element_as_first_child("a")?;
    wtx.insert_attribute("id", "1")?;
    wtx.move_to_parent()?;
    let second = wtx.insert_element_as_right_sibling("a")?;
    let b = wtx.insert_element_as_right_sibling("b")?;
    assert_eq!(wtx.commit()?, 1);
    assert_eq!(
        paths(&session, None)?,
        expect(&[("/r", 1), ("/r/a", 2), ("/r/a/@id", 1), ("/r/b", 1)])
    );

    wtx.move_to(b)?;
    wtx.remove()?;
    wtx.move_to(second)?;
    wtx.rename("c")?;
    assert_eq!(wtx.commit()?, 2);
    assert_eq!(
        paths(&session, None)?,
        expect(&[("/r", 1), ("/r/a", 1), ("/r/a/@id", 1), ("/r/c", 1)])
    );

    wtx.move_to(first)?;
    wtx.rename("c")?;
    assert_eq!(wtx.commit()?, 3);
    wtx.close()?;
    assert_eq!(
        paths(&session, None)?,
        expect(&[("/r", 1), ("/r/c", 2), ("/r/c/@id", 1)])
    );

    let mut rtx = session.begin_read_trx(None)?;
    assert!(rtx.move_to(first)?);
    assert_eq!(rtx.name().as_deref(), Some("c"));
    let name_key = rtx.node().name_key().unwrap_or_default();
    assert_eq!(rtx.page_trx().name_count(name_key, NameKind::Element), 2);
    let r = rtx.node().parent().unwrap_or(NodeKey::DOCUMENT_ROOT);
    assert!(rtx.move_to(r)?);
    assert_eq!(rtx.child_count(), 2);

    assert_eq!(
        paths(&session, Some(1))?,
        expect(&[("/r", 1), ("/r/a", 2), ("/r/a/@id", 1), ("/r/b", 1)])
    );
    Ok(())
}

#[test]
fn namespaces_and_levels_are_tracked() -> Result<()> {
    let (_dir, _db, session) = resource()?;
    let mut wtx = session.begin_write_trx()?;
    wtx.insert_element_as_first_child("root")?;
    wtx.insert_namespace("p", "urn:example")?;
    wtx.move_to_parent()?;
    wtx.insert_element_as_first_child("leaf")?;
    wtx.insert_text_as_first_child("text nodes have no path")?;
    wtx.commit()?;
    wtx.close()?;

    assert_eq!(
        paths(&session, None)?,
        expect(&[("/root", 1), ("/root/xmlns:p", 1), ("/root/leaf", 1)])
    );
    let mut summary = session.open_path_summary(None)?;
    assert!(summary.move_to_first_child()?);
    assert_eq!(summary.name().as_deref(), Some("root"));
    assert_eq!(summary.node().level, 1);
    assert!(summary.move_to_first_child()?);
    assert_eq!(summary.node().level, 2);
    assert!(summary.move_to_parent()?);
    assert!(summary.move_to_parent()?);
    assert!(!summary.move_to_parent()?);
    Ok(())
}

#[test]
fn removing_a_subtree_prunes_its_paths() -> Result<()> {
    let (_dir, _db, session) = resource()?;
    let mut wtx = session.begin_write_trx()?;
    wtx.insert_element_as_first_child("r")?;
    let outer = wtx.insert_element_as_first_child("outer")?;
    wtx.insert_element_as_first_child("inner")?;
    wtx.insert_attribute("k", "v")?;
    wtx.move_to(outer)?;
    wtx.insert_element_as_right_sibling("keep")?;
    wtx.commit()?;

    wtx.move_to(outer)?;
    wtx.remove()?;
    assert_eq!(wtx.name().as_deref(), Some("keep"));
    wtx.commit()?;
    wtx.close()?;
    assert_eq!(paths(&session, None)?, expect(&[("/r", 1), ("/r/keep", 1)]));
    assert_eq!(
        paths(&session, Some(1))?.get("/r/outer/inner/@k"),
        Some(&1)
    );
    Ok(())
}
