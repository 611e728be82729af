#![allow(missing_docs)]

use tempfile::{tempdir, TempDir};
use verso::access::{Database, DatabaseConfiguration, NodeRead, ResourceConfiguration, Session};
use verso::cache::{LogType, PageContainer, TransactionLogCache};
use verso::node::{Node, TextNode, StructLinks};
use verso::page::{NodePage, Page};
use verso::types::{NodeKey, Result};

fn container(page_key: u64, text: &str) -> PageContainer {
    let mut complete = NodePage::new(page_key, 1);
    let key = NodeKey(page_key * 128 + 1);
    complete.set_node(
        1,
        Node::Text(TextNode {
            key,
            parent: NodeKey::DOCUMENT_ROOT,
            links: StructLinks::default(),
            value: text.to_owned(),
        }),
    );
    let modified = complete.clone();
    PageContainer::new(Page::Node(complete), Page::Node(modified))
}

#[test]
fn evicted_entries_are_served_from_the_side_store() -> Result<()> {
    let dir = tempdir()?;
    let log = TransactionLogCache::open(dir.path(), LogType::Node, 1, 2)?;
    for key in 0..5 {
        log.put(key, container(key, &format!("v{key}")))?;
    }
    assert_eq!(log.len_in_memory(), 2);
    assert_eq!(log.len_persistent()?, 3);
    for key in 0..5 {
        assert_eq!(log.get(key)?, container(key, &format!("v{key}")), "key {key}");
    }
    assert!(log.get(99)?.is_empty());

    let found = log.get_all(0..7)?;
    assert_eq!(found.len(), 5);
    Ok(())
}

#[test]
fn latest_put_wins_across_tiers() -> Result<()> {
    let dir = tempdir()?;
    let log = TransactionLogCache::open(dir.path(), LogType::Path, 3, 1)?;
    log.put(7, container(7, "old"))?;
    log.put(8, container(8, "other"))?;
    log.put(7, container(7, "new"))?;
    assert_eq!(log.get(7)?, container(7, "new"));
    log.to_second_cache()?;
    log.put(8, container(8, "newer"))?;
    assert_eq!(log.get(7)?, container(7, "new"));
    assert_eq!(log.get(8)?, container(8, "newer"));
    Ok(())
}

#[test]
fn remove_and_clear_reach_both_tiers() -> Result<()> {
    let dir = tempdir()?;
    let log = TransactionLogCache::open(dir.path(), LogType::Node, 1, 1)?;
    log.put(1, container(1, "a"))?;
    log.put(2, container(2, "b"))?;
    log.remove(1)?;
    assert!(log.get(1)?.is_empty());
    assert!(!log.get(2)?.is_empty());
    log.put(3, container(3, "c"))?;
    log.clear()?;
    assert!(log.get(2)?.is_empty());
    assert!(log.get(3)?.is_empty());
    assert_eq!(log.len_persistent()?, 0);
    Ok(())
}

#[test]
fn close_deletes_the_side_store() -> Result<()> {
    let dir = tempdir()?;
    let log = TransactionLogCache::open(dir.path(), LogType::Node, 5, 4)?;
    let place = dir.path().join("node-5");
    assert!(place.is_dir());
    log.put(1, container(1, "a"))?;
    log.close()?;
    assert!(!place.exists());
    log.close()?;
    Ok(())
}

#[test]
fn zero_capacity_is_rejected() {
    let dir = tempdir().expect("tempdir");
    assert!(TransactionLogCache::open(dir.path(), LogType::Node, 1, 0).is_err());
}

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

#[test]
fn single_slot_logs_commit_documents_spanning_many_pages() -> Result<()> {
    let (_dir, _db, session) = resource(ResourceConfiguration::new("wide").log_cache_capacity(1))?;
    const CHILDREN: u64 = 300;

    let mut wtx = session.begin_write_trx()?;
    let root = wtx.insert_element_as_first_child("root")?;
    wtx.insert_element_as_first_child("item")?;
    for i in 1..CHILDREN {
        if i % 3 == 0 {
            wtx.insert_text_as_right_sibling(&format!("t{i}"))?;
        } else {
            wtx.insert_element_as_right_sibling("item")?;
        }
    }
    assert!(wtx.page_trx().log(verso::access::TreeKind::Nodes).len_persistent()? > 0);
    assert_eq!(wtx.commit()?, 1);
    wtx.close()?;

    let mut rtx = session.begin_read_trx(None)?;
    assert!(rtx.move_to(root)?);
    assert_eq!(rtx.child_count(), CHILDREN);
    assert!(rtx.move_to_first_child()?);
    let mut seen = 1;
    while rtx.move_to_right_sibling()? {
        seen += 1;
        if seen % 3 == 1 {
            assert_eq!(rtx.value(), Some(format!("t{}", seen - 1).as_str()));
        } else {
            assert_eq!(rtx.name().as_deref(), Some("item"));
        }
    }
    assert_eq!(seen, CHILDREN);
    assert!(rtx.max_node_key() >= CHILDREN + 1);
    Ok(())
}
