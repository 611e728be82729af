#![allow(missing_docs)]

use tempfile::tempdir;
use verso::access::{Database, DatabaseConfiguration, ResourceConfiguration};
use verso::node::{NameKind, Node};
use verso::page::{level_offset, Page, INP_LEVELS};
use verso::storage::{Reader, Storage};
use verso::types::{NodeKey, Result, VersoError};

/// Follows the indirect pages below `key` to the leaf stored for `tree_key`.
fn leaf(reader: &mut dyn Reader, mut key: u64, tree_key: u64) -> Result<Page> {
    for level in 0..INP_LEVELS {
        let page = reader.read(key)?.into_indirect()?;
        key = page
            .reference(level_offset(tree_key, level))
            .key()
            .ok_or(VersoError::NotFound("leaf"))?;
    }
    reader.read(key)
}

#[test]
fn single_element_is_found_by_walking_the_published_pages() -> Result<()> {
    let dir = tempdir()?;
    let config = DatabaseConfiguration::new(dir.path().join("db"))?;
    Database::create(&config)?;
    {
        let db = Database::open(config.file())?;
        db.create_resource(ResourceConfiguration::new("doc"))?;
        let session = db.open_session("doc")?;
        let mut wtx = session.begin_write_trx()?;
        assert_eq!(wtx.insert_element_as_first_child("a")?, NodeKey(1));
        assert_eq!(wtx.commit()?, 1);
        wtx.close()?;
    }

    let db = Database::open(config.file())?;
    let session = db.open_session("doc")?;
    let mut reader = session.storage().reader()?;
    let uber = reader
        .read_first_reference()?
        .take_page()
        .ok_or(VersoError::NotFound("uber page"))?
        .into_uber()?;
    assert_eq!(uber.revision(), 1);
    assert_eq!(uber.revision_count(), 2);

    let revisions = uber.revisions().key().ok_or(VersoError::NotFound("revisions"))?;
    let root = leaf(reader.as_mut(), revisions, 1)?.into_revision_root()?;
    assert_eq!(root.revision(), 1);
    assert_eq!(root.max_node_key(), 1);
    assert!(root.commit_timestamp() > 0);

    let names_key = root.names().key().ok_or(VersoError::NotFound("names"))?;
    let names = reader.read(names_key)?.into_name()?;
    let nodes_key = root.nodes().key().ok_or(VersoError::NotFound("nodes"))?;
    let page = leaf(reader.as_mut(), nodes_key, 0)?.into_node()?;
    assert_eq!(page.node_page_key(), 0);

    let Some(Node::Element(element)) = page.node(1) else {
        panic!("node 1 is not an element: {:?}", page.node(1));
    };
    assert_eq!(element.parent, NodeKey::DOCUMENT_ROOT);
    assert_eq!(names.name(element.name_key, NameKind::Element), Some("a"));
    assert_eq!(names.count(element.name_key, NameKind::Element), 1);
    match page.node(0) {
        Some(Node::DocumentRoot(doc)) => {
            assert_eq!(doc.links.first_child, Some(NodeKey(1)));
            assert_eq!(doc.links.child_count, 1);
        }
        other => panic!("unexpected document root record: {other:?}"),
    }
    reader.close()
}
