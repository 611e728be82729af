#![allow(missing_docs)]

use std::fs;
use std::sync::Arc;

use tempfile::tempdir;
use verso::node::{
    AttributeNode, ElementNode, NameKind, NamespaceNode, Node, NodeKind, PathNode, StructLinks,
    TextNode,
};
use verso::page::{self, NamePage, NodePage, Page, PageReference, UberPage};
use verso::primitives::handler::{ByteHandlerKind, KeyMaterial, Pipeline};
use verso::storage::{FileStorage, Storage};
use verso::types::{NodeKey, Result, VersoError};

fn sample_page() -> NodePage {
    let mut nodes = NodePage::new(0, 3);
    nodes.set_node(
        1,
        Node::Element(ElementNode {
            key: NodeKey(1),
            parent: NodeKey::DOCUMENT_ROOT,
            links: StructLinks {
                first_child: Some(NodeKey(4)),
                left_sibling: None,
                right_sibling: None,
                child_count: 1,
            },
            name_key: page::name_key("catalog"),
            path_node_key: NodeKey(1),
            attributes: vec![NodeKey(2)],
            namespaces: vec![NodeKey(3)],
        }),
    );
    nodes.set_node(
        2,
        Node::Attribute(AttributeNode {
            key: NodeKey(2),
            parent: NodeKey(1),
            name_key: page::name_key("lang"),
            path_node_key: NodeKey(2),
            value: "en".into(),
        }),
    );
    nodes.set_node(
        3,
        Node::Namespace(NamespaceNode {
            key: NodeKey(3),
            parent: NodeKey(1),
            prefix_key: page::name_key("x"),
            uri_key: page::name_key("urn:x"),
            path_node_key: NodeKey(3),
        }),
    );
    nodes.set_node(
        4,
        Node::Text(TextNode {
            key: NodeKey(4),
            parent: NodeKey(1),
            links: StructLinks::default(),
            value: "grüße, world".into(),
        }),
    );
    nodes.set_node(5, Node::Deleted(NodeKey(5)));
    nodes
}

#[test]
fn node_page_keeps_every_record_kind() -> Result<()> {
    let original = Page::Node(sample_page());
    let restored = page::deserialize(&page::serialize(&original))?;
    assert_eq!(restored, original);
    let restored = restored.into_node()?;
    assert_eq!(restored.len(), 5);
    assert!(restored.node(5).is_some_and(Node::is_deleted));
    assert_eq!(restored.node(4).and_then(Node::value), Some("grüße, world"));
    Ok(())
}

#[test]
fn name_page_keeps_counts() -> Result<()> {
    let mut names = NamePage::new(2);
    for _ in 0..3 {
        names.set_name("item", NameKind::Element);
    }
    names.set_name("id", NameKind::Attribute);
    let restored = page::deserialize(&page::serialize(&Page::Name(names.clone())))?.into_name()?;
    assert_eq!(restored, names);
    assert_eq!(restored.count(page::name_key("item"), NameKind::Element), 3);
    assert_eq!(restored.name(page::name_key("id"), NameKind::Attribute), Some("id"));
    Ok(())
}

#[test]
fn path_records_keep_their_kind_and_level() -> Result<()> {
    let mut paths = NodePage::new(0, 1);
    paths.set_node(
        7,
        Node::Path(PathNode {
            key: NodeKey(7),
            parent: Some(NodeKey(2)),
            links: StructLinks::default(),
            name_key: page::name_key("id"),
            path_kind: NodeKind::Attribute,
            references: 12,
            level: 3,
        }),
    );
    let restored = page::deserialize(&page::serialize(&Page::Node(paths)))?.into_node()?;
    let path = restored.node(7).and_then(Node::as_path).cloned();
    assert_eq!(
        path.map(|p| (p.path_kind, p.references, p.level)),
        Some((NodeKind::Attribute, 12, 3))
    );
    Ok(())
}

#[test]
fn damaged_bytes_are_reported_as_corruption() {
    let revisions = PageReference::persisted(8, page::PageKind::Indirect);
    let bytes = page::serialize(&Page::Uber(UberPage::new(4, 5, 99, revisions)));
    for at in [0, 3, bytes.len() / 2, bytes.len() - 1] {
        let mut damaged = bytes.clone();
        damaged[at] ^= 0x20;
        assert!(
            matches!(page::deserialize(&damaged), Err(VersoError::Corruption(_))),
            "flip at {at} went unnoticed"
        );
    }
    assert!(page::deserialize(&bytes[..bytes.len() - 2]).is_err());
}

#[test]
fn encrypted_records_hide_plaintext_and_need_the_key() -> Result<()> {
    let dir = tempdir()?;
    let key = KeyMaterial::generate();
    let kinds = [ByteHandlerKind::Snappy, ByteHandlerKind::Encryptor];
    let storage = FileStorage::new(dir.path(), Arc::new(Pipeline::new(&kinds, Some(&key))?));

    let mut writer = storage.writer()?;
    let stored = writer.write(&Page::Node(sample_page()))?;
    writer.close()?;

    let raw = fs::read(storage.path())?;
    let needle = "grüße, world".as_bytes();
    assert!(!raw.windows(needle.len()).any(|w| w == needle));

    let mut reader = storage.reader()?;
    assert_eq!(reader.read(stored)?, Page::Node(sample_page()));

    let stranger = FileStorage::new(
        dir.path(),
        Arc::new(Pipeline::new(&kinds, Some(&KeyMaterial::generate()))?),
    );
    assert!(stranger.reader()?.read(stored).is_err());
    Ok(())
}
