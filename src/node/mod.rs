#![forbid(unsafe_code)]
//! Node records stored in node pages: document nodes and path-summary nodes.

use std::convert::TryFrom;

use crate::primitives::bytes::{buf::Cursor, var};
use crate::types::{NodeKey, Result, VersoError};

/// Wire tag of a node record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    /// The root of every document tree.
    DocumentRoot = 1,
    /// An element.
    Element = 2,
    /// An attribute of an element.
    Attribute = 3,
    /// A namespace declaration of an element.
    Namespace = 4,
    /// A text node.
    Text = 5,
    /// Tombstone of a removed node.
    Deleted = 6,
    /// A path-summary node.
    Path = 7,
}

impl NodeKind {
    /// Byte value written to storage.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Dictionary holding names of nodes of this kind, if they are named.
    pub fn name_kind(self) -> Option<NameKind> {
        match self {
            NodeKind::Element => Some(NameKind::Element),
            NodeKind::Attribute => Some(NameKind::Attribute),
            NodeKind::Namespace => Some(NameKind::Namespace),
            _ => None,
        }
    }
}

impl TryFrom<u8> for NodeKind {
    type Error = VersoError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => NodeKind::DocumentRoot,
            2 => NodeKind::Element,
            3 => NodeKind::Attribute,
            4 => NodeKind::Namespace,
            5 => NodeKind::Text,
            6 => NodeKind::Deleted,
            7 => NodeKind::Path,
            other => return Err(VersoError::corrupt(format!("unknown node kind {other}"))),
        })
    }
}

/// The three name dictionaries of a revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NameKind {
    /// Element names.
    Element,
    /// Attribute names.
    Attribute,
    /// Namespace prefixes and URIs.
    Namespace,
}

/// Structural links shared by nodes that take part in a sibling list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructLinks {
    /// First child, if any.
    pub first_child: Option<NodeKey>,
    /// Left sibling, if any.
    pub left_sibling: Option<NodeKey>,
    /// Right sibling, if any.
    pub right_sibling: Option<NodeKey>,
    /// Number of children.
    pub child_count: u64,
}

/// Document root record; always node 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentRootNode {
    /// Children of the document.
    pub links: StructLinks,
}

/// Element record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementNode {
    /// Node key.
    pub key: NodeKey,
    /// Parent element or the document root.
    pub parent: NodeKey,
    /// Sibling and child links.
    pub links: StructLinks,
    /// Key in the element dictionary.
    pub name_key: i32,
    /// Path-summary node this element belongs to.
    pub path_node_key: NodeKey,
    /// Attribute nodes in insertion order.
    pub attributes: Vec<NodeKey>,
    /// Namespace nodes in insertion order.
    pub namespaces: Vec<NodeKey>,
}

/// Attribute record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeNode {
    /// Node key.
    pub key: NodeKey,
    /// Owning element.
    pub parent: NodeKey,
    /// Key in the attribute dictionary.
    pub name_key: i32,
    /// Path-summary node.
    pub path_node_key: NodeKey,
    /// Attribute value.
    pub value: String,
}

/// Namespace declaration record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceNode {
    /// Node key.
    pub key: NodeKey,
    /// Owning element.
    pub parent: NodeKey,
    /// Prefix key in the namespace dictionary.
    pub prefix_key: i32,
    /// URI key in the namespace dictionary.
    pub uri_key: i32,
    /// Path-summary node.
    pub path_node_key: NodeKey,
}

/// Text record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextNode {
    /// Node key.
    pub key: NodeKey,
    /// Parent element.
    pub parent: NodeKey,
    /// Sibling links; text nodes never have children.
    pub links: StructLinks,
    /// Text content.
    pub value: String,
}

/// Path-summary record: one distinct root-to-node path of named nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathNode {
    /// Path node key.
    pub key: NodeKey,
    /// Parent path node; `None` only for the document-root path.
    pub parent: Option<NodeKey>,
    /// Sibling and child links inside the summary.
    pub links: StructLinks,
    /// Name key of the last step.
    pub name_key: i32,
    /// Kind of the nodes this path classifies.
    pub path_kind: NodeKind,
    /// Number of document nodes on this path.
    pub references: u64,
    /// Depth; the document-root path is level 0.
    pub level: u32,
}

/// A node record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// Node 0.
    DocumentRoot(DocumentRootNode),
    /// Element.
    Element(ElementNode),
    /// Attribute.
    Attribute(AttributeNode),
    /// Namespace declaration.
    Namespace(NamespaceNode),
    /// Text.
    Text(TextNode),
    /// Tombstone; shadows older versions of the slot.
    Deleted(NodeKey),
    /// Path-summary node.
    Path(PathNode),
}

impl Node {
    /// Node key.
    pub fn key(&self) -> NodeKey {
        match self {
            Node::DocumentRoot(_) => NodeKey::DOCUMENT_ROOT,
            Node::Element(n) => n.key,
            Node::Attribute(n) => n.key,
            Node::Namespace(n) => n.key,
            Node::Text(n) => n.key,
            Node::Deleted(key) => *key,
            Node::Path(n) => n.key,
        }
    }

    /// Record kind.
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::DocumentRoot(_) => NodeKind::DocumentRoot,
            Node::Element(_) => NodeKind::Element,
            Node::Attribute(_) => NodeKind::Attribute,
            Node::Namespace(_) => NodeKind::Namespace,
            Node::Text(_) => NodeKind::Text,
            Node::Deleted(_) => NodeKind::Deleted,
            Node::Path(_) => NodeKind::Path,
        }
    }

    /// True for tombstones.
    pub fn is_deleted(&self) -> bool {
        matches!(self, Node::Deleted(_))
    }

    /// Parent key.
    pub fn parent(&self) -> Option<NodeKey> {
        match self {
            Node::DocumentRoot(_) | Node::Deleted(_) => None,
            Node::Element(n) => Some(n.parent),
            Node::Attribute(n) => Some(n.parent),
            Node::Namespace(n) => Some(n.parent),
            Node::Text(n) => Some(n.parent),
            Node::Path(n) => n.parent,
        }
    }

    /// Structural links of nodes that sit in a sibling list.
    pub fn links(&self) -> Option<&StructLinks> {
        match self {
            Node::DocumentRoot(n) => Some(&n.links),
            Node::Element(n) => Some(&n.links),
            Node::Text(n) => Some(&n.links),
            Node::Path(n) => Some(&n.links),
            _ => None,
        }
    }

    /// Mutable structural links.
    pub fn links_mut(&mut self) -> Option<&mut StructLinks> {
        match self {
            Node::DocumentRoot(n) => Some(&mut n.links),
            Node::Element(n) => Some(&mut n.links),
            Node::Text(n) => Some(&mut n.links),
            Node::Path(n) => Some(&mut n.links),
            _ => None,
        }
    }

    /// Path-summary node of a named document node. The document root maps
    /// to path node 0.
    pub fn path_node_key(&self) -> Option<NodeKey> {
        match self {
            Node::DocumentRoot(_) => Some(NodeKey::DOCUMENT_ROOT),
            Node::Element(n) => Some(n.path_node_key),
            Node::Attribute(n) => Some(n.path_node_key),
            Node::Namespace(n) => Some(n.path_node_key),
            _ => None,
        }
    }

    /// Re-points a named node at another path node.
    pub fn set_path_node_key(&mut self, path: NodeKey) {
        match self {
            Node::Element(n) => n.path_node_key = path,
            Node::Attribute(n) => n.path_node_key = path,
            Node::Namespace(n) => n.path_node_key = path,
            _ => {}
        }
    }

    /// Name key used to classify the node in the path summary (the prefix
    /// for namespaces).
    pub fn name_key(&self) -> Option<i32> {
        match self {
            Node::Element(n) => Some(n.name_key),
            Node::Attribute(n) => Some(n.name_key),
            Node::Namespace(n) => Some(n.prefix_key),
            Node::Path(n) => Some(n.name_key),
            _ => None,
        }
    }

    /// Text or attribute value.
    pub fn value(&self) -> Option<&str> {
        match self {
            Node::Attribute(n) => Some(&n.value),
            Node::Text(n) => Some(&n.value),
            _ => None,
        }
    }

    /// Borrow as a path node.
    pub fn as_path(&self) -> Option<&PathNode> {
        match self {
            Node::Path(n) => Some(n),
            _ => None,
        }
    }

    /// Appends the record encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.kind().as_u8());
        var::encode_u64(self.key().0, out);
        match self {
            Node::DocumentRoot(n) => put_links(out, &n.links),
            Node::Element(n) => {
                put_key(out, n.parent);
                put_links(out, &n.links);
                var::encode_i64(n.name_key as i64, out);
                put_key(out, n.path_node_key);
                put_key_list(out, &n.attributes);
                put_key_list(out, &n.namespaces);
            }
            Node::Attribute(n) => {
                put_key(out, n.parent);
                var::encode_i64(n.name_key as i64, out);
                put_key(out, n.path_node_key);
                put_str(out, &n.value);
            }
            Node::Namespace(n) => {
                put_key(out, n.parent);
                var::encode_i64(n.prefix_key as i64, out);
                var::encode_i64(n.uri_key as i64, out);
                put_key(out, n.path_node_key);
            }
            Node::Text(n) => {
                put_key(out, n.parent);
                put_links(out, &n.links);
                put_str(out, &n.value);
            }
            Node::Deleted(_) => {}
            Node::Path(n) => {
                put_opt_key(out, n.parent);
                put_links(out, &n.links);
                var::encode_i64(n.name_key as i64, out);
                out.push(n.path_kind.as_u8());
                var::encode_u64(n.references, out);
                var::encode_u64(n.level as u64, out);
            }
        }
    }

    /// Decodes one record from the cursor.
    pub fn decode(cur: &mut Cursor<'_>) -> Result<Node> {
        let kind = NodeKind::try_from(cur.read_u8()?)?;
        let key = NodeKey(cur.read_var_u64()?);
        Ok(match kind {
            NodeKind::DocumentRoot => {
                if key != NodeKey::DOCUMENT_ROOT {
                    return Err(VersoError::corrupt("document root must be node 0"));
                }
                Node::DocumentRoot(DocumentRootNode {
                    links: get_links(cur)?,
                })
            }
            NodeKind::Element => Node::Element(ElementNode {
                key,
                parent: get_key(cur)?,
                links: get_links(cur)?,
                name_key: get_name_key(cur)?,
                path_node_key: get_key(cur)?,
                attributes: get_key_list(cur)?,
                namespaces: get_key_list(cur)?,
            }),
            NodeKind::Attribute => Node::Attribute(AttributeNode {
                key,
                parent: get_key(cur)?,
                name_key: get_name_key(cur)?,
                path_node_key: get_key(cur)?,
                value: get_str(cur)?,
            }),
            NodeKind::Namespace => Node::Namespace(NamespaceNode {
                key,
                parent: get_key(cur)?,
                prefix_key: get_name_key(cur)?,
                uri_key: get_name_key(cur)?,
                path_node_key: get_key(cur)?,
            }),
            NodeKind::Text => Node::Text(TextNode {
                key,
                parent: get_key(cur)?,
                links: get_links(cur)?,
                value: get_str(cur)?,
            }),
            NodeKind::Deleted => Node::Deleted(key),
            NodeKind::Path => Node::Path(PathNode {
                key,
                parent: get_opt_key(cur)?,
                links: get_links(cur)?,
                name_key: get_name_key(cur)?,
                path_kind: NodeKind::try_from(cur.read_u8()?)?,
                references: cur.read_var_u64()?,
                level: u32::try_from(cur.read_var_u64()?)
                    .map_err(|_| VersoError::corrupt("path level out of range"))?,
            }),
        })
    }
}

fn put_key(out: &mut Vec<u8>, key: NodeKey) {
    var::encode_u64(key.0, out);
}

fn put_opt_key(out: &mut Vec<u8>, key: Option<NodeKey>) {
    var::encode_i64(key.map_or(-1, |k| k.0 as i64), out);
}

fn put_links(out: &mut Vec<u8>, links: &StructLinks) {
    put_opt_key(out, links.first_child);
    put_opt_key(out, links.left_sibling);
    put_opt_key(out, links.right_sibling);
    var::encode_u64(links.child_count, out);
}

fn put_key_list(out: &mut Vec<u8>, keys: &[NodeKey]) {
    var::encode_u64(keys.len() as u64, out);
    for key in keys {
        put_key(out, *key);
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    var::encode_u64(s.len() as u64, out);
    out.extend_from_slice(s.as_bytes());
}

fn get_key(cur: &mut Cursor<'_>) -> Result<NodeKey> {
    Ok(NodeKey(cur.read_var_u64()?))
}

fn get_opt_key(cur: &mut Cursor<'_>) -> Result<Option<NodeKey>> {
    match cur.read_var_i64()? {
        -1 => Ok(None),
        k if k >= 0 => Ok(Some(NodeKey(k as u64))),
        _ => Err(VersoError::corrupt("negative node key")),
    }
}

fn get_links(cur: &mut Cursor<'_>) -> Result<StructLinks> {
    Ok(StructLinks {
        first_child: get_opt_key(cur)?,
        left_sibling: get_opt_key(cur)?,
        right_sibling: get_opt_key(cur)?,
        child_count: cur.read_var_u64()?,
    })
}

fn get_name_key(cur: &mut Cursor<'_>) -> Result<i32> {
    i32::try_from(cur.read_var_i64()?).map_err(|_| VersoError::corrupt("name key out of range"))
}

fn get_key_list(cur: &mut Cursor<'_>) -> Result<Vec<NodeKey>> {
    let len = cur.read_var_u64()? as usize;
    if len > cur.remaining() {
        return Err(VersoError::corrupt("key list longer than record"));
    }
    (0..len).map(|_| get_key(cur)).collect()
}

fn get_str(cur: &mut Cursor<'_>) -> Result<String> {
    let len = usize::try_from(cur.read_var_u64()?)
        .map_err(|_| VersoError::corrupt("string length out of range"))?;
    let bytes = cur.take(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| VersoError::corrupt("string is not UTF-8"))
}
