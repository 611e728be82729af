//! Cursor-style navigation over the document tree of one revision.

use super::page_read_trx::{PageAccess, PageReadTrx};
use crate::node::{NameKind, Node};
use crate::types::{NodeKey, Result, VersoError};

/// Navigation shared by read and write transactions.
///
/// Every `move_to*` returns `Ok(false)` and leaves the cursor where it was
/// when the target does not exist.
pub trait NodeRead {
    /// Revision the transaction reads (or builds).
    fn revision_number(&self) -> u32;
    /// Largest document node key of that revision.
    fn max_node_key(&self) -> u64;
    /// Node under the cursor.
    fn node(&self) -> &Node;
    /// Moves to node `key`.
    fn move_to(&mut self, key: NodeKey) -> Result<bool>;
    /// Dictionary lookup used to resolve names.
    fn name_of(&self, key: i32, kind: NameKind) -> Option<String>;

    /// Key of the node under the cursor.
    fn node_key(&self) -> NodeKey {
        self.node().key()
    }

    /// Moves to the document root.
    fn move_to_document_root(&mut self) -> Result<bool> {
        self.move_to(NodeKey::DOCUMENT_ROOT)
    }

    /// Moves to the parent of the current node.
    fn move_to_parent(&mut self) -> Result<bool> {
        match self.node().parent() {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Moves to the first child of the current node.
    fn move_to_first_child(&mut self) -> Result<bool> {
        match self.node().links().and_then(|l| l.first_child) {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Moves to the left sibling.
    fn move_to_left_sibling(&mut self) -> Result<bool> {
        match self.node().links().and_then(|l| l.left_sibling) {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Moves to the right sibling.
    fn move_to_right_sibling(&mut self) -> Result<bool> {
        match self.node().links().and_then(|l| l.right_sibling) {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Moves to the `index`-th attribute of the current element.
    fn move_to_attribute(&mut self, index: usize) -> Result<bool> {
        let target = match self.node() {
            Node::Element(element) => element.attributes.get(index).copied(),
            _ => None,
        };
        match target {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Moves to the `index`-th namespace of the current element.
    fn move_to_namespace(&mut self, index: usize) -> Result<bool> {
        let target = match self.node() {
            Node::Element(element) => element.namespaces.get(index).copied(),
            _ => None,
        };
        match target {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Number of attributes on the current element.
    fn attribute_count(&self) -> usize {
        match self.node() {
            Node::Element(element) => element.attributes.len(),
            _ => 0,
        }
    }

    /// Number of namespaces declared on the current element.
    fn namespace_count(&self) -> usize {
        match self.node() {
            Node::Element(element) => element.namespaces.len(),
            _ => 0,
        }
    }

    /// Number of children of the current node.
    fn child_count(&self) -> u64 {
        self.node().links().map_or(0, |l| l.child_count)
    }

    /// Local name of an element or attribute, prefix of a namespace.
    fn name(&self) -> Option<String> {
        let node = self.node();
        let kind = node.kind().name_kind()?;
        self.name_of(node.name_key()?, kind)
    }

    /// URI bound by the current namespace node.
    fn namespace_uri(&self) -> Option<String> {
        match self.node() {
            Node::Namespace(ns) => self.name_of(ns.uri_key, NameKind::Namespace),
            _ => None,
        }
    }

    /// Value of a text or attribute node.
    fn value(&self) -> Option<&str> {
        self.node().value()
    }
}

/// Read-only node transaction bound to one revision.
pub struct NodeReadTrx {
    page: PageReadTrx,
    current: Node,
}

impl NodeReadTrx {
    /// Wraps `page`, positioned at the document root.
    pub fn new(page: PageReadTrx) -> Result<Self> {
        let current = page
            .node(NodeKey::DOCUMENT_ROOT)?
            .ok_or_else(|| VersoError::corrupt("document root missing"))?;
        Ok(Self { page, current })
    }

    /// Underlying page-level transaction.
    pub fn page_trx(&self) -> &PageReadTrx {
        &self.page
    }

    /// Releases the revision's readers.
    pub fn close(self) -> Result<()> {
        self.page.close()
    }
}

impl NodeRead for NodeReadTrx {
    fn revision_number(&self) -> u32 {
        self.page.revision()
    }

    fn max_node_key(&self) -> u64 {
        self.page.max_node_key()
    }

    fn node(&self) -> &Node {
        &self.current
    }

    fn move_to(&mut self, key: NodeKey) -> Result<bool> {
        match self.page.node(key)? {
            Some(node) => {
                self.current = node;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn name_of(&self, key: i32, kind: NameKind) -> Option<String> {
        self.page.name(key, kind)
    }
}
