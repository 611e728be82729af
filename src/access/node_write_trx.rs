//! Node-level write transaction: tree edits on top of [`PageWriteTrx`].
//!
//! Every edit reloads the records it touches from the page transaction
//! before changing them, so the cursor's copy is never written back stale.

use tracing::debug;

use super::node_trx::NodeRead;
use super::page_read_trx::PageAccess;
use super::page_write_trx::{PageWriteTrx, TreeKind};
use super::session::WriterPermit;
use crate::node::{
    AttributeNode, ElementNode, NameKind, NamespaceNode, Node, NodeKind, PathNode, StructLinks,
    TextNode,
};
use crate::types::{NodeKey, Result, VersoError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Position {
    FirstChild,
    RightSibling,
}

/// The single write transaction of a resource.
pub struct NodeWriteTrx {
    page: PageWriteTrx,
    current: Node,
    _permit: WriterPermit,
}

impl NodeWriteTrx {
    pub(crate) fn new(page: PageWriteTrx, permit: WriterPermit) -> Result<Self> {
        let current = page
            .node(NodeKey::DOCUMENT_ROOT)?
            .ok_or_else(|| VersoError::corrupt("document root missing"))?;
        Ok(Self {
            page,
            current,
            _permit: permit,
        })
    }

    /// Underlying page-level transaction.
    pub fn page_trx(&self) -> &PageWriteTrx {
        &self.page
    }

    /// Inserts element `name` as first child of the current element (or of
    /// the document root) and moves to it.
    pub fn insert_element_as_first_child(&mut self, name: &str) -> Result<NodeKey> {
        self.insert_element(Position::FirstChild, name)
    }

    /// Inserts element `name` right of the current element or text node and
    /// moves to it.
    pub fn insert_element_as_right_sibling(&mut self, name: &str) -> Result<NodeKey> {
        self.insert_element(Position::RightSibling, name)
    }

    /// Inserts a text node as first child of the current element.
    pub fn insert_text_as_first_child(&mut self, value: &str) -> Result<NodeKey> {
        if matches!(self.current, Node::DocumentRoot(_)) {
            return Err(VersoError::Invalid("text cannot be a child of the document root"));
        }
        self.insert_text(Position::FirstChild, value)
    }

    /// Inserts a text node right of the current element or text node.
    pub fn insert_text_as_right_sibling(&mut self, value: &str) -> Result<NodeKey> {
        self.insert_text(Position::RightSibling, value)
    }

    /// Adds attribute `name` to the current element and moves to it.
    pub fn insert_attribute(&mut self, name: &str, value: &str) -> Result<NodeKey> {
        let element = self.current_element()?;
        check_name(name)?;
        for &key in &element.attributes {
            let existing = self.load(key)?;
            if self.page.name(existing.name_key().unwrap_or_default(), NameKind::Attribute).as_deref()
                == Some(name)
            {
                return Err(VersoError::Invalid("duplicate attribute"));
            }
        }
        let name_key = self.page.create_name(name, NameKind::Attribute);
        let path = self.insert_path(element.path_node_key, name_key, NodeKind::Attribute)?;
        let parent = element.key;
        let node = self.page.create_node(TreeKind::Nodes, |key| {
            Node::Attribute(AttributeNode {
                key,
                parent,
                name_key,
                path_node_key: path,
                value: value.to_owned(),
            })
        })?;
        self.update_element(parent, |e| e.attributes.push(node.key()))?;
        Ok(self.enter(node))
    }

    /// Binds `prefix` to `uri` on the current element and moves to the
    /// namespace node.
    pub fn insert_namespace(&mut self, prefix: &str, uri: &str) -> Result<NodeKey> {
        let element = self.current_element()?;
        for &key in &element.namespaces {
            let existing = self.load(key)?;
            if self.page.name(existing.name_key().unwrap_or_default(), NameKind::Namespace).as_deref()
                == Some(prefix)
            {
                return Err(VersoError::Invalid("duplicate namespace prefix"));
            }
        }
        let prefix_key = self.page.create_name(prefix, NameKind::Namespace);
        let uri_key = self.page.create_name(uri, NameKind::Namespace);
        let path = self.insert_path(element.path_node_key, prefix_key, NodeKind::Namespace)?;
        let parent = element.key;
        let node = self.page.create_node(TreeKind::Nodes, |key| {
            Node::Namespace(NamespaceNode {
                key,
                parent,
                prefix_key,
                uri_key,
                path_node_key: path,
            })
        })?;
        self.update_element(parent, |e| e.namespaces.push(node.key()))?;
        Ok(self.enter(node))
    }

    /// Replaces the value of the current text or attribute node.
    pub fn set_value(&mut self, value: &str) -> Result<()> {
        if !matches!(self.current.kind(), NodeKind::Text | NodeKind::Attribute) {
            return Err(VersoError::Invalid("only text and attribute nodes carry values"));
        }
        let mut node = self.page.prepare_node(TreeKind::Nodes, self.current.key())?;
        match &mut node {
            Node::Text(text) => text.value = value.to_owned(),
            Node::Attribute(attribute) => attribute.value = value.to_owned(),
            _ => return Err(VersoError::Invalid("only text and attribute nodes carry values")),
        }
        self.page.finish_node(TreeKind::Nodes, node.clone())?;
        self.current = node;
        Ok(())
    }

    /// Renames the current element or attribute.
    ///
    /// Renaming an element moves its whole subtree to paths below the new
    /// name; path nodes that lose their last reference are pruned.
    pub fn rename(&mut self, name: &str) -> Result<()> {
        check_name(name)?;
        let node = self.load(self.current.key())?;
        let kind = match node.kind() {
            NodeKind::Element => NameKind::Element,
            NodeKind::Attribute => NameKind::Attribute,
            _ => return Err(VersoError::Invalid("only elements and attributes can be renamed")),
        };
        let old_key = node.name_key().unwrap_or_default();
        if self.page.name(old_key, kind).as_deref() == Some(name) {
            return Ok(());
        }
        let parent = node
            .parent()
            .ok_or_else(|| VersoError::corrupt("named node without parent"))?;
        let parent_path = self
            .load(parent)?
            .path_node_key()
            .ok_or_else(|| VersoError::corrupt("parent without path node"))?;
        if kind == NameKind::Attribute && self.sibling_attribute_named(parent, name)? {
            return Err(VersoError::Invalid("duplicate attribute"));
        }
        let new_key = self.page.create_name(name, kind);
        self.remap_subtree(node.key(), parent_path, new_key)?;
        self.page.remove_name(old_key, kind);
        debug!(node = %node.key(), "node_trx.rename");
        self.current = self.load(node.key())?;
        Ok(())
    }

    /// Removes the current node with its subtree and moves to the right
    /// sibling, else the left sibling, else the parent.
    pub fn remove(&mut self) -> Result<()> {
        let node = self.load(self.current.key())?;
        let parent = match &node {
            Node::DocumentRoot(_) => {
                return Err(VersoError::Invalid("the document root cannot be removed"))
            }
            other => other
                .parent()
                .ok_or_else(|| VersoError::corrupt("node without parent"))?,
        };
        let key = node.key();
        let next = match &node {
            Node::Attribute(_) => {
                self.update_element(parent, |e| e.attributes.retain(|&a| a != key))?;
                parent
            }
            Node::Namespace(_) => {
                self.update_element(parent, |e| e.namespaces.retain(|&n| n != key))?;
                parent
            }
            _ => {
                let links = node.links().cloned().unwrap_or_default();
                if let Some(left) = links.left_sibling {
                    self.relink(TreeKind::Nodes, left, |l| l.right_sibling = links.right_sibling)?;
                }
                if let Some(right) = links.right_sibling {
                    self.relink(TreeKind::Nodes, right, |l| l.left_sibling = links.left_sibling)?;
                }
                self.relink(TreeKind::Nodes, parent, |l| {
                    if links.left_sibling.is_none() {
                        l.first_child = links.right_sibling;
                    }
                    l.child_count = l.child_count.saturating_sub(1);
                })?;
                links.right_sibling.or(links.left_sibling).unwrap_or(parent)
            }
        };

        let doomed = self.subtree(key)?;
        for node in doomed.iter().rev() {
            match node {
                Node::Element(e) => self.page.remove_name(e.name_key, NameKind::Element),
                Node::Attribute(a) => self.page.remove_name(a.name_key, NameKind::Attribute),
                Node::Namespace(ns) => {
                    self.page.remove_name(ns.prefix_key, NameKind::Namespace);
                    self.page.remove_name(ns.uri_key, NameKind::Namespace);
                }
                _ => {}
            }
            if let Some(path) = node.path_node_key() {
                self.release_path(path)?;
            }
            self.page.remove_node(TreeKind::Nodes, node.key())?;
        }
        debug!(node = %key, removed = doomed.len(), "node_trx.remove");
        self.current = self.load(next)?;
        Ok(())
    }

    /// Publishes the pending revision and returns its number.
    ///
    /// On failure the pending changes are discarded and the cursor falls
    /// back to a node of the last published revision.
    pub fn commit(&mut self) -> Result<u32> {
        let uber = match self.page.commit() {
            Ok(uber) => uber,
            Err(err) => {
                if let Err(moved) = self.reposition() {
                    debug!(error = %moved, "node_trx.commit.reposition_failed");
                }
                return Err(err);
            }
        };
        self.reposition()?;
        Ok(uber.revision())
    }

    /// Discards every change since the last commit.
    pub fn rollback(&mut self) -> Result<()> {
        self.page.rollback()?;
        self.reposition()
    }

    /// Discards pending changes and releases the writer slot.
    pub fn close(self) -> Result<()> {
        self.page.close()
    }

    fn reposition(&mut self) -> Result<()> {
        let key = self.current.key();
        self.current = match self.page.node(key)? {
            Some(node) => node,
            None => self.load(NodeKey::DOCUMENT_ROOT)?,
        };
        Ok(())
    }

    fn load(&self, key: NodeKey) -> Result<Node> {
        self.page.node(key)?.ok_or(VersoError::NotFound("node"))
    }

    fn enter(&mut self, node: Node) -> NodeKey {
        let key = node.key();
        self.current = node;
        key
    }

    fn current_element(&self) -> Result<ElementNode> {
        match self.load(self.current.key())? {
            Node::Element(element) => Ok(element),
            _ => Err(VersoError::Invalid("the current node is not an element")),
        }
    }

    fn sibling_attribute_named(&self, element: NodeKey, name: &str) -> Result<bool> {
        let Node::Element(element) = self.load(element)? else {
            return Err(VersoError::corrupt("attribute parent is not an element"));
        };
        for key in element.attributes {
            let attribute = self.load(key)?;
            let key = attribute.name_key().unwrap_or_default();
            if self.page.name(key, NameKind::Attribute).as_deref() == Some(name) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Parent that a node inserted at `position` relative to the cursor gets.
    fn insertion_parent(&self, position: Position) -> Result<Node> {
        let anchor = self.load(self.current.key())?;
        match (position, &anchor) {
            (Position::FirstChild, Node::Element(_) | Node::DocumentRoot(_)) => Ok(anchor),
            (Position::FirstChild, _) => {
                Err(VersoError::Invalid("children can only be inserted below elements"))
            }
            (Position::RightSibling, Node::Element(_) | Node::Text(_)) => {
                match anchor.parent() {
                    Some(NodeKey::DOCUMENT_ROOT) => Err(VersoError::Invalid(
                        "the document root takes a single element child",
                    )),
                    Some(parent) => self.load(parent),
                    None => Err(VersoError::corrupt("node without parent")),
                }
            }
            (Position::RightSibling, _) => Err(VersoError::Invalid(
                "siblings can only be inserted next to elements and text",
            )),
        }
    }

    fn insert_element(&mut self, position: Position, name: &str) -> Result<NodeKey> {
        check_name(name)?;
        let parent = self.insertion_parent(position)?;
        if let (Position::FirstChild, Node::DocumentRoot(root)) = (position, &parent) {
            if root.links.first_child.is_some() {
                return Err(VersoError::Invalid("the document root takes a single element child"));
            }
        }
        let parent_path = parent
            .path_node_key()
            .ok_or_else(|| VersoError::corrupt("parent without path node"))?;
        let name_key = self.page.create_name(name, NameKind::Element);
        let path = self.insert_path(parent_path, name_key, NodeKind::Element)?;
        self.attach(position, parent.key(), |key, parent, links| {
            Node::Element(ElementNode {
                key,
                parent,
                links,
                name_key,
                path_node_key: path,
                attributes: Vec::new(),
                namespaces: Vec::new(),
            })
        })
    }

    fn insert_text(&mut self, position: Position, value: &str) -> Result<NodeKey> {
        let parent = self.insertion_parent(position)?;
        self.attach(position, parent.key(), |key, parent, links| {
            Node::Text(TextNode {
                key,
                parent,
                links,
                value: value.to_owned(),
            })
        })
    }

    /// Creates a structural node next to the cursor and links it in.
    fn attach(
        &mut self,
        position: Position,
        parent: NodeKey,
        build: impl FnOnce(NodeKey, NodeKey, StructLinks) -> Node,
    ) -> Result<NodeKey> {
        let anchor = self.load(self.current.key())?;
        let (left, right) = match position {
            Position::FirstChild => (None, anchor.links().and_then(|l| l.first_child)),
            Position::RightSibling => (
                Some(anchor.key()),
                anchor.links().and_then(|l| l.right_sibling),
            ),
        };
        let links = StructLinks {
            first_child: None,
            left_sibling: left,
            right_sibling: right,
            child_count: 0,
        };
        let node = self
            .page
            .create_node(TreeKind::Nodes, |key| build(key, parent, links))?;
        let key = node.key();
        if let Some(left) = left {
            self.relink(TreeKind::Nodes, left, |l| l.right_sibling = Some(key))?;
        }
        if let Some(right) = right {
            self.relink(TreeKind::Nodes, right, |l| l.left_sibling = Some(key))?;
        }
        self.relink(TreeKind::Nodes, parent, |l| {
            if left.is_none() {
                l.first_child = Some(key);
            }
            l.child_count += 1;
        })?;
        Ok(self.enter(node))
    }

    fn relink(&mut self, tree: TreeKind, key: NodeKey, change: impl FnOnce(&mut StructLinks)) -> Result<()> {
        let mut node = self.page.prepare_node(tree, key)?;
        let links = node
            .links_mut()
            .ok_or_else(|| VersoError::corrupt(format!("node {key} has no structural links")))?;
        change(links);
        self.page.finish_node(tree, node)
    }

    fn update_element(&mut self, key: NodeKey, change: impl FnOnce(&mut ElementNode)) -> Result<()> {
        let mut node = self.page.prepare_node(TreeKind::Nodes, key)?;
        let Node::Element(element) = &mut node else {
            return Err(VersoError::corrupt(format!("node {key} is not an element")));
        };
        change(element);
        self.page.finish_node(TreeKind::Nodes, node)
    }

    /// `key` and everything below it, parents before children.
    fn subtree(&self, key: NodeKey) -> Result<Vec<Node>> {
        let mut found = Vec::new();
        let mut pending = vec![key];
        while let Some(key) = pending.pop() {
            let node = self.load(key)?;
            if let Node::Element(element) = &node {
                pending.extend(element.attributes.iter().chain(&element.namespaces).copied());
            }
            let mut child = node.links().and_then(|l| l.first_child);
            while let Some(next) = child {
                pending.push(next);
                child = self.load(next)?.links().and_then(|l| l.right_sibling);
            }
            found.push(node);
        }
        Ok(found)
    }

    /// Moves every named node of the subtree at `root` onto paths below
    /// `parent_path`, giving `root` the name `name_key`, then releases the
    /// old paths children first.
    fn remap_subtree(&mut self, root: NodeKey, parent_path: NodeKey, name_key: i32) -> Result<()> {
        let mut released = Vec::new();
        let mut pending = vec![(root, parent_path)];
        while let Some((key, parent_path)) = pending.pop() {
            let mut node = self.page.prepare_node(TreeKind::Nodes, key)?;
            let Some(old_path) = node.path_node_key() else {
                continue;
            };
            if key == root {
                match &mut node {
                    Node::Element(e) => e.name_key = name_key,
                    Node::Attribute(a) => a.name_key = name_key,
                    _ => return Err(VersoError::Invalid("only elements and attributes can be renamed")),
                }
            }
            let own_name = node
                .name_key()
                .ok_or_else(|| VersoError::corrupt("named node without name"))?;
            let path = self.insert_path(parent_path, own_name, node.kind())?;
            node.set_path_node_key(path);
            released.push(old_path);
            if let Node::Element(element) = &node {
                for &child in element.attributes.iter().chain(&element.namespaces) {
                    pending.push((child, path));
                }
                let mut child = element.links.first_child;
                while let Some(next) = child {
                    pending.push((next, path));
                    child = self.load(next)?.links().and_then(|l| l.right_sibling);
                }
            }
            self.page.finish_node(TreeKind::Nodes, node)?;
        }
        for path in released.into_iter().rev() {
            self.release_path(path)?;
        }
        Ok(())
    }

    fn path(&self, key: NodeKey) -> Result<PathNode> {
        self.page
            .path_node(key)?
            .ok_or_else(|| VersoError::corrupt(format!("path node {key} missing")))
    }

    /// Path node for (`parent`, `name_key`, `kind`), created as the parent's
    /// new first child when absent; its reference count is incremented.
    fn insert_path(&mut self, parent: NodeKey, name_key: i32, kind: NodeKind) -> Result<NodeKey> {
        let parent_node = self.path(parent)?;
        let mut child = parent_node.links.first_child;
        while let Some(key) = child {
            let mut existing = self.path(key)?;
            if existing.name_key == name_key && existing.path_kind == kind {
                existing.references += 1;
                self.page.finish_node(TreeKind::Paths, Node::Path(existing))?;
                return Ok(key);
            }
            child = existing.links.right_sibling;
        }
        let right = parent_node.links.first_child;
        let level = parent_node.level + 1;
        let node = self.page.create_node(TreeKind::Paths, |key| {
            Node::Path(PathNode {
                key,
                parent: Some(parent),
                links: StructLinks {
                    first_child: None,
                    left_sibling: None,
                    right_sibling: right,
                    child_count: 0,
                },
                name_key,
                path_kind: kind,
                references: 1,
                level,
            })
        })?;
        let key = node.key();
        if let Some(right) = right {
            self.relink(TreeKind::Paths, right, |l| l.left_sibling = Some(key))?;
        }
        self.relink(TreeKind::Paths, parent, |l| {
            l.first_child = Some(key);
            l.child_count += 1;
        })?;
        Ok(key)
    }

    /// Drops one reference from path node `key`, pruning it (and any parent
    /// left without references or children) once unused.
    fn release_path(&mut self, key: NodeKey) -> Result<()> {
        let mut node = self.path(key)?;
        node.references = node
            .references
            .checked_sub(1)
            .ok_or_else(|| VersoError::corrupt(format!("path node {key} has no references")))?;
        let mut prune = (node.references == 0 && node.links.child_count == 0).then_some(node.clone());
        self.page.finish_node(TreeKind::Paths, Node::Path(node))?;

        while let Some(doomed) = prune.take() {
            let Some(parent) = doomed.parent else {
                break;
            };
            let links = doomed.links;
            if let Some(left) = links.left_sibling {
                self.relink(TreeKind::Paths, left, |l| l.right_sibling = links.right_sibling)?;
            }
            if let Some(right) = links.right_sibling {
                self.relink(TreeKind::Paths, right, |l| l.left_sibling = links.left_sibling)?;
            }
            self.relink(TreeKind::Paths, parent, |l| {
                if links.left_sibling.is_none() {
                    l.first_child = links.right_sibling;
                }
                l.child_count = l.child_count.saturating_sub(1);
            })?;
            self.page.remove_node(TreeKind::Paths, doomed.key)?;
            let parent = self.path(parent)?;
            if parent.parent.is_some() && parent.references == 0 && parent.links.child_count == 0 {
                prune = Some(parent);
            }
        }
        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VersoError::Invalid("names must not be empty"));
    }
    Ok(())
}

impl NodeRead for NodeWriteTrx {
    fn revision_number(&self) -> u32 {
        self.page.revision()
    }

    fn max_node_key(&self) -> u64 {
        PageAccess::max_node_key(&self.page)
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
