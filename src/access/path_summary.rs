//! Read-only cursor over the path summary of a revision.

use super::page_read_trx::PageAccess;
use crate::node::{NodeKind, PathNode};
use crate::types::{NodeKey, Result, VersoError};

/// Cursor over path nodes. Starts at the document-root path.
pub struct PathSummary<A: PageAccess> {
    access: A,
    current: PathNode,
}

impl<A: PageAccess> PathSummary<A> {
    /// Opens a cursor positioned at path node 0.
    pub fn new(access: A) -> Result<Self> {
        let current = access
            .path_node(NodeKey::DOCUMENT_ROOT)?
            .ok_or_else(|| VersoError::corrupt("document-root path node missing"))?;
        Ok(Self { access, current })
    }

    /// Path node under the cursor.
    pub fn node(&self) -> &PathNode {
        &self.current
    }

    /// Moves to path node `key`; the cursor stays put when it does not exist.
    pub fn move_to(&mut self, key: NodeKey) -> Result<bool> {
        match self.access.path_node(key)? {
            Some(node) => {
                self.current = node;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Moves to the summary's root.
    pub fn move_to_document_root(&mut self) -> Result<bool> {
        self.move_to(NodeKey::DOCUMENT_ROOT)
    }

    /// Moves one path step up.
    pub fn move_to_parent(&mut self) -> Result<bool> {
        match self.current.parent {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Moves to the first path extending the current one.
    pub fn move_to_first_child(&mut self) -> Result<bool> {
        match self.current.links.first_child {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Moves to the previous path under the same parent.
    pub fn move_to_left_sibling(&mut self) -> Result<bool> {
        match self.current.links.left_sibling {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Moves to the next path under the same parent.
    pub fn move_to_right_sibling(&mut self) -> Result<bool> {
        match self.current.links.right_sibling {
            Some(key) => self.move_to(key),
            None => Ok(false),
        }
    }

    /// Local name of the current path step, `None` at the document root.
    pub fn name(&self) -> Option<String> {
        step_name(&self.access, &self.current)
    }

    /// Absolute path of the current node, e.g. `/a/b/@id`.
    pub fn path(&self) -> Result<String> {
        let mut steps = Vec::new();
        let mut node = self.current.clone();
        while let Some(parent) = node.parent {
            let name = step_name(&self.access, &node).unwrap_or_default();
            steps.push(match node.path_kind {
                NodeKind::Attribute => format!("@{name}"),
                NodeKind::Namespace => format!("xmlns:{name}"),
                _ => name,
            });
            node = self
                .access
                .path_node(parent)?
                .ok_or_else(|| VersoError::corrupt(format!("path node {parent} missing")))?;
        }
        steps.reverse();
        Ok(format!("/{}", steps.join("/")))
    }

    /// Every path node below the current one, in pre-order.
    pub fn descendants(&self) -> Result<Vec<PathNode>> {
        let mut found = Vec::new();
        let mut pending: Vec<NodeKey> = self.current.links.first_child.into_iter().collect();
        while let Some(key) = pending.pop() {
            let node = self
                .access
                .path_node(key)?
                .ok_or_else(|| VersoError::corrupt(format!("path node {key} missing")))?;
            if let Some(right) = node.links.right_sibling {
                pending.push(right);
            }
            if let Some(child) = node.links.first_child {
                pending.push(child);
            }
            found.push(node);
        }
        Ok(found)
    }

    /// Gives back the page access the cursor reads through.
    pub fn into_inner(self) -> A {
        self.access
    }
}

fn step_name<A: PageAccess>(access: &A, node: &PathNode) -> Option<String> {
    let kind = node.path_kind.name_kind()?;
    access.name(node.name_key, kind)
}
