use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::access::{PageAccess, PageReadTrx};
use crate::admin::util::open_resource;
use crate::admin::Result;
use crate::node::Node;
use crate::page::{PageKind, PageReference, INP_LEVELS, INP_LEVEL_SHIFT};
use crate::types::NodeKey;

const MAX_FINDINGS: usize = 32;

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Suspicious but readable state.
    Warning,
    /// Unreadable or inconsistent data.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Revisions whose roots were read.
    pub revisions: u32,
    /// Distinct stored pages read and decoded.
    pub pages: u64,
    /// Live document nodes in the most recent revision.
    pub live_nodes: u64,
    /// Live path-summary nodes in the most recent revision.
    pub path_nodes: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// Whether verification passed without finding any issues.
    pub success: bool,
    /// List of issues discovered during verification.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the pages examined.
    pub counts: VerifyCounts,
}

struct Walk<'a> {
    trx: &'a PageReadTrx,
    visited: &'a mut HashSet<u64>,
    findings: &'a mut Vec<VerifyFinding>,
    counts: &'a mut VerifyCounts,
    latest: bool,
}

/// Reads every revision root of `resource` and every page reachable from
/// it, reporting pages that fail to load or decode.
///
/// # Errors
///
/// Returns an error if the database or resource cannot be opened. Damage
/// inside the resource is reported as findings instead.
pub fn verify(db: impl AsRef<Path>, resource: &str) -> Result<VerifyReport> {
    let handle = open_resource(db.as_ref(), resource)?;
    let mut findings = Vec::new();
    let mut counts = VerifyCounts::default();
    let mut visited = HashSet::new();

    let latest = match handle.session.most_recent_revision() {
        Ok(latest) => latest,
        Err(err) => {
            push(&mut findings, VerifySeverity::Error, format!("cannot read the uber page: {err}"));
            return Ok(finish(findings, counts));
        }
    };

    // Latest first: shared subtrees are walked once, and only the latest
    // revision's leaves feed the live counts.
    for revision in std::iter::once(latest).chain(0..latest) {
        let trx = match handle.session.begin_page_read_trx(Some(revision)) {
            Ok(trx) => trx,
            Err(err) => {
                push(
                    &mut findings,
                    VerifySeverity::Error,
                    format!("revision {revision}: cannot open root pages: {err}"),
                );
                continue;
            }
        };
        counts.revisions += 1;
        match trx.node(NodeKey::DOCUMENT_ROOT) {
            Ok(Some(Node::DocumentRoot(_))) => {}
            Ok(_) => push(
                &mut findings,
                VerifySeverity::Error,
                format!("revision {revision}: document root missing"),
            ),
            Err(err) => push(
                &mut findings,
                VerifySeverity::Error,
                format!("revision {revision}: document root unreadable: {err}"),
            ),
        }
        let nodes = trx.revision_root().nodes().clone();
        let paths = trx.path_summary_page().indirect().clone();
        let mut walk = Walk {
            trx: &trx,
            visited: &mut visited,
            findings: &mut findings,
            counts: &mut counts,
            latest: revision == latest,
        };
        walk.tree(&nodes, false, 0, 0);
        walk.tree(&paths, true, 0, 0);
        if let Err(err) = trx.close() {
            push(&mut findings, VerifySeverity::Warning, format!("revision {revision}: close failed: {err}"));
        }
    }
    Ok(finish(findings, counts))
}

impl Walk<'_> {
    fn tree(&mut self, reference: &PageReference, paths: bool, level: usize, page_key: u64) {
        let Some(key) = reference.key() else {
            return;
        };
        if level == INP_LEVELS {
            self.leaf(key, paths, page_key);
            return;
        }
        if !self.visited.insert(key) {
            return;
        }
        let page = match self.trx.load(key) {
            Ok(page) => page,
            Err(err) => {
                self.error(format!("indirect page {key}: {err}"));
                return;
            }
        };
        self.counts.pages += 1;
        let indirect = match page.as_indirect() {
            Ok(indirect) => indirect,
            Err(err) => {
                self.error(format!("page {key}: {err}"));
                return;
            }
        };
        for (offset, child) in indirect.references().iter().enumerate() {
            let child_key = (page_key << INP_LEVEL_SHIFT) | offset as u64;
            self.tree(child, paths, level + 1, child_key);
        }
    }

    fn leaf(&mut self, key: u64, paths: bool, page_key: u64) {
        let mut next = Some(key);
        while let Some(stored) = next {
            if !self.visited.insert(stored) {
                break;
            }
            match self.trx.load(stored) {
                Ok(page) => match page.as_node() {
                    Ok(node_page) => {
                        self.counts.pages += 1;
                        if node_page.node_page_key() != page_key {
                            self.error(format!(
                                "node page {stored} claims key {} but sits at {page_key}",
                                node_page.node_page_key()
                            ));
                        }
                        next = node_page.previous().key();
                        if node_page.previous().kind().is_some_and(|k| k != PageKind::Node) {
                            self.error(format!("node page {stored} links to a non-node page"));
                        }
                    }
                    Err(err) => {
                        self.error(format!("page {stored}: {err}"));
                        next = None;
                    }
                },
                Err(err) => {
                    self.error(format!("node page {stored}: {err}"));
                    next = None;
                }
            }
        }
        if !self.latest {
            return;
        }
        let page = if paths {
            self.trx.path_page(page_key)
        } else {
            self.trx.node_page(page_key)
        };
        match page {
            Ok(Some(page)) => {
                let live = page.iter().filter(|(_, node)| !node.is_deleted()).count() as u64;
                if paths {
                    self.counts.path_nodes += live;
                } else {
                    self.counts.live_nodes += live;
                }
            }
            Ok(None) => {}
            Err(err) => self.error(format!("node page {page_key} cannot be reconstructed: {err}")),
        }
    }

    fn error(&mut self, message: String) {
        push(self.findings, VerifySeverity::Error, message);
    }
}

fn push(findings: &mut Vec<VerifyFinding>, severity: VerifySeverity, message: String) {
    if findings.len() < MAX_FINDINGS {
        findings.push(VerifyFinding { severity, message });
    }
}

fn finish(findings: Vec<VerifyFinding>, counts: VerifyCounts) -> VerifyReport {
    let success = !findings
        .iter()
        .any(|f| matches!(f.severity, VerifySeverity::Error));
    VerifyReport {
        success,
        findings,
        counts,
    }
}
