use std::path::Path;

use serde::Serialize;

use crate::access::{PageAccess, Versioning};
use crate::admin::util::open_resource;
use crate::admin::Result;
use crate::node::NameKind;

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub resource: String,
    pub storage: StorageSection,
    pub revisions: RevisionSection,
    pub names: NameSection,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageSection {
    pub kind: String,
    pub byte_handlers: usize,
    pub encrypted: bool,
    pub versioning: Versioning,
    pub window: usize,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevisionSection {
    pub count: u32,
    pub most_recent: u32,
    pub max_node_key: u64,
    pub max_path_node_key: u64,
    pub last_commit_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NameSection {
    pub elements: usize,
    pub attributes: usize,
    pub namespaces: usize,
}

/// One committed revision as listed by [`revisions`].
#[derive(Debug, Clone, Serialize)]
pub struct RevisionInfo {
    pub revision: u32,
    pub commit_timestamp_ms: u64,
    pub max_node_key: u64,
}

pub fn stats(db: impl AsRef<Path>, resource: &str) -> Result<StatsReport> {
    let handle = open_resource(db.as_ref(), resource)?;
    let session = &handle.session;
    let config = session.config();
    let trx = session.begin_page_read_trx(None)?;
    let names = trx.name_page();

    let report = StatsReport {
        resource: resource.to_owned(),
        storage: StorageSection {
            kind: config.storage.as_str().to_owned(),
            byte_handlers: config.byte_handlers.len(),
            encrypted: config.uses_encryption(),
            versioning: config.versioning,
            window: config.window(),
            size_bytes: session.storage().size_on_disk()?,
        },
        revisions: RevisionSection {
            count: trx.uber().revision_count(),
            most_recent: trx.revision(),
            max_node_key: trx.max_node_key(),
            max_path_node_key: trx.path_summary_page().max_path_node_key(),
            last_commit_ms: trx.revision_root().commit_timestamp(),
        },
        names: NameSection {
            elements: names.names(NameKind::Element).len(),
            attributes: names.names(NameKind::Attribute).len(),
            namespaces: names.names(NameKind::Namespace).len(),
        },
    };
    trx.close()?;
    Ok(report)
}

/// Lists every committed revision, oldest first.
pub fn revisions(db: impl AsRef<Path>, resource: &str) -> Result<Vec<RevisionInfo>> {
    let handle = open_resource(db.as_ref(), resource)?;
    let latest = handle.session.most_recent_revision()?;
    let mut found = Vec::with_capacity(latest as usize + 1);
    for revision in 0..=latest {
        let trx = handle.session.begin_page_read_trx(Some(revision))?;
        found.push(RevisionInfo {
            revision,
            commit_timestamp_ms: trx.revision_root().commit_timestamp(),
            max_node_key: trx.max_node_key(),
        });
        trx.close()?;
    }
    Ok(found)
}
