//! Two-tier transaction log: a bounded in-memory LRU whose evictions spill
//! into a [`PersistentCache`].

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use parking_lot::RwLock;
use tracing::debug;

use super::{PageContainer, PersistentCache};
use crate::types::{Result, VersoError};

/// Which page tree a log belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogType {
    /// Document node pages.
    Node,
    /// Path-summary node pages.
    Path,
}

impl LogType {
    /// Directory prefix of the log's side store.
    pub fn as_str(self) -> &'static str {
        match self {
            LogType::Node => "node",
            LogType::Path => "path",
        }
    }
}

struct Tiers {
    first: LruCache<u64, PageContainer>,
    second: PersistentCache,
}

/// Page containers of one write transaction, keyed by node-page key.
///
/// Lookups refresh tier-1 recency, so only the size queries take the lock
/// shared. A reader never observes an entry while it moves between tiers.
pub struct TransactionLogCache {
    tiers: RwLock<Tiers>,
}

impl TransactionLogCache {
    /// Opens the log for `log_type` of `revision` below `log_root`.
    pub fn open(log_root: &Path, log_type: LogType, revision: u32, capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or(VersoError::Invalid("log cache capacity must be positive"))?;
        let place = log_root.join(format!("{}-{}", log_type.as_str(), revision));
        let second = PersistentCache::open(place)?;
        Ok(Self {
            tiers: RwLock::new(Tiers {
                first: LruCache::new(capacity),
                second,
            }),
        })
    }

    /// Container for `key`, or [`PageContainer::empty`] when absent.
    pub fn get(&self, key: u64) -> Result<PageContainer> {
        let mut guard = self.tiers.write();
        let tiers = &mut *guard;
        if let Some(container) = tiers.first.get(&key) {
            return Ok(container.clone());
        }
        Ok(tiers.second.get(key)?.unwrap_or_default())
    }

    /// Non-empty containers for every key in `keys`.
    pub fn get_all(&self, keys: impl IntoIterator<Item = u64>) -> Result<HashMap<u64, PageContainer>> {
        let mut guard = self.tiers.write();
        let tiers = &mut *guard;
        let mut found = HashMap::new();
        for key in keys {
            let container = match tiers.first.get(&key).cloned() {
                Some(container) => Some(container),
                None => tiers.second.get(key)?,
            };
            if let Some(container) = container {
                found.insert(key, container);
            }
        }
        Ok(found)
    }

    /// Stores `container` under `key`, spilling the least recently used
    /// entry to the side store when tier 1 is full.
    pub fn put(&self, key: u64, container: PageContainer) -> Result<()> {
        let mut tiers = self.tiers.write();
        Self::put_locked(&mut tiers, key, container)
    }

    fn put_locked(tiers: &mut Tiers, key: u64, container: PageContainer) -> Result<()> {
        if let Some((evicted_key, evicted)) = tiers.first.push(key, container) {
            if evicted_key != key {
                debug!(key = evicted_key, "log.tier1.evict");
                tiers.second.put(evicted_key, &evicted)?;
            }
        }
        Ok(())
    }

    /// Stores every entry of `entries`.
    pub fn put_all(&self, entries: impl IntoIterator<Item = (u64, PageContainer)>) -> Result<()> {
        let mut tiers = self.tiers.write();
        for (key, container) in entries {
            Self::put_locked(&mut tiers, key, container)?;
        }
        Ok(())
    }

    /// Removes `key` from both tiers.
    pub fn remove(&self, key: u64) -> Result<()> {
        let mut tiers = self.tiers.write();
        tiers.first.pop(&key);
        tiers.second.remove(key)
    }

    /// Removes every entry from both tiers.
    pub fn clear(&self) -> Result<()> {
        let mut tiers = self.tiers.write();
        tiers.first.clear();
        tiers.second.clear()
    }

    /// Copies every tier-1 entry into the side store, leaving tier 1 intact.
    pub fn to_second_cache(&self) -> Result<()> {
        let tiers = self.tiers.write();
        tiers.second.put_all(tiers.first.iter().map(|(k, v)| (*k, v)))?;
        debug!(entries = tiers.first.len(), "log.to_second_cache");
        Ok(())
    }

    /// Entries currently held in memory.
    pub fn len_in_memory(&self) -> usize {
        self.tiers.read().first.len()
    }

    /// Entries currently held in the side store.
    pub fn len_persistent(&self) -> Result<u64> {
        self.tiers.read().second.len()
    }

    /// Drops all entries and deletes the side store.
    pub fn close(&self) -> Result<()> {
        let mut tiers = self.tiers.write();
        tiers.first.clear();
        tiers.second.close()
    }
}

impl std::fmt::Debug for TransactionLogCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tiers = self.tiers.read();
        f.debug_struct("TransactionLogCache")
            .field("in_memory", &tiers.first.len())
            .field("place", &tiers.second.place())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{NodePage, Page};
    use tempfile::tempdir;

    fn container(key: u64, revision: u32) -> PageContainer {
        PageContainer::new(
            Page::Node(NodePage::new(key, revision)),
            Page::Node(NodePage::new(key, revision)),
        )
    }

    #[test]
    fn place_is_derived_from_type_and_revision() -> Result<()> {
        let dir = tempdir()?;
        let log = TransactionLogCache::open(dir.path(), LogType::Path, 9, 4)?;
        assert!(dir.path().join("path-9").is_dir());
        log.close()?;
        assert!(!dir.path().join("path-9").exists());
        Ok(())
    }

    #[test]
    fn zero_capacity_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let err = TransactionLogCache::open(dir.path(), LogType::Node, 0, 0).unwrap_err();
        assert!(matches!(err, VersoError::Invalid(_)));
        Ok(())
    }

    #[test]
    fn reput_of_resident_key_does_not_spill() -> Result<()> {
        let dir = tempdir()?;
        let log = TransactionLogCache::open(dir.path(), LogType::Node, 1, 2)?;
        log.put(1, container(1, 1))?;
        log.put(1, container(1, 2))?;
        assert_eq!(log.len_persistent()?, 0);
        assert_eq!(log.get(1)?, container(1, 2));
        Ok(())
    }

    #[test]
    fn reads_keep_entries_resident() -> Result<()> {
        let dir = tempdir()?;
        let log = TransactionLogCache::open(dir.path(), LogType::Node, 1, 2)?;
        log.put(1, container(1, 1))?;
        log.put(2, container(2, 1))?;
        assert_eq!(log.get(1)?, container(1, 1));
        log.put(3, container(3, 1))?;
        assert_eq!(log.len_persistent()?, 1);
        // 1 was read after 2 was written, so 2 spilled and 1 is replaced in place.
        log.put(1, container(1, 2))?;
        assert_eq!(log.len_persistent()?, 1);

        assert_eq!(log.get_all([3])?.len(), 1);
        log.put(4, container(4, 1))?;
        log.put(3, container(3, 2))?;
        assert_eq!(log.len_persistent()?, 2);
        assert_eq!(log.get(2)?, container(2, 1));
        Ok(())
    }
}
