use std::collections::BTreeMap;

use xxhash_rust::xxh64::xxh64;

use super::DirtyFlag;
use crate::node::NameKind;
use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::{Result, VersoError};

/// Deterministic 32-bit key of a name.
pub fn name_key(name: &str) -> i32 {
    let hash = xxh64(name.as_bytes(), 0);
    ((hash >> 32) ^ hash) as u32 as i32
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct NameEntry {
    name: String,
    count: u32,
}

/// Reference-counted dictionary of names.
///
/// A name stays in the dictionary exactly as long as its count is positive.
/// When two names hash to the same key the first one is kept and only the
/// count grows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Names {
    entries: BTreeMap<i32, NameEntry>,
}

impl Names {
    /// Registers one more use of `name` and returns its key.
    pub fn set_name(&mut self, name: &str) -> i32 {
        let key = name_key(name);
        self.entries
            .entry(key)
            .and_modify(|entry| entry.count += 1)
            .or_insert_with(|| NameEntry {
                name: name.to_owned(),
                count: 1,
            });
        key
    }

    /// Drops one use of `key`; returns true when the name was evicted.
    pub fn remove_name(&mut self, key: i32) -> bool {
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        entry.count -= 1;
        if entry.count == 0 {
            self.entries.remove(&key);
            return true;
        }
        false
    }

    /// Name stored under `key`.
    pub fn name(&self, key: i32) -> Option<&str> {
        self.entries.get(&key).map(|entry| entry.name.as_str())
    }

    /// Raw UTF-8 bytes of the name stored under `key`.
    pub fn raw_name(&self, key: i32) -> Option<&[u8]> {
        self.name(key).map(str::as_bytes)
    }

    /// Reference count of `key`, zero when absent.
    pub fn count(&self, key: i32) -> u32 {
        self.entries.get(&key).map_or(0, |entry| entry.count)
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending key order as `(key, name, count)`.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &str, u32)> {
        self.entries
            .iter()
            .map(|(key, entry)| (*key, entry.name.as_str(), entry.count))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        be::put_u32(out, self.entries.len() as u32);
        for (key, entry) in &self.entries {
            be::put_i32(out, *key);
            be::put_bytes(out, entry.name.as_bytes());
            be::put_u32(out, entry.count);
        }
    }

    fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let count = cur.read_u32()? as usize;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = cur.read_i32()?;
            let name = std::str::from_utf8(cur.read_bytes()?)
                .map_err(|_| VersoError::corrupt("name is not UTF-8"))?
                .to_owned();
            let refs = cur.read_u32()?;
            if refs == 0 {
                return Err(VersoError::corrupt("name with zero references"));
            }
            if entries.insert(key, NameEntry { name, count: refs }).is_some() {
                return Err(VersoError::corrupt("duplicate name key"));
            }
        }
        Ok(Self { entries })
    }
}

/// The element, attribute and namespace dictionaries of one revision.
#[derive(Clone, Debug, PartialEq)]
pub struct NamePage {
    pub(crate) revision: u32,
    pub(crate) dirty: DirtyFlag,
    elements: Names,
    namespaces: Names,
    attributes: Names,
}

impl NamePage {
    /// Empty dictionaries.
    pub fn new(revision: u32) -> Self {
        Self {
            revision,
            dirty: DirtyFlag::dirty(),
            elements: Names::default(),
            namespaces: Names::default(),
            attributes: Names::default(),
        }
    }

    /// Copy of a committed page for the next revision.
    pub fn successor(&self, revision: u32) -> Self {
        Self {
            revision,
            dirty: DirtyFlag::dirty(),
            ..self.clone()
        }
    }

    /// Dictionary of `kind`.
    pub fn names(&self, kind: NameKind) -> &Names {
        match kind {
            NameKind::Element => &self.elements,
            NameKind::Attribute => &self.attributes,
            NameKind::Namespace => &self.namespaces,
        }
    }

    fn names_mut(&mut self, kind: NameKind) -> &mut Names {
        self.dirty.set(true);
        match kind {
            NameKind::Element => &mut self.elements,
            NameKind::Attribute => &mut self.attributes,
            NameKind::Namespace => &mut self.namespaces,
        }
    }

    /// Registers a use of `name` in the `kind` dictionary.
    pub fn set_name(&mut self, name: &str, kind: NameKind) -> i32 {
        self.names_mut(kind).set_name(name)
    }

    /// Drops a use of `key` in the `kind` dictionary.
    pub fn remove_name(&mut self, key: i32, kind: NameKind) -> bool {
        self.names_mut(kind).remove_name(key)
    }

    /// Looks up a name.
    pub fn name(&self, key: i32, kind: NameKind) -> Option<&str> {
        self.names(kind).name(key)
    }

    /// Reference count of a name.
    pub fn count(&self, key: i32, kind: NameKind) -> u32 {
        self.names(kind).count(key)
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        self.elements.encode(out);
        self.namespaces.encode(out);
        self.attributes.encode(out);
    }

    pub(crate) fn decode_body(revision: u32, cur: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            revision,
            dirty: DirtyFlag::default(),
            elements: Names::decode(cur)?,
            namespaces: Names::decode(cur)?,
            attributes: Names::decode(cur)?,
        })
    }
}
