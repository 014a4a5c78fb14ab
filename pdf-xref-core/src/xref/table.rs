//! Cross-reference table
//!
//! Maps every [`ObjectKey`] to the place its definition lives. Entries are
//! only ever added, never replaced, so the first writer for a key wins. The
//! chain walker visits revisions newest first, which makes the first writer
//! the authoritative one.

use crate::parser::ObjectKey;
use std::collections::HashMap;

/// Location of one object slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// Unused or deleted slot; `next_free` links the free list
    Free { next_free: u64 },
    /// Object definition starts at this absolute byte offset
    InUse { offset: u64 },
    /// Object is stored in an object stream
    Compressed { stream_number: u64, index: u32 },
}

impl XrefEntry {
    pub fn is_in_use(&self) -> bool {
        !matches!(self, XrefEntry::Free { .. })
    }

    /// Byte offset for uncompressed in-use entries
    pub fn offset(&self) -> Option<u64> {
        match self {
            XrefEntry::InUse { offset } => Some(*offset),
            _ => None,
        }
    }
}

/// Resolved object index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Xref {
    entries: HashMap<ObjectKey, XrefEntry>,
    highest_number: Option<u64>,
}

impl Xref {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry` unless `key` already has one. Returns whether it was inserted.
    pub fn add(&mut self, key: ObjectKey, entry: XrefEntry) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, entry);
        self.highest_number = Some(self.highest_number.map_or(key.number, |n| n.max(key.number)));
        true
    }

    /// Merge another table; entries already present here are kept
    pub fn merge(&mut self, other: Xref) {
        let mut incoming: Vec<_> = other.entries.into_iter().collect();
        incoming.sort_by_key(|(key, _)| *key);
        for (key, entry) in incoming {
            self.add(key, entry);
        }
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&XrefEntry> {
        self.entries.get(key)
    }

    /// Entry with the highest generation recorded for `number`
    pub fn get_latest(&self, number: u64) -> Option<(ObjectKey, &XrefEntry)> {
        self.entries
            .iter()
            .filter(|(key, _)| key.number == number)
            .max_by_key(|(key, _)| key.generation)
            .map(|(key, entry)| (*key, entry))
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest object number seen so far (0 for an empty table)
    pub fn highest_object_number(&self) -> u64 {
        self.highest_number.unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectKey, &XrefEntry)> {
        self.entries.iter()
    }

    /// Whether any entry still locates an object, directly or in an object stream
    pub fn has_in_use_entries(&self) -> bool {
        self.entries.values().any(XrefEntry::is_in_use)
    }

    /// Uncompressed in-use entries sorted by key
    pub fn in_use_offsets(&self) -> Vec<(ObjectKey, u64)> {
        let mut offsets: Vec<_> = self
            .entries
            .iter()
            .filter_map(|(key, entry)| entry.offset().map(|offset| (*key, offset)))
            .collect();
        offsets.sort_unstable();
        offsets
    }

    /// Point an existing in-use entry at a corrected offset
    pub(crate) fn relocate(&mut self, key: &ObjectKey, offset: u64) {
        if let Some(entry @ XrefEntry::InUse { .. }) = self.entries.get_mut(key) {
            *entry = XrefEntry::InUse { offset };
        }
    }

    /// Drop an entry that failed verification
    pub(crate) fn remove(&mut self, key: &ObjectKey) -> Option<XrefEntry> {
        self.entries.remove(key)
    }
}
