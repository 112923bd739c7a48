//! Index for plain values.

use super::{relocate_slot, remap_slot, IndexAdapter};
use crate::config::IndexMode;
use crate::operation::{Operation, StrOp};
use crate::segment::Record;
use crate::types::{Category, Location, SegmentId, Slot};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct StrEntry {
    slot: Slot,
    /// Present only in [`IndexMode::KeyValue`].
    value: Option<Vec<u8>>,
}

/// Where a value can be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrValue<'a> {
    /// The value is cached in memory.
    Cached(&'a [u8]),
    /// The value must be read from the record at this location.
    OnDisk(Location),
}

/// Ordered map from key to the record holding its value.
#[derive(Debug, Clone)]
pub struct StrIndex {
    mode: IndexMode,
    entries: BTreeMap<Vec<u8>, StrEntry>,
}

impl StrIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(mode: IndexMode) -> Self {
        Self {
            mode,
            entries: BTreeMap::new(),
        }
    }

    /// Returns how values are held.
    #[must_use]
    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    /// Finds the value of `key`.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> Option<StrValue<'_>> {
        self.entries.get(key).map(|entry| match &entry.value {
            Some(value) => StrValue::Cached(value),
            None => StrValue::OnDisk(entry.slot.location),
        })
    }

    /// Keys in ascending byte order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.keys().map(Vec::as_slice)
    }
}

impl Default for StrIndex {
    fn default() -> Self {
        Self::new(IndexMode::default())
    }
}

impl IndexAdapter for StrIndex {
    const CATEGORY: Category = Category::String;

    fn apply(&mut self, record: &Record, slot: Slot, stale: &mut Vec<Slot>) {
        match record.op {
            Operation::Str(StrOp::Set) => {
                let value = match self.mode {
                    IndexMode::KeyValue => Some(record.value.clone()),
                    IndexMode::KeyOnly => None,
                };
                if let Some(old) = self.entries.insert(record.key.clone(), StrEntry { slot, value }) {
                    stale.push(old.slot);
                }
            }
            Operation::Str(StrOp::Delete) => {
                if let Some(old) = self.entries.remove(&record.key) {
                    stale.push(old.slot);
                }
                stale.push(slot);
            }
            // Deadlines belong to the expiry table.
            Operation::Str(StrOp::Expire | StrOp::Persist) => {}
            _ => stale.push(slot),
        }
    }

    fn is_live(&self, record: &Record, location: Location) -> bool {
        matches!(record.op, Operation::Str(StrOp::Set))
            && self
                .entries
                .get(&record.key)
                .is_some_and(|entry| entry.slot.location == location)
    }

    fn relocate(&mut self, record: &Record, from: Location, to: Location) -> bool {
        if !matches!(record.op, Operation::Str(StrOp::Set)) {
            return false;
        }
        self.entries
            .get_mut(&record.key)
            .is_some_and(|entry| relocate_slot(&mut entry.slot, from, to))
    }

    fn remap_segment(&mut self, from: SegmentId, to: SegmentId) {
        for entry in self.entries.values_mut() {
            remap_slot(&mut entry.slot, from, to);
        }
    }

    fn key_of(record: &Record) -> &[u8] {
        &record.key
    }

    fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    fn remove_key(&mut self, key: &[u8], stale: &mut Vec<Slot>) {
        if let Some(entry) = self.entries.remove(key) {
            stale.push(entry.slot);
        }
    }

    fn key_count(&self) -> usize {
        self.entries.len()
    }
}
