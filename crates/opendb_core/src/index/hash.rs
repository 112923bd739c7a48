//! Index for hashes.

use super::{relocate_slot, remap_slot, IndexAdapter};
use crate::operation::{HashOp, Operation};
use crate::segment::Record;
use crate::types::{Category, Location, SegmentId, Slot};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
struct Field {
    value: Vec<u8>,
    slot: Slot,
}

/// Key to ordered field map. Field values are cached.
#[derive(Debug, Clone, Default)]
pub struct HashIndex {
    hashes: HashMap<Vec<u8>, BTreeMap<Vec<u8>, Field>>,
}

impl HashIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `field` in `key`.
    #[must_use]
    pub fn get(&self, key: &[u8], field: &[u8]) -> Option<&[u8]> {
        self.hashes
            .get(key)?
            .get(field)
            .map(|f| f.value.as_slice())
    }

    /// Number of fields in `key`.
    #[must_use]
    pub fn len(&self, key: &[u8]) -> usize {
        self.hashes.get(key).map_or(0, BTreeMap::len)
    }

    /// Field/value pairs of `key` in field order.
    pub fn fields(&self, key: &[u8]) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.hashes
            .get(key)
            .into_iter()
            .flat_map(|fields| fields.iter())
            .map(|(name, f)| (name.as_slice(), f.value.as_slice()))
    }

    fn field_slot_mut(&mut self, record: &Record) -> Option<&mut Slot> {
        self.hashes
            .get_mut(&record.key)?
            .get_mut(&record.extra)
            .map(|f| &mut f.slot)
    }
}

impl IndexAdapter for HashIndex {
    const CATEGORY: Category = Category::Hash;

    fn apply(&mut self, record: &Record, slot: Slot, stale: &mut Vec<Slot>) {
        match record.op {
            Operation::Hash(HashOp::Set) => {
                let field = Field {
                    value: record.value.clone(),
                    slot,
                };
                let fields = self.hashes.entry(record.key.clone()).or_default();
                if let Some(old) = fields.insert(record.extra.clone(), field) {
                    stale.push(old.slot);
                }
            }
            Operation::Hash(HashOp::Delete) => {
                if let Some(fields) = self.hashes.get_mut(&record.key) {
                    if let Some(old) = fields.remove(&record.extra) {
                        stale.push(old.slot);
                    }
                    if fields.is_empty() {
                        self.hashes.remove(&record.key);
                    }
                }
                stale.push(slot);
            }
            Operation::Hash(HashOp::Clear) => {
                self.remove_key(&record.key, stale);
                stale.push(slot);
            }
            Operation::Hash(HashOp::Expire | HashOp::Persist) => {}
            _ => stale.push(slot),
        }
    }

    fn is_live(&self, record: &Record, location: Location) -> bool {
        matches!(record.op, Operation::Hash(HashOp::Set))
            && self
                .hashes
                .get(&record.key)
                .and_then(|fields| fields.get(&record.extra))
                .is_some_and(|f| f.slot.location == location)
    }

    fn relocate(&mut self, record: &Record, from: Location, to: Location) -> bool {
        if !matches!(record.op, Operation::Hash(HashOp::Set)) {
            return false;
        }
        self.field_slot_mut(record)
            .is_some_and(|slot| relocate_slot(slot, from, to))
    }

    fn remap_segment(&mut self, from: SegmentId, to: SegmentId) {
        for fields in self.hashes.values_mut() {
            for field in fields.values_mut() {
                remap_slot(&mut field.slot, from, to);
            }
        }
    }

    fn key_of(record: &Record) -> &[u8] {
        &record.key
    }

    fn contains_key(&self, key: &[u8]) -> bool {
        self.hashes.contains_key(key)
    }

    fn remove_key(&mut self, key: &[u8], stale: &mut Vec<Slot>) {
        if let Some(fields) = self.hashes.remove(key) {
            stale.extend(fields.into_values().map(|f| f.slot));
        }
    }

    fn key_count(&self) -> usize {
        self.hashes.len()
    }
}
