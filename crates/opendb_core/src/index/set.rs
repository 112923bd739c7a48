//! Index for sets.
//!
//! `Move` records are keyed by the source set and carry the destination
//! key in `extra`. Once applied, the member's entry lives in the
//! destination, so the record is live for as long as that entry points at
//! it.

use super::{relocate_slot, remap_slot, IndexAdapter};
use crate::operation::{Operation, SetOp};
use crate::segment::Record;
use crate::types::{Category, Location, SegmentId, Slot};
use std::collections::{BTreeMap, HashMap};

/// Key to ordered member set.
#[derive(Debug, Clone, Default)]
pub struct SetIndex {
    sets: HashMap<Vec<u8>, BTreeMap<Vec<u8>, Slot>>,
}

impl SetIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `member` is in `key`.
    #[must_use]
    pub fn contains(&self, key: &[u8], member: &[u8]) -> bool {
        self.sets
            .get(key)
            .is_some_and(|members| members.contains_key(member))
    }

    /// Number of members in `key`.
    #[must_use]
    pub fn len(&self, key: &[u8]) -> usize {
        self.sets.get(key).map_or(0, BTreeMap::len)
    }

    /// Members of `key` in byte order.
    pub fn members(&self, key: &[u8]) -> impl Iterator<Item = &[u8]> {
        self.sets
            .get(key)
            .into_iter()
            .flat_map(BTreeMap::keys)
            .map(Vec::as_slice)
    }

    fn insert(&mut self, key: &[u8], member: &[u8], slot: Slot, stale: &mut Vec<Slot>) {
        let members = self.sets.entry(key.to_vec()).or_default();
        if let Some(old) = members.insert(member.to_vec(), slot) {
            stale.push(old);
        }
    }

    fn remove(&mut self, key: &[u8], member: &[u8], stale: &mut Vec<Slot>) {
        if let Some(members) = self.sets.get_mut(key) {
            if let Some(old) = members.remove(member) {
                stale.push(old);
            }
            if members.is_empty() {
                self.sets.remove(key);
            }
        }
    }

    /// The entry a data record backs: `(key, member)`.
    fn backed_entry(record: &Record) -> Option<(&[u8], &[u8])> {
        match record.op {
            Operation::Set(SetOp::Add) => Some((&record.key, &record.value)),
            Operation::Set(SetOp::Move) => Some((&record.extra, &record.value)),
            _ => None,
        }
    }
}

impl IndexAdapter for SetIndex {
    const CATEGORY: Category = Category::Set;

    fn apply(&mut self, record: &Record, slot: Slot, stale: &mut Vec<Slot>) {
        match record.op {
            Operation::Set(SetOp::Add) => self.insert(&record.key, &record.value, slot, stale),
            Operation::Set(SetOp::Remove) => {
                self.remove(&record.key, &record.value, stale);
                stale.push(slot);
            }
            Operation::Set(SetOp::Move) => {
                if record.extra.is_empty() {
                    stale.push(slot);
                    return;
                }
                self.remove(&record.key, &record.value, stale);
                self.insert(&record.extra, &record.value, slot, stale);
            }
            Operation::Set(SetOp::Clear) => {
                self.remove_key(&record.key, stale);
                stale.push(slot);
            }
            Operation::Set(SetOp::Expire | SetOp::Persist) => {}
            _ => stale.push(slot),
        }
    }

    fn is_live(&self, record: &Record, location: Location) -> bool {
        Self::backed_entry(record)
            .and_then(|(key, member)| self.sets.get(key)?.get(member))
            .is_some_and(|slot| slot.location == location)
    }

    fn relocate(&mut self, record: &Record, from: Location, to: Location) -> bool {
        let Some((key, member)) = Self::backed_entry(record) else {
            return false;
        };
        self.sets
            .get_mut(key)
            .and_then(|members| members.get_mut(member))
            .is_some_and(|slot| relocate_slot(slot, from, to))
    }

    fn remap_segment(&mut self, from: SegmentId, to: SegmentId) {
        for members in self.sets.values_mut() {
            for slot in members.values_mut() {
                remap_slot(slot, from, to);
            }
        }
    }

    fn key_of(record: &Record) -> &[u8] {
        match record.op {
            Operation::Set(SetOp::Move) => &record.extra,
            _ => &record.key,
        }
    }

    fn contains_key(&self, key: &[u8]) -> bool {
        self.sets.contains_key(key)
    }

    fn remove_key(&mut self, key: &[u8], stale: &mut Vec<Slot>) {
        if let Some(members) = self.sets.remove(key) {
            stale.extend(members.into_values());
        }
    }

    fn key_count(&self) -> usize {
        self.sets.len()
    }
}
