//! Deadlines per key.
//!
//! Each category keeps one table. Deadlines are whole seconds since the
//! Unix epoch and a key is expired once `deadline <= now`. Expired entries
//! are not removed eagerly: reads filter them and compaction purges them.

use super::{relocate_slot, remap_slot};
use crate::segment::Record;
use crate::types::{Location, SegmentId, Slot};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: u64,
    slot: Slot,
}

/// Key to deadline, backed by the `Expire` record that armed it.
#[derive(Debug, Clone, Default)]
pub struct ExpiryTable {
    deadlines: HashMap<Vec<u8>, Deadline>,
}

impl ExpiryTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a deadline as carried in an `Expire` record's value.
    #[must_use]
    pub fn encode_deadline(at: u64) -> [u8; 8] {
        at.to_be_bytes()
    }

    fn decode_deadline(raw: &[u8]) -> Option<u64> {
        raw.try_into().ok().map(u64::from_be_bytes)
    }

    /// Applies an `Expire` or `Persist` record.
    ///
    /// An `Expire` whose value is not an 8-byte deadline is dead.
    pub fn apply(&mut self, record: &Record, slot: Slot, stale: &mut Vec<Slot>) {
        if record.op.is_expire() {
            match Self::decode_deadline(&record.value) {
                Some(at) => {
                    let previous = self
                        .deadlines
                        .insert(record.key.clone(), Deadline { at, slot });
                    if let Some(previous) = previous {
                        stale.push(previous.slot);
                    }
                }
                None => stale.push(slot),
            }
        } else if record.op.is_ttl() {
            self.disarm(&record.key, stale);
            stale.push(slot);
        }
    }

    /// Drops the deadline of `key`. Returns true if one was armed.
    pub fn disarm(&mut self, key: &[u8], stale: &mut Vec<Slot>) -> bool {
        match self.deadlines.remove(key) {
            Some(deadline) => {
                stale.push(deadline.slot);
                true
            }
            None => false,
        }
    }

    /// The deadline of `key`, expired or not.
    #[must_use]
    pub fn deadline(&self, key: &[u8]) -> Option<u64> {
        self.deadlines.get(key).map(|d| d.at)
    }

    /// True if `key` has a deadline at or before `now`.
    #[must_use]
    pub fn is_expired(&self, key: &[u8], now: u64) -> bool {
        self.deadlines.get(key).is_some_and(|d| d.at <= now)
    }

    /// True if `record` is the `Expire` record currently arming its key.
    #[must_use]
    pub fn is_live(&self, record: &Record, location: Location) -> bool {
        record.op.is_expire()
            && self
                .deadlines
                .get(&record.key)
                .is_some_and(|d| d.slot.location == location)
    }

    /// Moves the deadline of `key` if it is still backed by `from`.
    pub fn relocate(&mut self, key: &[u8], from: Location, to: Location) -> bool {
        self.deadlines
            .get_mut(key)
            .is_some_and(|d| relocate_slot(&mut d.slot, from, to))
    }

    /// Rewrites every deadline backed by segment `from`.
    pub fn remap_segment(&mut self, from: SegmentId, to: SegmentId) {
        for deadline in self.deadlines.values_mut() {
            remap_slot(&mut deadline.slot, from, to);
        }
    }

    /// Keys whose deadline has passed.
    #[must_use]
    pub fn expired_keys(&self, now: u64) -> Vec<Vec<u8>> {
        self.deadlines
            .iter()
            .filter(|(_, d)| d.at <= now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of armed deadlines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// True if no deadline is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use crate::types::Category;

    fn at(offset: u64) -> Slot {
        Slot::new(Location::new(SegmentId::main(0), offset), 24)
    }

    fn expire(key: &str, deadline: u64) -> Record {
        Record::new(
            Operation::expire(Category::Hash),
            key,
            ExpiryTable::encode_deadline(deadline).to_vec(),
            "",
        )
    }

    #[test]
    fn later_expire_supersedes_earlier() {
        let mut table = ExpiryTable::new();
        let mut stale = Vec::new();
        table.apply(&expire("k", 100), at(0), &mut stale);
        table.apply(&expire("k", 200), at(24), &mut stale);

        assert_eq!(table.deadline(b"k"), Some(200));
        assert_eq!(stale, vec![at(0)]);
        assert!(!table.is_live(&expire("k", 100), at(0).location));
        assert!(table.is_live(&expire("k", 200), at(24).location));
    }

    #[test]
    fn deadline_boundary_counts_as_expired() {
        let mut table = ExpiryTable::new();
        let mut stale = Vec::new();
        table.apply(&expire("k", 50), at(0), &mut stale);

        assert!(!table.is_expired(b"k", 49));
        assert!(table.is_expired(b"k", 50));
        assert_eq!(table.expired_keys(50), vec![b"k".to_vec()]);
        assert!(table.expired_keys(49).is_empty());
    }

    #[test]
    fn persist_disarms_and_is_itself_stale() {
        let mut table = ExpiryTable::new();
        let mut stale = Vec::new();
        let persist = Record::new(Operation::persist(Category::Hash), "k", "", "");
        table.apply(&expire("k", 50), at(0), &mut stale);
        table.apply(&persist, at(24), &mut stale);

        assert!(table.is_empty());
        assert_eq!(stale, vec![at(0), at(24)]);
    }

    #[test]
    fn malformed_deadline_is_dead() {
        let mut table = ExpiryTable::new();
        let mut stale = Vec::new();
        let bad = Record::new(Operation::expire(Category::Hash), "k", "soon", "");
        table.apply(&bad, at(0), &mut stale);
        assert!(table.is_empty());
        assert_eq!(stale, vec![at(0)]);
    }
}
