//! Index for lists.
//!
//! Elements are addressed by sequence number, not position. Each list keeps
//! two counters: `head` is the next free sequence on the left and `tail`
//! the next free one on the right, so the live window is the open interval
//! `(head, tail)` and the length is `tail - head - 1`.
//!
//! ```text
//!   head                         tail
//!    │   ┌─────┬─────┬─────┐      │
//!    ▼   │ b   │ a   │ c   │      ▼
//!  ──┼───┼─────┼─────┼─────┼──────┼──
//!   h-1    h     h+1   h+2      h+3
//! ```
//!
//! Pushing extends the window without moving existing elements. The
//! counters are also persisted in a counter record per key (`Meta`, or
//! `Trim` for ltrim), written after every operation that shrinks or
//! reshapes the window. A counter record releases every element outside
//! its window.
//!
//! Commands that move elements around never overwrite a visible sequence.
//! They write the new contents under fresh sequences outside the window
//! (see [`ListMeta::relocated`]) and the counter record that follows makes
//! them visible in one step. A crash in between leaves elements nobody can
//! see; [`IndexAdapter::finish_replay`] releases them on the next open.

use super::{relocate_slot, remap_slot, IndexAdapter};
use crate::operation::{ListOp, Operation};
use crate::segment::Record;
use crate::types::{Category, Location, SegmentId, Slot};
use std::collections::{BTreeMap, HashMap};

/// Head counter of a brand-new list. The tail starts one above it.
pub const INITIAL_HEAD: u32 = u32::MAX / 2;

/// Builds the record key of an element: sequence (u32 BE) then user key.
#[must_use]
pub fn element_key(seq: u32, key: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(4 + key.len());
    raw.extend_from_slice(&seq.to_be_bytes());
    raw.extend_from_slice(key);
    raw
}

/// Splits an element record key into sequence and user key.
#[must_use]
pub fn split_element_key(raw: &[u8]) -> Option<(u32, &[u8])> {
    if raw.len() <= 4 {
        return None;
    }
    let (seq, key) = raw.split_at(4);
    Some((u32::from_be_bytes([seq[0], seq[1], seq[2], seq[3]]), key))
}

/// The head/tail counters of one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListMeta {
    /// Next free sequence on the left.
    pub head: u32,
    /// Next free sequence on the right.
    pub tail: u32,
}

impl ListMeta {
    /// Counters of an empty, never-used list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: INITIAL_HEAD,
            tail: INITIAL_HEAD + 1,
        }
    }

    /// Counters with the given bounds.
    #[must_use]
    pub const fn from_counters(head: u32, tail: u32) -> Self {
        Self { head, tail }
    }

    /// Number of elements in the window.
    #[must_use]
    pub const fn len(self) -> usize {
        (self.tail - self.head - 1) as usize
    }

    /// True when the window is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// True when `seq` lies inside the window.
    #[must_use]
    pub const fn contains(self, seq: u32) -> bool {
        self.head < seq && seq < self.tail
    }

    /// Counters of a window of `len` sequences sharing none with this one.
    ///
    /// Prefers the free range right of the tail and falls back to the left
    /// of the head. `None` when neither side has room.
    #[must_use]
    pub fn relocated(self, len: u32) -> Option<Self> {
        if let Some(tail) = self.tail.checked_add(len) {
            return Some(Self::from_counters(self.tail - 1, tail));
        }
        self.head
            .checked_sub(len)
            .map(|head| Self::from_counters(head, self.head + 1))
    }

    /// Sequence of the element at zero-based position `index`.
    #[must_use]
    pub const fn seq_at(self, index: usize) -> u32 {
        self.head + 1 + index as u32
    }

    /// Encodes the counters as the value of a `Meta` record.
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(8);
        raw.extend_from_slice(&self.head.to_be_bytes());
        raw.extend_from_slice(&self.tail.to_be_bytes());
        raw
    }

    /// Decodes a `Meta` value. Rejects anything but 8 bytes with
    /// `head < tail`.
    #[must_use]
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let raw: &[u8; 8] = raw.try_into().ok()?;
        let head = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let tail = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
        (head < tail).then_some(Self { head, tail })
    }
}

impl Default for ListMeta {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct Element {
    value: Vec<u8>,
    slot: Slot,
}

#[derive(Debug, Clone, Default)]
struct ListEntry {
    meta: ListMeta,
    meta_slot: Option<Slot>,
    elements: BTreeMap<u32, Element>,
}

impl ListEntry {
    fn upsert(&mut self, seq: u32, value: &[u8], slot: Slot, stale: &mut Vec<Slot>) {
        let element = Element {
            value: value.to_vec(),
            slot,
        };
        if let Some(old) = self.elements.insert(seq, element) {
            stale.push(old.slot);
        }
    }

    fn remove(&mut self, seq: u32, stale: &mut Vec<Slot>) {
        if let Some(old) = self.elements.remove(&seq) {
            stale.push(old.slot);
        }
    }

    /// Drops every element outside the window.
    fn retain_window(&mut self, stale: &mut Vec<Slot>) {
        let meta = self.meta;
        self.elements.retain(|seq, element| {
            let keep = meta.contains(*seq);
            if !keep {
                stale.push(element.slot);
            }
            keep
        });
    }

    fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.meta_slot
            .into_iter()
            .chain(self.elements.values().map(|e| e.slot))
    }
}

/// Sequence-addressed list index. Element values are always cached.
#[derive(Debug, Clone, Default)]
pub struct ListIndex {
    lists: HashMap<Vec<u8>, ListEntry>,
}

impl ListIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counters of `key`.
    #[must_use]
    pub fn meta(&self, key: &[u8]) -> Option<ListMeta> {
        self.lists.get(key).map(|entry| entry.meta)
    }

    /// Returns the element stored at `seq`.
    #[must_use]
    pub fn element(&self, key: &[u8], seq: u32) -> Option<&[u8]> {
        self.lists
            .get(key)?
            .elements
            .get(&seq)
            .map(|e| e.value.as_slice())
    }

    /// Elements inside the window of `key`, in list order.
    #[must_use]
    pub fn window(&self, key: &[u8]) -> Vec<(u32, &[u8])> {
        let Some(entry) = self.lists.get(key) else {
            return Vec::new();
        };
        if entry.meta.is_empty() {
            return Vec::new();
        }
        entry
            .elements
            .range(entry.meta.head + 1..entry.meta.tail)
            .map(|(seq, e)| (*seq, e.value.as_slice()))
            .collect()
    }

    fn element_slot(&self, record: &Record) -> Option<Slot> {
        let (seq, key) = split_element_key(&record.key)?;
        self.lists.get(key)?.elements.get(&seq).map(|e| e.slot)
    }

    fn element_slot_mut(&mut self, record: &Record) -> Option<&mut Slot> {
        let (seq, key) = split_element_key(&record.key)?;
        self.lists
            .get_mut(key)?
            .elements
            .get_mut(&seq)
            .map(|e| &mut e.slot)
    }

    fn apply_element(&mut self, op: ListOp, record: &Record, slot: Slot, stale: &mut Vec<Slot>) {
        let Some((seq, key)) = split_element_key(&record.key) else {
            stale.push(slot);
            return;
        };

        match op {
            ListOp::PushLeft => {
                let Some(below) = seq.checked_sub(1) else {
                    stale.push(slot);
                    return;
                };
                let entry = self.lists.entry(key.to_vec()).or_default();
                entry.upsert(seq, &record.value, slot, stale);
                entry.meta.head = entry.meta.head.min(below);
            }
            ListOp::PushRight => {
                let Some(above) = seq.checked_add(1) else {
                    stale.push(slot);
                    return;
                };
                let entry = self.lists.entry(key.to_vec()).or_default();
                entry.upsert(seq, &record.value, slot, stale);
                entry.meta.tail = entry.meta.tail.max(above);
            }
            ListOp::RemoveByValue | ListOp::InsertRelative | ListOp::SetAt => {
                let entry = self.lists.entry(key.to_vec()).or_default();
                entry.upsert(seq, &record.value, slot, stale);
            }
            ListOp::PopLeft | ListOp::PopRight => {
                if let Some(entry) = self.lists.get_mut(key) {
                    entry.remove(seq, stale);
                    let meta = &mut entry.meta;
                    if seq == meta.head.wrapping_add(1) && seq < meta.tail {
                        meta.head = seq;
                    } else if seq.wrapping_add(1) == meta.tail && seq > meta.head {
                        meta.tail = seq;
                    }
                }
                stale.push(slot);
            }
            ListOp::Clear | ListOp::Meta | ListOp::Trim | ListOp::Expire | ListOp::Persist => {}
        }
    }
}

const fn is_element_op(op: ListOp) -> bool {
    matches!(
        op,
        ListOp::PushLeft
            | ListOp::PushRight
            | ListOp::PopLeft
            | ListOp::PopRight
            | ListOp::RemoveByValue
            | ListOp::InsertRelative
            | ListOp::SetAt
    )
}

/// Records carrying a key's head/tail counters.
const fn is_counter_op(op: ListOp) -> bool {
    matches!(op, ListOp::Meta | ListOp::Trim)
}

const fn is_element_upsert(op: ListOp) -> bool {
    matches!(
        op,
        ListOp::PushLeft
            | ListOp::PushRight
            | ListOp::RemoveByValue
            | ListOp::InsertRelative
            | ListOp::SetAt
    )
}

impl IndexAdapter for ListIndex {
    const CATEGORY: Category = Category::List;

    fn apply(&mut self, record: &Record, slot: Slot, stale: &mut Vec<Slot>) {
        let Operation::List(op) = record.op else {
            stale.push(slot);
            return;
        };

        match op {
            op if is_element_op(op) => self.apply_element(op, record, slot, stale),
            op if is_counter_op(op) => {
                let Some(meta) = ListMeta::decode(&record.value) else {
                    stale.push(slot);
                    return;
                };
                let entry = self.lists.entry(record.key.clone()).or_default();
                entry.meta = meta;
                entry.retain_window(stale);
                if let Some(old) = entry.meta_slot.replace(slot) {
                    stale.push(old);
                }
            }
            ListOp::Clear => {
                if let Some(entry) = self.lists.remove(&record.key) {
                    stale.extend(entry.slots());
                }
                stale.push(slot);
            }
            _ => {}
        }
    }

    fn is_live(&self, record: &Record, location: Location) -> bool {
        match record.op {
            Operation::List(op) if is_element_upsert(op) => self
                .element_slot(record)
                .is_some_and(|slot| slot.location == location),
            Operation::List(op) if is_counter_op(op) => self
                .lists
                .get(&record.key)
                .and_then(|entry| entry.meta_slot)
                .is_some_and(|slot| slot.location == location),
            _ => false,
        }
    }

    fn relocate(&mut self, record: &Record, from: Location, to: Location) -> bool {
        match record.op {
            Operation::List(op) if is_element_upsert(op) => self
                .element_slot_mut(record)
                .is_some_and(|slot| relocate_slot(slot, from, to)),
            Operation::List(op) if is_counter_op(op) => self
                .lists
                .get_mut(&record.key)
                .and_then(|entry| entry.meta_slot.as_mut())
                .is_some_and(|slot| relocate_slot(slot, from, to)),
            _ => false,
        }
    }

    fn remap_segment(&mut self, from: SegmentId, to: SegmentId) {
        for entry in self.lists.values_mut() {
            if let Some(slot) = entry.meta_slot.as_mut() {
                remap_slot(slot, from, to);
            }
            for element in entry.elements.values_mut() {
                remap_slot(&mut element.slot, from, to);
            }
        }
    }

    fn key_of(record: &Record) -> &[u8] {
        match record.op {
            Operation::List(op) if is_element_op(op) => split_element_key(&record.key)
                .map_or(record.key.as_slice(), |(_, key)| key),
            _ => &record.key,
        }
    }

    fn contains_key(&self, key: &[u8]) -> bool {
        self.lists.contains_key(key)
    }

    fn remove_key(&mut self, key: &[u8], stale: &mut Vec<Slot>) {
        if let Some(entry) = self.lists.remove(key) {
            stale.extend(entry.slots());
        }
    }

    fn key_count(&self) -> usize {
        self.lists.len()
    }

    fn finish_replay(&mut self, stale: &mut Vec<Slot>) {
        for entry in self.lists.values_mut() {
            entry.retain_window(stale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Log {
        index: ListIndex,
        stale: Vec<Slot>,
        offset: u64,
    }

    impl Log {
        fn new() -> Self {
            Self {
                index: ListIndex::new(),
                stale: Vec::new(),
                offset: 0,
            }
        }

        fn apply(&mut self, record: Record) -> Slot {
            let slot = Slot::new(Location::new(SegmentId::main(0), self.offset), record.size());
            self.offset += record.size();
            self.index.apply(&record, slot, &mut self.stale);
            slot
        }

        fn push_left(&mut self, key: &str, value: &str) {
            let head = self.index.meta(key.as_bytes()).unwrap_or_default().head;
            let raw = element_key(head, key.as_bytes());
            self.apply(Record::new(Operation::List(ListOp::PushLeft), raw, value, ""));
        }

        fn push_right(&mut self, key: &str, value: &str) {
            let tail = self.index.meta(key.as_bytes()).unwrap_or_default().tail;
            let raw = element_key(tail, key.as_bytes());
            self.apply(Record::new(Operation::List(ListOp::PushRight), raw, value, ""));
        }

        fn values(&self, key: &str) -> Vec<String> {
            self.index
                .window(key.as_bytes())
                .into_iter()
                .map(|(_, v)| String::from_utf8(v.to_vec()).unwrap())
                .collect()
        }
    }

    #[test]
    fn pushes_extend_the_window() {
        let mut log = Log::new();
        log.push_left("k", "a");
        log.push_left("k", "b");
        log.push_right("k", "c");

        assert_eq!(log.values("k"), vec!["b", "a", "c"]);
        let meta = log.index.meta(b"k").unwrap();
        assert_eq!(meta.len(), 3);
        assert_eq!(meta.head, INITIAL_HEAD - 2);
        assert_eq!(meta.tail, INITIAL_HEAD + 2);
    }

    #[test]
    fn pop_removes_boundary_and_meta_overwrites_counters() {
        let mut log = Log::new();
        log.push_left("k", "a");
        log.push_left("k", "b");

        let meta = log.index.meta(b"k").unwrap();
        let first = meta.seq_at(0);
        let pop = log.apply(Record::new(
            Operation::List(ListOp::PopLeft),
            element_key(first, b"k"),
            "",
            "",
        ));
        assert!(log.stale.contains(&pop));
        assert_eq!(log.values("k"), vec!["a"]);

        let meta = ListMeta {
            head: first,
            tail: meta.tail,
        };
        log.apply(Record::new(Operation::List(ListOp::Meta), "k", meta.encode(), ""));
        assert_eq!(log.index.meta(b"k"), Some(meta));
        assert_eq!(log.values("k"), vec!["a"]);
    }

    #[test]
    fn clear_drops_every_slot() {
        let mut log = Log::new();
        log.push_right("k", "a");
        log.push_right("k", "b");
        log.stale.clear();

        let clear = log.apply(Record::new(Operation::List(ListOp::Clear), "k", "", ""));
        assert!(!log.index.contains_key(b"k"));
        assert_eq!(log.stale.len(), 3);
        assert_eq!(log.stale.last(), Some(&clear));
    }

    #[test]
    fn liveness_follows_element_slot() {
        let mut log = Log::new();
        let seq = INITIAL_HEAD + 1;
        let first = Record::new(
            Operation::List(ListOp::PushRight),
            element_key(seq, b"k"),
            "a",
            "",
        );
        let at_first = log.apply(first.clone()).location;
        let rewrite = Record::new(
            Operation::List(ListOp::SetAt),
            element_key(seq, b"k"),
            "z",
            "",
        );
        let at_rewrite = log.apply(rewrite.clone()).location;

        assert!(!log.index.is_live(&first, at_first));
        assert!(log.index.is_live(&rewrite, at_rewrite));
        assert_eq!(ListIndex::key_of(&rewrite), b"k");
        assert_eq!(log.values("k"), vec!["z"]);

        let moved = Location::new(SegmentId::merge(0), 0);
        assert!(log.index.relocate(&rewrite, at_rewrite, moved));
        assert!(log.index.is_live(&rewrite, moved));
    }

    #[test]
    fn counter_record_commits_a_relocated_window() {
        let mut log = Log::new();
        log.push_right("k", "a");
        log.push_right("k", "b");
        let old = log.index.meta(b"k").unwrap();
        let moved = old.relocated(3).unwrap();
        assert_eq!(moved.head + 1, old.tail);

        for (position, value) in ["a", "z", "b"].into_iter().enumerate() {
            let raw = element_key(moved.seq_at(position), b"k");
            log.apply(Record::new(Operation::List(ListOp::InsertRelative), raw, value, ""));
            // Writes outside the window stay invisible until the commit.
            assert_eq!(log.values("k"), vec!["a", "b"]);
        }

        log.stale.clear();
        log.apply(Record::new(Operation::List(ListOp::Meta), "k", moved.encode(), ""));
        assert_eq!(log.values("k"), vec!["a", "z", "b"]);
        assert_eq!(log.stale.len(), 2, "both old elements are released");
    }

    #[test]
    fn trim_record_narrows_the_window() {
        let mut log = Log::new();
        for value in ["a", "b", "c", "d"] {
            log.push_right("k", value);
        }
        let meta = log.index.meta(b"k").unwrap();
        let trimmed = ListMeta::from_counters(meta.seq_at(1) - 1, meta.seq_at(2) + 1);
        let record = Record::new(Operation::List(ListOp::Trim), "k", trimmed.encode(), "");
        let at = log.apply(record.clone()).location;

        assert_eq!(log.values("k"), vec!["b", "c"]);
        assert_eq!(log.index.element(b"k", meta.seq_at(0)), None);
        assert!(log.index.is_live(&record, at));
        assert_eq!(ListIndex::key_of(&record), b"k");
    }

    #[test]
    fn finish_replay_releases_uncommitted_elements() {
        let mut log = Log::new();
        log.push_right("k", "a");
        let meta = log.index.meta(b"k").unwrap();
        let orphan = Record::new(
            Operation::List(ListOp::RemoveByValue),
            element_key(meta.tail + 5, b"k"),
            "x",
            "",
        );
        let at = log.apply(orphan.clone()).location;
        assert!(log.index.is_live(&orphan, at));

        log.stale.clear();
        log.index.finish_replay(&mut log.stale);
        assert!(!log.index.is_live(&orphan, at));
        assert_eq!(log.stale.len(), 1);
        assert_eq!(log.values("k"), vec!["a"]);
    }

    #[test]
    fn relocation_prefers_the_right_and_falls_back_left() {
        let meta = ListMeta::new();
        let right = meta.relocated(4).unwrap();
        assert_eq!(right, ListMeta::from_counters(meta.tail - 1, meta.tail + 4));
        assert!(!right.contains(meta.tail - 1));
        assert_eq!(right.len(), 4);

        let full = ListMeta::from_counters(10, u32::MAX - 1);
        assert_eq!(full.relocated(3), Some(ListMeta::from_counters(7, 11)));
        assert_eq!(full.relocated(11), None);
    }

    #[test]
    fn meta_codec() {
        let meta = ListMeta { head: 7, tail: 11 };
        assert_eq!(ListMeta::decode(&meta.encode()), Some(meta));
        assert_eq!(ListMeta::decode(&[0; 7]), None);
        assert_eq!(
            ListMeta::decode(&ListMeta { head: 5, tail: 5 }.encode()),
            None
        );
        assert_eq!(split_element_key(&element_key(3, b"key")), Some((3, &b"key"[..])));
        assert_eq!(split_element_key(&[0, 0, 0, 1]), None);
    }
}
