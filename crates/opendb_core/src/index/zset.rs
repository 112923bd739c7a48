//! Index for sorted sets.

use super::{relocate_slot, remap_slot, IndexAdapter};
use crate::operation::{Operation, ZSetOp};
use crate::segment::Record;
use crate::types::{Category, Location, SegmentId, Slot};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// A score with a total order.
///
/// NaN never reaches the index: records carrying it are treated as dead.
#[derive(Debug, Clone, Copy)]
pub struct Score(pub f64);

impl Score {
    /// Parses the textual score carried in a record's `extra`.
    #[must_use]
    pub fn parse(text: &[u8]) -> Option<Self> {
        let score: f64 = std::str::from_utf8(text).ok()?.parse().ok()?;
        (!score.is_nan()).then_some(Self(score))
    }

    /// Renders a score the way records carry it.
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Default)]
struct ZEntry {
    members: HashMap<Vec<u8>, (Score, Slot)>,
    ordered: BTreeSet<(Score, Vec<u8>)>,
}

impl ZEntry {
    fn rank(&self, member: &[u8]) -> Option<usize> {
        let (score, _) = self.members.get(member)?;
        let bound = (*score, member.to_vec());
        Some(self.ordered.range(..bound).count())
    }
}

/// Key to members ordered by `(score, member)`.
#[derive(Debug, Clone, Default)]
pub struct ZSetIndex {
    zsets: HashMap<Vec<u8>, ZEntry>,
}

impl ZSetIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Score of `member` in `key`.
    #[must_use]
    pub fn score(&self, key: &[u8], member: &[u8]) -> Option<f64> {
        self.zsets
            .get(key)?
            .members
            .get(member)
            .map(|(score, _)| score.0)
    }

    /// Number of members in `key`.
    #[must_use]
    pub fn len(&self, key: &[u8]) -> usize {
        self.zsets.get(key).map_or(0, |z| z.members.len())
    }

    /// Zero-based position of `member` in ascending order.
    #[must_use]
    pub fn rank(&self, key: &[u8], member: &[u8]) -> Option<usize> {
        self.zsets.get(key)?.rank(member)
    }

    /// Zero-based position of `member` in descending order.
    #[must_use]
    pub fn rev_rank(&self, key: &[u8], member: &[u8]) -> Option<usize> {
        let entry = self.zsets.get(key)?;
        let rank = entry.rank(member)?;
        Some(entry.ordered.len() - 1 - rank)
    }

    /// Members of `key` with their scores, ascending.
    pub fn ascending(&self, key: &[u8]) -> impl DoubleEndedIterator<Item = (&[u8], f64)> {
        self.zsets
            .get(key)
            .into_iter()
            .flat_map(|z| z.ordered.iter())
            .map(|(score, member)| (member.as_slice(), score.0))
    }

    /// Members whose score lies in `[min, max]`, ascending.
    pub fn score_range(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
    ) -> impl Iterator<Item = (&[u8], f64)> {
        self.ascending(key)
            .skip_while(move |(_, score)| *score < min)
            .take_while(move |(_, score)| *score <= max)
    }

    fn remove(&mut self, key: &[u8], member: &[u8], stale: &mut Vec<Slot>) {
        let Some(entry) = self.zsets.get_mut(key) else {
            return;
        };
        if let Some((score, slot)) = entry.members.remove(member) {
            entry.ordered.remove(&(score, member.to_vec()));
            stale.push(slot);
        }
        if entry.members.is_empty() {
            self.zsets.remove(key);
        }
    }

    fn slot_mut(&mut self, record: &Record) -> Option<&mut Slot> {
        self.zsets
            .get_mut(&record.key)?
            .members
            .get_mut(&record.value)
            .map(|(_, slot)| slot)
    }
}

impl IndexAdapter for ZSetIndex {
    const CATEGORY: Category = Category::SortedSet;

    fn apply(&mut self, record: &Record, slot: Slot, stale: &mut Vec<Slot>) {
        match record.op {
            Operation::ZSet(ZSetOp::Add) => {
                let Some(score) = Score::parse(&record.extra) else {
                    stale.push(slot);
                    return;
                };
                self.remove(&record.key, &record.value, stale);
                let entry = self.zsets.entry(record.key.clone()).or_default();
                entry
                    .members
                    .insert(record.value.clone(), (score, slot));
                entry.ordered.insert((score, record.value.clone()));
            }
            Operation::ZSet(ZSetOp::Remove) => {
                self.remove(&record.key, &record.value, stale);
                stale.push(slot);
            }
            Operation::ZSet(ZSetOp::Clear) => {
                self.remove_key(&record.key, stale);
                stale.push(slot);
            }
            Operation::ZSet(ZSetOp::Expire | ZSetOp::Persist) => {}
            _ => stale.push(slot),
        }
    }

    fn is_live(&self, record: &Record, location: Location) -> bool {
        matches!(record.op, Operation::ZSet(ZSetOp::Add))
            && self
                .zsets
                .get(&record.key)
                .and_then(|z| z.members.get(&record.value))
                .is_some_and(|(_, slot)| slot.location == location)
    }

    fn relocate(&mut self, record: &Record, from: Location, to: Location) -> bool {
        if !matches!(record.op, Operation::ZSet(ZSetOp::Add)) {
            return false;
        }
        self.slot_mut(record)
            .is_some_and(|slot| relocate_slot(slot, from, to))
    }

    fn remap_segment(&mut self, from: SegmentId, to: SegmentId) {
        for entry in self.zsets.values_mut() {
            for (_, slot) in entry.members.values_mut() {
                remap_slot(slot, from, to);
            }
        }
    }

    fn key_of(record: &Record) -> &[u8] {
        &record.key
    }

    fn contains_key(&self, key: &[u8]) -> bool {
        self.zsets.contains_key(key)
    }

    fn remove_key(&mut self, key: &[u8], stale: &mut Vec<Slot>) {
        if let Some(entry) = self.zsets.remove(key) {
            stale.extend(entry.members.into_values().map(|(_, slot)| slot));
        }
    }

    fn key_count(&self) -> usize {
        self.zsets.len()
    }
}
