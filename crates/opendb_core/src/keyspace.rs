//! Per-category subsystem: segments, index, deadlines and dead-byte stats.
//!
//! Every write flows through [`KeyspaceState::log`]: validate, append to the
//! active segment, then apply to the in-memory state. A failed append leaves
//! the index untouched, so nothing becomes visible that is not durable.

use crate::compaction::{CompactionResult, Compactor};
use crate::error::{CoreError, CoreResult};
use crate::index::{ExpiryTable, IndexAdapter};
use crate::operation::Operation;
use crate::recovery::{self, ReplayStats};
use crate::segment::{Record, SegmentManager};
use crate::types::{now_secs, Category, Location, SegmentId, Slot};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use tracing::debug;

/// Dead bytes per segment.
#[derive(Debug, Default)]
pub(crate) struct DiscardStats {
    dead: HashMap<SegmentId, u64>,
}

impl DiscardStats {
    pub(crate) fn record(&mut self, stale: &[Slot]) {
        for slot in stale {
            *self.dead.entry(slot.location.segment_id).or_default() += slot.size;
        }
    }

    pub(crate) fn dead_bytes(&self, segment: SegmentId) -> u64 {
        self.dead.get(&segment).copied().unwrap_or(0)
    }

    pub(crate) fn retire(&mut self, retired: &[SegmentId]) {
        for id in retired {
            self.dead.remove(id);
        }
    }

    /// Forgets retired segments and moves the counter of `from` to `to`.
    pub(crate) fn retire_and_remap(&mut self, retired: &[SegmentId], from: SegmentId, to: SegmentId) {
        self.retire(retired);
        if let Some(bytes) = self.dead.remove(&from) {
            *self.dead.entry(to).or_default() += bytes;
        }
    }
}

/// Index, deadlines and dead-byte stats of one category.
///
/// `Expire`/`Persist` records only touch the deadline table. Data records
/// that replace a whole key drop its deadline before reaching the index.
#[derive(Debug)]
pub struct Catalog<I> {
    pub(crate) index: I,
    pub(crate) expiry: ExpiryTable,
    pub(crate) discard: DiscardStats,
}

impl<I: IndexAdapter> Catalog<I> {
    pub(crate) fn new(index: I) -> Self {
        Self {
            index,
            expiry: ExpiryTable::new(),
            discard: DiscardStats::default(),
        }
    }

    /// The category index.
    pub fn index(&self) -> &I {
        &self.index
    }

    pub(crate) fn apply(&mut self, record: &Record, slot: Slot) {
        let mut stale = Vec::new();
        if record.op.is_ttl() {
            self.expiry.apply(record, slot, &mut stale);
        } else {
            let key = I::key_of(record);
            if record.op.clears_ttl() {
                self.expiry.disarm(key, &mut stale);
            }
            // A move names its source in `key` and its destination as the
            // indexed key, so both are watched.
            let touched = [key, record.key.as_slice()];
            let existed = touched.map(|key| self.index.contains_key(key));
            self.index.apply(record, slot, &mut stale);
            // A key emptied member by member is gone, and so is its deadline.
            // Only the transition counts: a key purged by compaction keeps
            // its deadline until a write clears it.
            for (key, existed) in touched.into_iter().zip(existed) {
                if existed && !self.index.contains_key(key) {
                    self.expiry.disarm(key, &mut stale);
                }
            }
        }
        self.discard.record(&stale);
    }

    pub(crate) fn finish_replay(&mut self) {
        let mut stale = Vec::new();
        self.index.finish_replay(&mut stale);
        self.discard.record(&stale);
    }

    /// Liveness as compaction sees it at time `now`.
    ///
    /// Data of an expired key is dead. The `Expire` record that armed the
    /// deadline stays live so data in newer segments cannot resurface.
    pub(crate) fn is_live(&self, record: &Record, location: Location, now: u64) -> bool {
        if record.op.is_ttl() {
            self.expiry.is_live(record, location)
        } else {
            !self.expiry.is_expired(I::key_of(record), now) && self.index.is_live(record, location)
        }
    }

    pub(crate) fn relocate(&mut self, record: &Record, from: Location, to: Location) -> bool {
        if record.op.is_ttl() {
            self.expiry.relocate(&record.key, from, to)
        } else {
            self.index.relocate(record, from, to)
        }
    }

    /// Drops index entries of every key expired at `now`.
    ///
    /// Their records were not carried into the merge output, so the entries
    /// would otherwise dangle once the inputs are deleted. Deadlines stay.
    pub(crate) fn purge_expired(&mut self, now: u64) -> usize {
        let keys = self.expiry.expired_keys(now);
        let mut stale = Vec::new();
        for key in &keys {
            self.index.remove_key(key, &mut stale);
        }
        self.discard.record(&stale);
        keys.len()
    }

    pub(crate) fn remap_segment(&mut self, retired: &[SegmentId], from: SegmentId, to: SegmentId) {
        self.index.remap_segment(from, to);
        self.expiry.remap_segment(from, to);
        self.discard.retire_and_remap(retired, from, to);
    }

    /// Forgets the stats of segments deleted without a successor.
    pub(crate) fn retire(&mut self, inputs: &[SegmentId], merge: SegmentId) {
        self.discard.retire(inputs);
        self.discard.retire(&[merge]);
    }

    /// True if `key` has a deadline at or before `now`.
    pub fn is_expired(&self, key: &[u8], now: u64) -> bool {
        self.expiry.is_expired(key, now)
    }
}

/// Segments plus catalog, guarded together by the keyspace lock.
#[derive(Debug)]
pub struct KeyspaceState<I> {
    pub(crate) segments: SegmentManager,
    pub(crate) catalog: Catalog<I>,
}

impl<I: IndexAdapter> KeyspaceState<I> {
    /// The category index.
    pub fn index(&self) -> &I {
        self.catalog.index()
    }

    /// Appends `record` and applies it.
    ///
    /// # Errors
    ///
    /// `EmptyKey` or `RecordTooLarge` before any I/O, or the append error.
    pub fn log(&mut self, record: &Record) -> CoreResult<Slot> {
        record.validate()?;
        let slot = self.segments.append(record)?;
        self.catalog.apply(record, slot);
        Ok(slot)
    }

    /// Logs a clear of `key` if its deadline has passed.
    ///
    /// Called before writing to a key so content of an expired key never
    /// resurfaces under new writes.
    pub fn prepare_write(&mut self, key: &[u8]) -> CoreResult<()> {
        if self.catalog.is_expired(key, now_secs()) {
            debug!(category = %I::CATEGORY, "clearing expired key before write");
            self.log(&Record::new(Operation::clear(I::CATEGORY), key, "", ""))?;
        }
        Ok(())
    }

    /// True if `key` exists and has not expired.
    pub fn is_live_key(&self, key: &[u8]) -> bool {
        self.require_live(key).is_ok()
    }

    /// `KeyNotFound` for a missing key, `KeyExpired` for one whose
    /// deadline has passed.
    fn require_live(&self, key: &[u8]) -> CoreResult<()> {
        if !self.catalog.index.contains_key(key) {
            Err(CoreError::KeyNotFound)
        } else if self.catalog.is_expired(key, now_secs()) {
            Err(CoreError::KeyExpired)
        } else {
            Ok(())
        }
    }

    /// Reads the record at `location`.
    pub fn read_at(&self, location: Location) -> CoreResult<Record> {
        self.segments.read_at(location)
    }

    /// Arms a deadline on a live key.
    pub fn expire_at(&mut self, key: &[u8], deadline: u64) -> CoreResult<()> {
        self.require_live(key)?;
        let value = ExpiryTable::encode_deadline(deadline);
        self.log(&Record::new(Operation::expire(I::CATEGORY), key, value.to_vec(), ""))?;
        Ok(())
    }

    /// Seconds left before `key` expires, `None` if it never does.
    pub fn ttl(&self, key: &[u8]) -> CoreResult<Option<u64>> {
        self.require_live(key)?;
        let now = now_secs();
        Ok(self.catalog.expiry.deadline(key).map(|at| at.saturating_sub(now)))
    }

    /// The armed deadline of `key`, if any.
    pub fn deadline(&self, key: &[u8]) -> Option<u64> {
        self.catalog.expiry.deadline(key)
    }

    /// Drops the deadline of a live key. Returns false if none was armed.
    pub fn persist(&mut self, key: &[u8]) -> CoreResult<bool> {
        if !self.is_live_key(key) || self.catalog.expiry.deadline(key).is_none() {
            return Ok(false);
        }
        self.log(&Record::new(Operation::persist(I::CATEGORY), key, "", ""))?;
        Ok(true)
    }

    /// Dead archived bytes over archived bytes.
    pub fn discard_ratio(&self) -> CoreResult<f64> {
        let archived = self.segments.archived_size()?;
        if archived == 0 {
            return Ok(0.0);
        }
        let active = self.segments.active_id();
        let dead: u64 = self
            .segments
            .segment_ids()
            .into_iter()
            .filter(|id| *id != active)
            .map(|id| self.catalog.discard.dead_bytes(id))
            .sum();
        Ok(dead as f64 / archived as f64)
    }
}

/// One category: its state behind a reader-writer lock, plus the mutex that
/// keeps compactions of this category from overlapping.
#[derive(Debug)]
pub struct Keyspace<I> {
    state: RwLock<KeyspaceState<I>>,
    pub(crate) merge_lock: Mutex<()>,
}

impl<I: IndexAdapter> Keyspace<I> {
    /// Replays `segments` into `index` and wraps the result.
    pub fn open(segments: SegmentManager, index: I) -> CoreResult<Self> {
        let mut catalog = Catalog::new(index);
        let stats = recovery::replay(&segments, |record, slot| catalog.apply(record, slot))?;
        catalog.finish_replay();
        debug!(
            category = %I::CATEGORY,
            keys = catalog.index.key_count(),
            deadlines = catalog.expiry.len(),
            records = stats.records,
            "keyspace ready"
        );
        Ok(Self {
            state: RwLock::new(KeyspaceState { segments, catalog }),
            merge_lock: Mutex::new(()),
        })
    }

    /// Shared access for reads.
    pub fn read(&self) -> RwLockReadGuard<'_, KeyspaceState<I>> {
        self.state.read()
    }

    /// Exclusive access for writes.
    pub fn write(&self) -> RwLockWriteGuard<'_, KeyspaceState<I>> {
        self.state.write()
    }
}

/// Category-erased view of a keyspace, used by the database facade.
pub(crate) trait KeyspaceHandle: Send + Sync {
    fn category(&self) -> Category;
    fn log(&self, record: &Record) -> CoreResult<Location>;
    fn read_at(&self, location: Location) -> CoreResult<Record>;
    fn replay(&self, visit: &mut dyn FnMut(&Record, Location)) -> CoreResult<ReplayStats>;
    fn compact(&self) -> CoreResult<CompactionResult>;
    fn segment_count(&self) -> usize;
    fn disk_size(&self) -> CoreResult<u64>;
    fn discard_ratio(&self) -> CoreResult<f64>;
    fn expire_at(&self, key: &[u8], deadline: u64) -> CoreResult<()>;
    fn ttl(&self, key: &[u8]) -> CoreResult<Option<u64>>;
    fn persist(&self, key: &[u8]) -> CoreResult<bool>;
    fn sync(&self) -> CoreResult<()>;
}

impl<I: IndexAdapter> KeyspaceHandle for Keyspace<I> {
    fn category(&self) -> Category {
        I::CATEGORY
    }

    fn log(&self, record: &Record) -> CoreResult<Location> {
        record.validate()?;
        let mut state = self.write();
        if !record.op.is_ttl() && !record.op.clears_ttl() {
            state.prepare_write(I::key_of(record))?;
        }
        state.log(record).map(|slot| slot.location)
    }

    fn read_at(&self, location: Location) -> CoreResult<Record> {
        self.read().read_at(location)
    }

    fn replay(&self, visit: &mut dyn FnMut(&Record, Location)) -> CoreResult<ReplayStats> {
        let state = self.read();
        recovery::scan_locations(&state.segments, visit)
    }

    fn compact(&self) -> CoreResult<CompactionResult> {
        Compactor::new(self).run()
    }

    fn segment_count(&self) -> usize {
        self.read().segments.segment_count()
    }

    fn disk_size(&self) -> CoreResult<u64> {
        self.read().segments.total_size()
    }

    fn discard_ratio(&self) -> CoreResult<f64> {
        self.read().discard_ratio()
    }

    fn expire_at(&self, key: &[u8], deadline: u64) -> CoreResult<()> {
        self.write()
            .expire_at(key, deadline)
            .map_err(CoreError::hide_expiry)
    }

    fn ttl(&self, key: &[u8]) -> CoreResult<Option<u64>> {
        self.read().ttl(key).map_err(CoreError::hide_expiry)
    }

    fn persist(&self, key: &[u8]) -> CoreResult<bool> {
        self.write().persist(key)
    }

    fn sync(&self) -> CoreResult<()> {
        self.read().segments.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{HashIndex, StrIndex};
    use crate::operation::{HashOp, StrOp};

    fn strings() -> Keyspace<StrIndex> {
        Keyspace::open(SegmentManager::in_memory(Category::String, 1024), StrIndex::default())
            .unwrap()
    }

    fn set(key: &str, value: &str) -> Record {
        Record::new(Operation::Str(StrOp::Set), key, value, "")
    }

    #[test]
    fn empty_key_is_rejected_before_io() {
        let keyspace = strings();
        let err = keyspace.write().log(&set("", "v")).unwrap_err();
        assert!(matches!(err, CoreError::EmptyKey));
        assert_eq!(keyspace.disk_size().unwrap(), 0);
    }

    #[test]
    fn set_drops_deadline() {
        let keyspace = strings();
        let mut state = keyspace.write();
        state.log(&set("k", "v")).unwrap();
        state.expire_at(b"k", now_secs() + 100).unwrap();
        assert!(state.ttl(b"k").unwrap().is_some());

        state.log(&set("k", "w")).unwrap();
        assert_eq!(state.ttl(b"k").unwrap(), None);
    }

    #[test]
    fn expired_key_is_cleared_before_write() {
        let keyspace = Keyspace::open(
            SegmentManager::in_memory(Category::Hash, 1024),
            HashIndex::new(),
        )
        .unwrap();
        let hset = |field: &str| Record::new(Operation::Hash(HashOp::Set), "h", "v", field);

        keyspace.log(&hset("old")).unwrap();
        keyspace.expire_at(b"h", 1).unwrap();
        assert!(!keyspace.read().is_live_key(b"h"));

        keyspace.log(&hset("new")).unwrap();
        let state = keyspace.read();
        assert!(state.is_live_key(b"h"));
        assert_eq!(state.index().get(b"h", b"old"), None);
        assert_eq!(state.index().get(b"h", b"new"), Some(&b"v"[..]));
    }

    #[test]
    fn emptied_key_loses_its_deadline() {
        let keyspace = Keyspace::open(
            SegmentManager::in_memory(Category::Hash, 1024),
            HashIndex::new(),
        )
        .unwrap();
        let hset = |field: &str| Record::new(Operation::Hash(HashOp::Set), "h", "v", field);
        let hdel = |field: &str| Record::new(Operation::Hash(HashOp::Delete), "h", "", field);

        keyspace.log(&hset("f")).unwrap();
        keyspace.expire_at(b"h", now_secs() + 1000).unwrap();
        keyspace.log(&hdel("f")).unwrap();
        assert_eq!(keyspace.read().deadline(b"h"), None);

        keyspace.log(&hset("g")).unwrap();
        assert_eq!(KeyspaceHandle::ttl(&keyspace, b"h").unwrap(), None);
    }

    #[test]
    fn delete_of_an_absent_key_keeps_its_deadline() {
        let mut catalog = Catalog::new(HashIndex::new());
        let slot = |offset: u64| Slot::new(Location::new(SegmentId::main(0), offset), 10);
        let deadline = ExpiryTable::encode_deadline(now_secs() + 1000);

        // Replay of a compacted log: the deadline survived, the data did not.
        catalog.apply(
            &Record::new(Operation::expire(Category::Hash), "h", deadline.to_vec(), ""),
            slot(0),
        );
        catalog.apply(
            &Record::new(Operation::Hash(HashOp::Delete), "h", "", "f"),
            slot(10),
        );
        assert!(catalog.expiry.deadline(b"h").is_some());
    }

    #[test]
    fn expired_key_reads_as_missing_through_the_handle() {
        let keyspace = strings();
        keyspace.log(&set("k", "v")).unwrap();
        keyspace.expire_at(b"k", 1).unwrap();

        assert!(matches!(
            keyspace.read().ttl(b"k").unwrap_err(),
            CoreError::KeyExpired
        ));
        assert!(matches!(
            KeyspaceHandle::ttl(&keyspace, b"k").unwrap_err(),
            CoreError::KeyNotFound
        ));
    }

    #[test]
    fn persist_without_deadline_is_a_no_op() {
        let keyspace = strings();
        keyspace.log(&set("k", "v")).unwrap();
        let before = keyspace.disk_size().unwrap();
        assert!(!keyspace.persist(b"k").unwrap());
        assert!(!keyspace.persist(b"missing").unwrap());
        assert_eq!(keyspace.disk_size().unwrap(), before);
    }

    #[test]
    fn discard_ratio_counts_archived_bytes_only() {
        let keyspace = Keyspace::open(
            SegmentManager::in_memory(Category::String, 64),
            StrIndex::default(),
        )
        .unwrap();
        let record = set("k", "0123456789");
        for _ in 0..6 {
            keyspace.log(&record).unwrap();
        }
        assert!(keyspace.segment_count() > 1);
        let ratio = keyspace.discard_ratio().unwrap();
        assert!(ratio > 0.9, "every archived copy is superseded, got {ratio}");
    }
}
