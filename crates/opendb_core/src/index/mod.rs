//! In-memory index adapters, one per category.
//!
//! Indexes are fully derivable from the log. Replay and the command layer
//! both feed them records through [`IndexAdapter::apply`], and compaction
//! consults them as the single source of truth for liveness.
//!
//! # Adapters
//!
//! - [`StrIndex`]: ordered key map, values cached or read back from disk
//! - [`ListIndex`]: sequence-addressed elements with head/tail counters
//! - [`HashIndex`]: key to ordered field map
//! - [`SetIndex`]: key to ordered member set
//! - [`ZSetIndex`]: key to members ordered by score
//! - [`ExpiryTable`]: key to deadline, shared shape across categories

mod expiry;
mod hash;
mod list;
mod set;
mod strs;
mod zset;

pub use expiry::ExpiryTable;
pub use hash::HashIndex;
pub use list::{element_key, split_element_key, ListIndex, ListMeta, INITIAL_HEAD};
pub use set::SetIndex;
pub use strs::{StrIndex, StrValue};
pub use zset::{Score, ZSetIndex};

use crate::segment::Record;
use crate::types::{Category, Location, SegmentId, Slot};

/// The contract between the log and a category's in-memory state.
///
/// Implementations never perform I/O. Every mutation reports the slots it
/// made obsolete so dead bytes can be tracked per segment.
pub trait IndexAdapter: Send + Sync + 'static {
    /// The category whose records this adapter accepts.
    const CATEGORY: Category;

    /// Applies one data record.
    ///
    /// `slot` is where the record lives. Every slot the mutation makes
    /// obsolete is pushed onto `stale`, including `slot` itself for records
    /// that never stay live (deletes, pops, clears). Malformed payloads are
    /// treated as dead records.
    fn apply(&mut self, record: &Record, slot: Slot, stale: &mut Vec<Slot>);

    /// True when the index still points at `record` stored at `location`.
    fn is_live(&self, record: &Record, location: Location) -> bool;

    /// Moves the entry backed by `record` from `from` to `to`.
    ///
    /// Returns false, changing nothing, if the entry no longer points at
    /// `from`.
    fn relocate(&mut self, record: &Record, from: Location, to: Location) -> bool;

    /// Rewrites every location in segment `from` to the same offset in `to`.
    fn remap_segment(&mut self, from: SegmentId, to: SegmentId);

    /// The user key whose entry `record` may back.
    fn key_of(record: &Record) -> &[u8];

    /// True if `key` has any entry.
    fn contains_key(&self, key: &[u8]) -> bool;

    /// Drops every entry of `key`, reporting their slots.
    fn remove_key(&mut self, key: &[u8], stale: &mut Vec<Slot>);

    /// Number of keys.
    fn key_count(&self) -> usize;

    /// Called once after the last replayed record, before any command runs.
    ///
    /// Releases entries a crash left unreachable, reporting their slots.
    fn finish_replay(&mut self, _stale: &mut Vec<Slot>) {}
}

/// Rewrites `slot` if it lives in segment `from`.
pub(crate) fn remap_slot(slot: &mut Slot, from: SegmentId, to: SegmentId) {
    if slot.location.segment_id == from {
        slot.location.segment_id = to;
    }
}

/// Moves `slot` to `to` if it currently sits at `from`.
pub(crate) fn relocate_slot(slot: &mut Slot, from: Location, to: Location) -> bool {
    if slot.location == from {
        slot.location = to;
        true
    } else {
        false
    }
}
