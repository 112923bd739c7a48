//! Startup replay.
//!
//! Rebuilds volatile state by reading every record of a category in
//! segment-id order and, within a segment, in offset order. The order comes
//! from [`SegmentManager::replay_order`], which is sorted by construction.
//!
//! Recovery never rewrites the log. The one exception is the active
//! segment: an incomplete record at its end is cut off so later appends are
//! reachable by the next scan.

use crate::error::CoreResult;
use crate::segment::{Record, SegmentIterator, SegmentManager};
use crate::types::{Category, Location, Slot};
use tracing::{info, warn};

/// Counters from one replay of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// The replayed category.
    pub category: Category,
    /// Segments visited.
    pub segments: usize,
    /// Records applied.
    pub records: u64,
    /// Segments whose scan stopped at an unreadable record.
    pub torn_segments: usize,
    /// Bytes cut from the end of the active segment.
    pub truncated_bytes: u64,
}

impl ReplayStats {
    fn new(category: Category) -> Self {
        Self {
            category,
            segments: 0,
            records: 0,
            torn_segments: 0,
            truncated_bytes: 0,
        }
    }
}

/// Replays every record of the manager's category into `apply`, repairing
/// a torn tail on the active segment.
pub fn replay<F>(segments: &SegmentManager, apply: F) -> CoreResult<ReplayStats>
where
    F: FnMut(&Record, Slot),
{
    let stats = scan(segments, true, apply)?;
    info!(
        category = %stats.category,
        segments = stats.segments,
        records = stats.records,
        torn = stats.torn_segments,
        truncated_bytes = stats.truncated_bytes,
        "replayed category"
    );
    Ok(stats)
}

/// Visits every record in replay order without modifying any segment.
pub fn scan_locations<F>(segments: &SegmentManager, mut visit: F) -> CoreResult<ReplayStats>
where
    F: FnMut(&Record, Location),
{
    scan(segments, false, |record, slot| visit(record, slot.location))
}

fn scan<F>(segments: &SegmentManager, repair: bool, mut apply: F) -> CoreResult<ReplayStats>
where
    F: FnMut(&Record, Slot),
{
    let category = segments.category();
    let active_id = segments.active_id();
    let mut stats = ReplayStats::new(category);

    for segment in segments.replay_order() {
        stats.segments += 1;
        let mut iter = SegmentIterator::new(&segment)?;

        while let Some(item) = iter.next() {
            match item {
                Ok((offset, record)) => {
                    let slot = Slot::new(Location::new(segment.id(), offset), record.size());
                    apply(&record, slot);
                    stats.records += 1;
                }
                Err(err) if err.is_scan_end() => {
                    stats.torn_segments += 1;
                    let valid = iter.position();
                    warn!(
                        category = %category,
                        segment = %segment.id(),
                        offset = valid,
                        error = %err,
                        "stopping segment scan at unreadable record"
                    );

                    if repair && segment.id() == active_id {
                        let size = segment.size()?;
                        segment.truncate(valid)?;
                        stats.truncated_bytes += size - valid;
                        warn!(
                            category = %category,
                            segment = %segment.id(),
                            dropped = size - valid,
                            "truncated torn tail of active segment"
                        );
                    }
                    break;
                }
                Err(err) => return Err(err),
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{HashOp, Operation};
    use crate::segment::SegmentFile;
    use crate::types::SegmentId;
    use opendb_storage::InMemoryBackend;

    fn hset(field: &str, value: &str) -> Record {
        Record::new(Operation::Hash(HashOp::Set), "h", value, field)
    }

    #[test]
    fn replays_across_rotation_in_order() {
        let mut manager = SegmentManager::in_memory(Category::Hash, 64);
        let written: Vec<Record> = (0..6)
            .map(|i| hset(&format!("f{i}"), &"x".repeat(i * 5)))
            .collect();
        for record in &written {
            manager.append(record).unwrap();
        }
        assert!(manager.segment_count() > 1);

        let mut seen = Vec::new();
        let mut last: Option<Location> = None;
        let stats = replay(&manager, |record, slot| {
            if let Some(prev) = last {
                assert!(
                    (prev.segment_id, prev.offset) < (slot.location.segment_id, slot.location.offset)
                );
            }
            last = Some(slot.location);
            seen.push(record.clone());
        })
        .unwrap();

        assert_eq!(seen, written);
        assert_eq!(stats.records, 6);
        assert_eq!(stats.segments, manager.segment_count());
        assert_eq!(stats.torn_segments, 0);
    }

    #[test]
    fn torn_active_tail_is_truncated() {
        let good = hset("a", "1");
        let mut bytes = good.encode();
        let torn = hset("b", "2").encode();
        bytes.extend_from_slice(&torn[..torn.len() / 2]);

        let segment = SegmentFile::with_backend(
            SegmentId::main(0),
            Category::Hash,
            Box::new(InMemoryBackend::with_data(bytes)),
        );
        let manager = SegmentManager::in_memory(Category::Hash, 1024).with_active(segment);

        let mut count = 0;
        let stats = replay(&manager, |_, _| count += 1).unwrap();

        assert_eq!(count, 1);
        assert_eq!(stats.torn_segments, 1);
        assert_eq!(stats.truncated_bytes, (torn.len() / 2) as u64);
        assert_eq!(manager.total_size().unwrap(), good.size());
    }

    #[test]
    fn scan_locations_leaves_torn_tail() {
        let mut bytes = hset("a", "1").encode();
        bytes.extend_from_slice(&[0, 0, 0]);
        let total = bytes.len() as u64;

        let segment = SegmentFile::with_backend(
            SegmentId::main(0),
            Category::Hash,
            Box::new(InMemoryBackend::with_data(bytes)),
        );
        let manager = SegmentManager::in_memory(Category::Hash, 1024).with_active(segment);

        let stats = scan_locations(&manager, |_, _| {}).unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(manager.total_size().unwrap(), total);
    }
}
