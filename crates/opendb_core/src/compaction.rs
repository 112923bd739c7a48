//! Online compaction.
//!
//! Compaction copies the live records of a category's archived segments
//! into a fresh merge-area segment and then swaps it in for its inputs.
//! Foreground writers keep running the whole time: the scan holds no lock,
//! liveness checks take the shared lock briefly, and each relocation takes
//! the exclusive lock for a single index update.
//!
//! ## Invariants
//!
//! - Compaction never changes what a read returns
//! - A record whose entry moved during the scan is left behind as garbage;
//!   the concurrent write wins
//! - Every crash point leaves a directory that replays to the same state

use crate::error::{CoreError, CoreResult};
use crate::index::IndexAdapter;
use crate::keyspace::Keyspace;
use crate::segment::SegmentIterator;
use crate::types::{now_secs, Category, Location, SegmentId, Slot};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a compaction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// The compacted category.
    pub category: Category,
    /// Segments that were merged and deleted.
    pub input_segments: Vec<SegmentId>,
    /// Id the merged records now live under. `None` if nothing ran or
    /// nothing in the inputs was live.
    pub output_segment: Option<SegmentId>,
    /// Records read from the inputs.
    pub records_scanned: u64,
    /// Records carried into the output.
    pub records_kept: u64,
    /// Keys dropped because their deadline had passed.
    pub expired_keys: usize,
    /// Size of the inputs.
    pub bytes_before: u64,
    /// Size of the output.
    pub bytes_after: u64,
}

impl CompactionResult {
    fn skipped(category: Category) -> Self {
        Self {
            category,
            input_segments: Vec::new(),
            output_segment: None,
            records_scanned: 0,
            records_kept: 0,
            expired_keys: 0,
            bytes_before: 0,
            bytes_after: 0,
        }
    }

    /// True if compaction found nothing to merge.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.input_segments.is_empty()
    }

    /// Bytes freed by the run.
    #[must_use]
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Runs one compaction of a keyspace.
pub(crate) struct Compactor<'a, I> {
    keyspace: &'a Keyspace<I>,
    now: u64,
}

impl<'a, I: IndexAdapter> Compactor<'a, I> {
    pub(crate) fn new(keyspace: &'a Keyspace<I>) -> Self {
        Self {
            keyspace,
            now: now_secs(),
        }
    }

    /// Merges every archived segment of the category.
    ///
    /// # Errors
    ///
    /// `MergeInProgress` if another compaction of the category is running.
    /// On any other error the partial merge segment stays behind as an
    /// archived merge-area segment and is picked up by the next run.
    pub(crate) fn run(self) -> CoreResult<CompactionResult> {
        let category = I::CATEGORY;
        let Some(_merging) = self.keyspace.merge_lock.try_lock() else {
            return Err(CoreError::MergeInProgress { category });
        };

        let (inputs, merge) = {
            let mut state = self.keyspace.write();
            let inputs = state.segments.archived_snapshot();
            if !inputs.iter().any(|segment| !segment.id().is_merge()) {
                debug!(category = %category, "nothing to compact");
                return Ok(CompactionResult::skipped(category));
            }
            let merge = state.segments.begin_merge()?;
            (inputs, merge)
        };

        let mut result = CompactionResult::skipped(category);
        for segment in &inputs {
            result.input_segments.push(segment.id());
            result.bytes_before += segment.size()?;

            let mut iter = SegmentIterator::new(segment)?;
            while let Some(item) = iter.next() {
                let (offset, record) = match item {
                    Ok(item) => item,
                    Err(err) if err.is_scan_end() => {
                        warn!(
                            category = %category,
                            segment = %segment.id(),
                            offset = iter.position(),
                            error = %err,
                            "skipping unreadable tail during compaction"
                        );
                        break;
                    }
                    Err(err) => return Err(err),
                };
                result.records_scanned += 1;

                let from = Location::new(segment.id(), offset);
                if !self.keyspace.read().catalog.is_live(&record, from, self.now) {
                    continue;
                }

                let to = Location::new(merge.id(), merge.append(&record)?);
                let mut state = self.keyspace.write();
                if state.catalog.relocate(&record, from, to) {
                    result.records_kept += 1;
                } else {
                    state.catalog.discard.record(&[Slot::new(to, record.size())]);
                }
            }
        }

        let mut state = self.keyspace.write();
        result.expired_keys = state.catalog.purge_expired(self.now);
        if result.records_kept == 0 {
            state.segments.discard_merge(&result.input_segments, merge.id())?;
            state.catalog.retire(&result.input_segments, merge.id());
            drop(state);
            info!(
                category = %category,
                inputs = result.input_segments.len(),
                scanned = result.records_scanned,
                expired_keys = result.expired_keys,
                reclaimed = result.bytes_reclaimed(),
                "compaction finished with nothing live"
            );
            return Ok(result);
        }

        let target = state.segments.finish_merge(&result.input_segments, merge.id())?;
        state
            .catalog
            .remap_segment(&result.input_segments, merge.id(), target);
        result.bytes_after = merge.size()?;
        result.output_segment = Some(target);
        drop(state);

        info!(
            category = %category,
            inputs = result.input_segments.len(),
            output = %target,
            scanned = result.records_scanned,
            kept = result.records_kept,
            expired_keys = result.expired_keys,
            reclaimed = result.bytes_reclaimed(),
            "compaction finished"
        );
        Ok(result)
    }
}

/// Background thread that triggers compaction on an interval.
///
/// The tick runs with no worker lock held, so [`CompactionWorker::stop`]
/// waits at most for one tick to finish.
pub(crate) struct CompactionWorker {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl CompactionWorker {
    /// Spawns the worker. `tick` runs once per `interval` until stopped.
    pub(crate) fn spawn<F>(interval: Duration, mut tick: F) -> CoreResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let shared = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name("opendb-compaction".into())
            .spawn(move || {
                let (stopped, wake) = &*shared;
                let mut guard = stopped.lock();
                while !*guard {
                    let waited = wake.wait_for(&mut guard, interval);
                    if *guard {
                        break;
                    }
                    if waited.timed_out() {
                        MutexGuard::unlocked(&mut guard, &mut tick);
                    }
                }
                debug!("compaction worker stopped");
            })?;

        debug!(interval_ms = interval.as_millis() as u64, "compaction worker started");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it to exit.
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let (stopped, wake) = &*self.signal;
        *stopped.lock() = true;
        wake.notify_all();
        if handle.join().is_err() {
            warn!("compaction worker panicked");
        }
    }
}

impl Drop for CompactionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
