//! Per-category segment management.

use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::segment::file::SegmentFile;
use crate::segment::record::Record;
use crate::types::{Area, Category, Location, SegmentId, Slot};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the segment family of one category.
///
/// Exactly one segment is active and receives appends. Every other
/// segment is archived and never written again. Archived segments
/// include compaction output still waiting in the merge area.
pub struct SegmentManager {
    category: Category,
    /// Database directory. `None` keeps every segment in memory.
    dir: Option<Arc<DatabaseDir>>,
    /// Rotation threshold in bytes.
    threshold: u64,
    sync_on_write: bool,
    active: Arc<SegmentFile>,
    archived: BTreeMap<SegmentId, Arc<SegmentFile>>,
}

impl SegmentManager {
    /// Opens every segment of `category` found in `dir`.
    ///
    /// The highest main-area id becomes active. A fresh segment 0 is
    /// created when the family is empty.
    pub fn open(
        dir: Arc<DatabaseDir>,
        category: Category,
        threshold: u64,
        sync_on_write: bool,
    ) -> CoreResult<Self> {
        let mut ids = dir.list_segments(category)?;

        let active_id = match ids.iter().rposition(|id| id.area() == Area::Main) {
            Some(pos) => ids.remove(pos),
            None => SegmentId::main(0),
        };

        let mut archived = BTreeMap::new();
        for id in ids {
            let segment = SegmentFile::open(&dir.segment_path(category, id), id, category)?;
            archived.insert(id, Arc::new(segment));
        }

        let active = SegmentFile::open(&dir.segment_path(category, active_id), active_id, category)?;
        dir.sync_area(Area::Main)?;

        debug!(
            category = %category,
            active = %active_id,
            archived = archived.len(),
            "opened segment family"
        );

        Ok(Self {
            category,
            dir: Some(dir),
            threshold,
            sync_on_write,
            active: Arc::new(active),
            archived,
        })
    }

    /// Creates a manager whose segments live in memory.
    #[must_use]
    pub fn in_memory(category: Category, threshold: u64) -> Self {
        Self {
            category,
            dir: None,
            threshold,
            sync_on_write: false,
            active: Arc::new(SegmentFile::in_memory(SegmentId::main(0), category)),
            archived: BTreeMap::new(),
        }
    }

    /// Replaces the active segment. Lets tests replay hand-built bytes.
    #[cfg(test)]
    pub(crate) fn with_active(mut self, segment: SegmentFile) -> Self {
        self.active = Arc::new(segment);
        self
    }

    /// Returns the category this manager serves.
    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// Returns the id of the active segment.
    #[must_use]
    pub fn active_id(&self) -> SegmentId {
        self.active.id()
    }

    /// Appends a record to the active segment, rotating first if needed.
    ///
    /// Rotation happens when the active segment already holds data and the
    /// record would push it past the threshold, so a record larger than the
    /// threshold still lands whole in an empty segment.
    pub fn append(&mut self, record: &Record) -> CoreResult<Slot> {
        let size = record.size();
        let tail = self.active.size()?;
        if tail > 0 && tail.saturating_add(size) > self.threshold {
            self.rotate()?;
        }

        let offset = self.active.append(record)?;
        if self.sync_on_write {
            self.active.sync()?;
        }

        Ok(Slot::new(Location::new(self.active.id(), offset), size))
    }

    fn rotate(&mut self) -> CoreResult<()> {
        let previous = self.active.id();
        let next_id = previous.id().checked_add(1).ok_or_else(|| {
            CoreError::invalid_operation(format!("segment ids exhausted for {}", self.category))
        })?;
        let next = SegmentId::main(next_id);

        self.active.sync()?;
        let segment = Arc::new(self.create_segment(next)?);
        let old = std::mem::replace(&mut self.active, segment);
        self.archived.insert(previous, old);

        info!(category = %self.category, archived = %previous, active = %next, "rotated segment");
        Ok(())
    }

    fn create_segment(&self, id: SegmentId) -> CoreResult<SegmentFile> {
        match &self.dir {
            Some(dir) => {
                let segment = SegmentFile::open(&dir.segment_path(self.category, id), id, self.category)?;
                dir.sync_area(id.area())?;
                Ok(segment)
            }
            None => Ok(SegmentFile::in_memory(id, self.category)),
        }
    }

    /// Looks up a segment, active or archived.
    #[must_use]
    pub fn segment(&self, id: SegmentId) -> Option<&Arc<SegmentFile>> {
        if self.active.id() == id {
            Some(&self.active)
        } else {
            self.archived.get(&id)
        }
    }

    /// Reads the record at `location`.
    ///
    /// # Errors
    ///
    /// Returns `SegmentNotFound` for an unknown segment id and
    /// `ReadOutOfRange` when the record lies beyond the written length.
    pub fn read_at(&self, location: Location) -> CoreResult<Record> {
        let segment = self
            .segment(location.segment_id)
            .ok_or(CoreError::SegmentNotFound {
                category: self.category,
                segment: location.segment_id,
            })?;
        segment.read_record(location.offset)
    }

    /// Every segment in replay order: archived ascending, then active.
    #[must_use]
    pub fn replay_order(&self) -> Vec<Arc<SegmentFile>> {
        self.archived
            .values()
            .chain(std::iter::once(&self.active))
            .cloned()
            .collect()
    }

    /// Shared handles of the archived segments, in replay order.
    #[must_use]
    pub fn archived_snapshot(&self) -> Vec<Arc<SegmentFile>> {
        self.archived.values().cloned().collect()
    }

    /// Creates a fresh merge-area segment and registers it as archived so
    /// locations pointing into it resolve while compaction runs.
    pub fn begin_merge(&mut self) -> CoreResult<Arc<SegmentFile>> {
        let next = self
            .archived
            .keys()
            .filter(|id| id.is_merge())
            .map(|id| id.id() + 1)
            .max()
            .unwrap_or(0);
        let id = SegmentId::merge(next);

        let segment = Arc::new(self.create_segment(id)?);
        self.archived.insert(id, Arc::clone(&segment));
        debug!(category = %self.category, segment = %id, "started merge segment");
        Ok(segment)
    }

    /// Retires `inputs` and promotes the merge segment in their place.
    ///
    /// Steps, each leaving a directory that replays to the same state:
    /// 1. sync the merge segment
    /// 2. delete inputs in replay order (merge leftovers, then main ids
    ///    ascending)
    /// 3. rename the merge segment over the newest main input id
    /// 4. reopen it under that id
    ///
    /// Returns the id the merged records now live under.
    pub fn finish_merge(&mut self, inputs: &[SegmentId], merge: SegmentId) -> CoreResult<SegmentId> {
        let target = inputs
            .iter()
            .copied()
            .filter(|id| !id.is_merge())
            .max()
            .ok_or_else(|| CoreError::invalid_operation("merge has no main-area input"))?;
        let merged = self
            .archived
            .get(&merge)
            .cloned()
            .ok_or(CoreError::SegmentNotFound {
                category: self.category,
                segment: merge,
            })?;

        merged.sync()?;

        let mut retired = inputs.to_vec();
        retired.sort_unstable();
        for id in retired {
            if let Some(dir) = &self.dir {
                dir.remove_segment(self.category, id)?;
            }
            self.archived.remove(&id);
        }

        let promoted = match &self.dir {
            Some(dir) => {
                let path = dir.promote_segment(self.category, merge, target)?;
                SegmentFile::open(&path, target, self.category)?
            }
            None => merged.rebind(target),
        };
        self.archived.remove(&merge);
        self.archived.insert(target, Arc::new(promoted));

        info!(
            category = %self.category,
            merged = %merge,
            target = %target,
            retired = inputs.len(),
            "promoted merge segment"
        );
        Ok(target)
    }

    /// Retires `inputs` together with a merge segment that holds nothing
    /// live. No segment takes their place.
    ///
    /// Inputs go in replay order so a crash partway never uncovers an old
    /// record that a deleted newer one had superseded. The merge segment
    /// goes last; left behind it replays as nothing.
    pub fn discard_merge(&mut self, inputs: &[SegmentId], merge: SegmentId) -> CoreResult<()> {
        let mut retired = inputs.to_vec();
        retired.sort_unstable();
        retired.push(merge);
        for id in &retired {
            if let Some(dir) = &self.dir {
                dir.remove_segment(self.category, *id)?;
            }
            self.archived.remove(id);
        }

        info!(
            category = %self.category,
            merged = %merge,
            retired = inputs.len(),
            "dropped empty merge segment"
        );
        Ok(())
    }

    /// Bytes across every segment.
    pub fn total_size(&self) -> CoreResult<u64> {
        let mut total = self.active.size()?;
        for segment in self.archived.values() {
            total += segment.size()?;
        }
        Ok(total)
    }

    /// Bytes across archived segments only.
    pub fn archived_size(&self) -> CoreResult<u64> {
        let mut total = 0;
        for segment in self.archived.values() {
            total += segment.size()?;
        }
        Ok(total)
    }

    /// Number of segments, active included.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.archived.len() + 1
    }

    /// Ids of every segment in replay order.
    #[must_use]
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.archived
            .keys()
            .copied()
            .chain(std::iter::once(self.active.id()))
            .collect()
    }

    /// Syncs the active segment.
    pub fn sync(&self) -> CoreResult<()> {
        self.active.sync()
    }
}

impl std::fmt::Debug for SegmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentManager")
            .field("category", &self.category)
            .field("threshold", &self.threshold)
            .field("active", &self.active.id())
            .field("archived", &self.archived.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
