//! Database directory management.
//!
//! This module handles the file system layout for OpenDB:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK                    # Advisory lock for single-process access
//! ├─ 000000000.data.str      # String segments
//! ├─ 000000000.data.list     # List segments
//! ├─ 000000000.data.hash     # Hash segments
//! ├─ 000000000.data.set      # Set segments
//! ├─ 000000000.data.zset     # Sorted-set segments
//! └─ MERGE/                  # Compaction output awaiting promotion
//!    └─ 000000000.data.<suffix>
//! ```
//!
//! The LOCK file ensures only one process can open the database at a time.

use crate::error::{CoreError, CoreResult};
use crate::types::{Area, Category, SegmentId};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File names within the database directory.
const LOCK_FILE: &str = "LOCK";
/// Directory for compaction output.
const MERGE_DIR: &str = "MERGE";
/// Separator between the numeric id and the category suffix.
const DATA_INFIX: &str = ".data.";

/// Formats the file name of a segment, without its directory.
#[must_use]
pub fn segment_file_name(category: Category, id: u32) -> String {
    format!("{id:09}{DATA_INFIX}{}", category.suffix())
}

/// Parses a segment file name into its id and category.
///
/// Returns `None` for anything that is not exactly
/// `<digits>.data.<suffix>`.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<(u32, Category)> {
    let (id, suffix) = name.split_once(DATA_INFIX)?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id = id.parse().ok()?;
    let category = Category::from_suffix(suffix)?;
    Some((id, category))
}

/// Manages the database directory structure and file locking.
///
/// # Thread Safety
///
/// The `DatabaseDir` holds an exclusive lock on the database directory.
/// Only one `DatabaseDir` instance can exist per directory at a time.
/// Segment managers share it behind an `Arc`.
#[derive(Debug)]
pub struct DatabaseDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        // Non-blocking: a second opener fails immediately.
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock_file,
        })
    }

    /// Releases the directory lock ahead of drop.
    ///
    /// Another handle may open the directory afterwards, so nothing may
    /// write through this one once it returns.
    pub fn unlock(&self) -> CoreResult<()> {
        FileExt::unlock(&self.lock_file)?;
        Ok(())
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the merge working area.
    #[must_use]
    pub fn merge_dir(&self) -> PathBuf {
        self.path.join(MERGE_DIR)
    }

    /// Returns the path of a segment file.
    #[must_use]
    pub fn segment_path(&self, category: Category, id: SegmentId) -> PathBuf {
        let name = segment_file_name(category, id.id());
        match id.area() {
            Area::Main => self.path.join(name),
            Area::Merge => self.merge_dir().join(name),
        }
    }

    /// Lists the segments of `category` in replay order: merge area
    /// first, then main ids ascending.
    ///
    /// Files that look like segments but do not parse are logged and
    /// skipped.
    pub fn list_segments(&self, category: Category) -> CoreResult<Vec<SegmentId>> {
        let mut ids = Vec::new();
        Self::collect_ids(&self.path, category, SegmentId::main, &mut ids)?;

        let merge_dir = self.merge_dir();
        if merge_dir.is_dir() {
            Self::collect_ids(&merge_dir, category, SegmentId::merge, &mut ids)?;
        }

        ids.sort_unstable();
        Ok(ids)
    }

    fn collect_ids(
        dir: &Path,
        category: Category,
        make_id: fn(u32) -> SegmentId,
        ids: &mut Vec<SegmentId>,
    ) -> CoreResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match parse_segment_file_name(name) {
                Some((id, found)) if found == category => ids.push(make_id(id)),
                Some(_) => {}
                None if name.contains(DATA_INFIX) => {
                    warn!(file = %entry.path().display(), "ignoring unparseable segment file");
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Deletes a segment file and syncs its directory.
    pub fn remove_segment(&self, category: Category, id: SegmentId) -> CoreResult<()> {
        let path = self.segment_path(category, id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        self.sync_area(id.area())
    }

    /// Moves a merge-area segment into the main area under `target`.
    ///
    /// Any file already holding `target` is replaced. Both directories are
    /// synced so the rename survives a crash.
    pub fn promote_segment(
        &self,
        category: Category,
        from: SegmentId,
        target: SegmentId,
    ) -> CoreResult<PathBuf> {
        let source = self.segment_path(category, from);
        let dest = self.segment_path(category, target);
        fs::rename(&source, &dest)?;
        self.sync_area(Area::Merge)?;
        self.sync_area(Area::Main)?;
        Ok(dest)
    }

    /// Syncs the directory of an area so entry changes are durable.
    ///
    /// Directory fsync is a Unix concept. NTFS journals metadata, so on
    /// other platforms this is a no-op.
    #[cfg(unix)]
    pub fn sync_area(&self, area: Area) -> CoreResult<()> {
        let dir = match area {
            Area::Main => self.path.clone(),
            Area::Merge => self.merge_dir(),
        };
        if dir.exists() {
            File::open(&dir)?.sync_all()?;
        }
        Ok(())
    }

    /// Syncs the directory of an area so entry changes are durable.
    #[cfg(not(unix))]
    pub fn sync_area(&self, _area: Area) -> CoreResult<()> {
        Ok(())
    }
}
