//! A single append-only segment file.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::{Record, RecordHeader, HEADER_SIZE};
use crate::types::{Category, SegmentId};
use opendb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One segment of a category's family.
///
/// The backend sits behind a lock so archived segments can be scanned
/// through a shared `Arc` while the owning manager keeps writing
/// elsewhere.
pub struct SegmentFile {
    id: SegmentId,
    category: Category,
    path: Option<PathBuf>,
    backend: Arc<RwLock<Box<dyn StorageBackend>>>,
}

impl SegmentFile {
    /// Opens or creates the segment file at `path`.
    pub fn open(path: &Path, id: SegmentId, category: Category) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Ok(Self {
            id,
            category,
            path: Some(path.to_path_buf()),
            backend: Arc::new(RwLock::new(Box::new(backend))),
        })
    }

    /// Creates a segment over an arbitrary backend with no file behind it.
    #[must_use]
    pub fn with_backend(id: SegmentId, category: Category, backend: Box<dyn StorageBackend>) -> Self {
        Self {
            id,
            category,
            path: None,
            backend: Arc::new(RwLock::new(backend)),
        }
    }

    /// Creates an empty in-memory segment.
    #[must_use]
    pub fn in_memory(id: SegmentId, category: Category) -> Self {
        Self::with_backend(id, category, Box::new(InMemoryBackend::new()))
    }

    /// Returns a handle to the same bytes under another id.
    ///
    /// Used to promote in-memory compaction output, which has no file to
    /// rename.
    #[must_use]
    pub fn rebind(&self, id: SegmentId) -> Self {
        Self {
            id,
            category: self.category,
            path: None,
            backend: Arc::clone(&self.backend),
        }
    }

    /// Returns the segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Returns the category of the records in this segment.
    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// Returns the file path, or `None` for in-memory segments.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends an encoded record at the tail and returns its offset.
    ///
    /// The whole encoding goes to the backend in a single call, so a failed
    /// append never leaves part of a record behind.
    pub fn append(&self, record: &Record) -> CoreResult<u64> {
        let encoded = record.encode();
        let offset = self.backend.write().append(&encoded)?;
        Ok(offset)
    }

    /// Reads the record whose header starts at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `ReadOutOfRange` if the record does not lie entirely within
    /// the written length, and `CorruptHeader` if the header is invalid or
    /// belongs to another category.
    pub fn read_record(&self, offset: u64) -> CoreResult<Record> {
        let backend = self.backend.read();
        let size = backend.size()?;
        let out_of_range = || CoreError::ReadOutOfRange {
            segment: self.id,
            offset,
            size,
        };

        if offset.saturating_add(HEADER_SIZE as u64) > size {
            return Err(out_of_range());
        }
        let header = RecordHeader::decode(&backend.read_at(offset, HEADER_SIZE)?)?;
        self.check_category(&header)?;

        if offset.saturating_add(header.record_size()) > size {
            return Err(out_of_range());
        }
        let body = backend.read_at(offset + HEADER_SIZE as u64, header.body_len() as usize)?;
        header.decode_body(&body)
    }

    /// Reads raw bytes. Callers check bounds against [`SegmentFile::size`].
    pub(crate) fn read_raw(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        Ok(self.backend.read().read_at(offset, len)?)
    }

    pub(crate) fn check_category(&self, header: &RecordHeader) -> CoreResult<()> {
        let found = header.op.category();
        if found == self.category {
            Ok(())
        } else {
            Err(CoreError::corrupt_header(format!(
                "{found} record in {} segment {}",
                self.category, self.id
            )))
        }
    }

    /// Returns the written length, which is where the next append lands.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.read().size()?)
    }

    /// Syncs the segment to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        let mut backend = self.backend.write();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }

    /// Cuts the segment down to `len` bytes.
    pub fn truncate(&self, len: u64) -> CoreResult<()> {
        self.backend.write().truncate(len)?;
        Ok(())
    }
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
