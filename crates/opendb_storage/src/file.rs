//! File-based storage backend for segment files.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The open file and the offset the next append writes at.
///
/// Both live under one lock so an append and a concurrent read never
/// disagree about where the written region ends.
#[derive(Debug)]
struct Tail {
    file: File,
    len: u64,
}

/// A segment file on disk.
///
/// Appends land at the tracked tail in a single `write_all`. When that
/// write fails the file is cut back to the old tail, so readers never see
/// part of a buffer.
///
/// # Durability
///
/// - `flush()` hands buffered bytes to the OS
/// - `sync()` calls `File::sync_all()`
///
/// # Example
///
/// ```no_run
/// use opendb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("000000000.data.str")).unwrap();
/// let offset = backend.append(b"persistent data").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    tail: Mutex<Tail>,
}

impl FileBackend {
    /// Opens `path`, creating an empty file if it does not exist. Existing
    /// bytes are kept and appends continue after them.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            tail: Mutex::new(Tail { file, len }),
        })
    }

    /// Like [`FileBackend::open`], creating missing parent directories
    /// first. Merge segments live in a subdirectory that may not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// The path this backend was opened at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut tail = self.tail.lock();
        StorageError::check_read(offset, len, tail.len)?;

        let mut buffer = vec![0u8; len];
        if len > 0 {
            tail.file.seek(SeekFrom::Start(offset))?;
            tail.file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let tail = self.tail.get_mut();
        let offset = tail.len;
        if data.is_empty() {
            return Ok(offset);
        }

        let written = tail
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| tail.file.write_all(data));
        if let Err(err) = written {
            // Best effort: the tracked tail is unchanged either way, and the
            // next append overwrites anything left past it.
            let _ = tail.file.set_len(offset);
            return Err(err.into());
        }

        tail.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.tail.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.tail.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.tail.get_mut().file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let tail = self.tail.get_mut();
        StorageError::check_truncate(new_size, tail.len)?;

        tail.file.set_len(new_size)?;
        tail.file.sync_all()?;
        tail.len = new_size;
        Ok(())
    }
}
