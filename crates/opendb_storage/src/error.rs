//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the written length.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Attempted to truncate to a length larger than the current size.
    #[error("cannot truncate to {requested} bytes, storage holds {size}")]
    TruncateBeyondEnd {
        /// The requested length.
        requested: u64,
        /// The current storage size.
        size: u64,
    },
}

impl StorageError {
    /// Fails unless `[offset, offset + len)` lies within `size` bytes.
    pub(crate) fn check_read(offset: u64, len: usize, size: u64) -> StorageResult<u64> {
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(Self::ReadPastEnd { offset, len, size });
        }
        Ok(end)
    }

    /// Fails unless `requested` is at most `size`.
    pub(crate) fn check_truncate(requested: u64, size: u64) -> StorageResult<()> {
        if requested > size {
            return Err(Self::TruncateBeyondEnd { requested, size });
        }
        Ok(())
    }
}
