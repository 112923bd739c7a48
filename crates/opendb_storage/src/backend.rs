//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level append-only byte store.
///
/// One backend holds the bytes of exactly one segment file. OpenDB encodes
/// records itself and hands the backend complete buffers.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `append` is all-or-nothing: a failed append leaves `size` unchanged
/// - `read_at` returns exactly the bytes previously written at that offset
/// - Bytes below `size` are never modified, only cut off by `truncate`
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// if the range extends beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` at the current end and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs. In that case nothing of
    /// `data` is visible afterwards.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes, which is where the next
    /// `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the storage down to `new_size` bytes.
    ///
    /// Used only to drop an incomplete trailing record found during
    /// recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
