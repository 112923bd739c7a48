//! Error types for OpenDB core.

use crate::types::{Category, SegmentId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in OpenDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] opendb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A key argument was empty.
    #[error("key must not be empty")]
    EmptyKey,

    /// A record header could not be decoded.
    #[error("corrupt record header: {message}")]
    CorruptHeader {
        /// Description of the problem.
        message: String,
    },

    /// Fewer bytes were available than a record header declared.
    #[error("truncated record: header declares {expected} bytes, {available} available")]
    TruncatedRecord {
        /// Bytes the header declared.
        expected: u64,
        /// Bytes actually available.
        available: u64,
    },

    /// A location names a segment that does not exist.
    #[error("segment {segment} not found in category {category}")]
    SegmentNotFound {
        /// Category that was searched.
        category: Category,
        /// The missing segment.
        segment: SegmentId,
    },

    /// A location lies beyond the written length of its segment.
    #[error("read out of range: offset {offset} in segment {segment} of {size} bytes")]
    ReadOutOfRange {
        /// The segment that was read.
        segment: SegmentId,
        /// The requested offset.
        offset: u64,
        /// Written length of the segment.
        size: u64,
    },

    /// The key does not exist.
    #[error("key not found")]
    KeyNotFound,

    /// The key exists on disk but its deadline has passed.
    #[error("key expired")]
    KeyExpired,

    /// A command was given the wrong number of arguments.
    #[error("wrong number of arguments for {command}")]
    WrongNumberOfArgs {
        /// The command name.
        command: &'static str,
    },

    /// A stored value cannot be used the way the command needs.
    #[error("wrong value type: {message}")]
    WrongValueType {
        /// Description of the mismatch.
        message: String,
    },

    /// An integer command would overflow.
    #[error("increment or decrement would overflow")]
    IntegerOverflow,

    /// A time-to-live was zero or otherwise unusable.
    #[error("invalid time-to-live")]
    InvalidTtl,

    /// A list push would move a sequence counter past its bounds.
    #[error("list sequence counter overflow")]
    ListSequenceOverflow,

    /// A list index is outside the list.
    #[error("index {index} out of range")]
    IndexOutOfRange {
        /// The requested index.
        index: i64,
    },

    /// A compaction of the category is already running.
    #[error("compaction already in progress for category {category}")]
    MergeInProgress {
        /// The busy category.
        category: Category,
    },

    /// A record field is too large to encode.
    #[error("record too large: {field} is {len} bytes")]
    RecordTooLarge {
        /// Which field overflowed.
        field: &'static str,
        /// Its length in bytes.
        len: usize,
    },

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Invalid database layout or record payload.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a corrupt header error.
    pub fn corrupt_header(message: impl Into<String>) -> Self {
        Self::CorruptHeader {
            message: message.into(),
        }
    }

    /// Creates a wrong value type error.
    pub fn wrong_value_type(message: impl Into<String>) -> Self {
        Self::WrongValueType {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Reports an expired key the way callers see it: as missing.
    #[must_use]
    pub fn hide_expiry(self) -> Self {
        match self {
            Self::KeyExpired => Self::KeyNotFound,
            other => other,
        }
    }

    /// True for decode failures that mark the end of valid data in a
    /// segment scan.
    #[must_use]
    pub fn is_scan_end(&self) -> bool {
        matches!(
            self,
            Self::CorruptHeader { .. } | Self::TruncatedRecord { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_end_classification() {
        assert!(CoreError::corrupt_header("short").is_scan_end());
        assert!(CoreError::TruncatedRecord {
            expected: 40,
            available: 12
        }
        .is_scan_end());
        assert!(!CoreError::EmptyKey.is_scan_end());
        assert!(!CoreError::from(io::Error::other("disk")).is_scan_end());
    }

    #[test]
    fn messages_name_the_segment() {
        let err = CoreError::SegmentNotFound {
            category: Category::Hash,
            segment: SegmentId::main(4),
        };
        assert_eq!(
            err.to_string(),
            "segment 000000004 not found in category hash"
        );
    }
}
