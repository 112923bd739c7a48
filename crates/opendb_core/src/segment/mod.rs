//! Segment files and their per-category manager.
//!
//! A segment is an append-only file holding encoded records of a single
//! category. Bytes are never rewritten in place; compaction replaces whole
//! segments.

mod file;
mod iterator;
mod record;
mod store;

pub use file::SegmentFile;
pub use iterator::SegmentIterator;
pub use record::{Record, RecordHeader, HEADER_SIZE};
pub use store::SegmentManager;
