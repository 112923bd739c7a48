//! # OpenDB Core
//!
//! Embedded, log-structured key-value engine with Redis-style data types.
//!
//! This crate provides:
//! - Append-only segment files, one stream per category
//! - Crash recovery by replaying segments, truncating torn tails
//! - In-memory indexes for strings, lists, hashes, sets and sorted sets
//! - Per-key expiry recorded in the log
//! - Online compaction that rewrites archived segments
//!
//! ## Layout
//!
//! A database directory holds `<id>.data.<category>` segment files, a
//! `MERGE/` subdirectory used while compacting and a `LOCK` file. Only one
//! process may open a directory at a time.
//!
//! ## Example
//!
//! ```rust
//! use opendb_core::Database;
//!
//! let db = Database::open_in_memory().unwrap();
//! db.set(b"greeting", b"hello").unwrap();
//! db.rpush(b"queue", &[&b"a"[..], &b"b"[..]]).unwrap();
//!
//! assert_eq!(db.get(b"greeting").unwrap(), Some(b"hello".to_vec()));
//! assert_eq!(db.llen(b"queue").unwrap(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod compaction;
mod config;
mod database;
pub mod dir;
mod error;
pub mod index;
mod keyspace;
mod operation;
pub mod recovery;
pub mod segment;
mod types;

pub use compaction::CompactionResult;
pub use config::{Config, IndexMode, DEFAULT_SEGMENT_SIZE};
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use operation::{HashOp, ListOp, Operation, SetOp, StrOp, ZSetOp};
pub use recovery::ReplayStats;
pub use segment::Record;
pub use types::{now_secs, Area, Category, Location, SegmentId, Slot};
