//! # OpenDB Storage
//!
//! Append-only byte stores that back OpenDB segment files.
//!
//! Backends are **opaque**: they know nothing about records, categories or
//! segments. They offer positional reads, whole-buffer appends, durability
//! calls and tail truncation. `opendb_core` owns every file format decision.
//!
//! ## Design Principles
//!
//! - An `append` either lands completely or not at all
//! - Bytes are never rewritten in place
//! - Must be `Send + Sync` so segments can be scanned while they are shared
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - persistent storage using OS file APIs
//! - [`InMemoryBackend`] - for tests and recovery scenarios
//!
//! ## Example
//!
//! ```rust
//! use opendb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
