//! Database facade and recovery.

use crate::compaction::{CompactionResult, CompactionWorker};
use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{HashIndex, IndexAdapter, ListIndex, SetIndex, StrIndex, ZSetIndex};
use crate::keyspace::{Keyspace, KeyspaceHandle};
use crate::operation::Operation;
use crate::recovery::ReplayStats;
use crate::segment::{Record, SegmentManager};
use crate::types::{now_secs, Category, Location};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// State shared with the compaction worker.
pub(crate) struct Inner {
    config: Config,
    /// Database directory (holds the lock). None for in-memory databases.
    dir: Option<Arc<DatabaseDir>>,
    pub(crate) strings: Keyspace<StrIndex>,
    pub(crate) lists: Keyspace<ListIndex>,
    pub(crate) hashes: Keyspace<HashIndex>,
    pub(crate) sets: Keyspace<SetIndex>,
    pub(crate) zsets: Keyspace<ZSetIndex>,
}

impl Inner {
    fn keyspace(&self, category: Category) -> &dyn KeyspaceHandle {
        match category {
            Category::String => &self.strings,
            Category::List => &self.lists,
            Category::Hash => &self.hashes,
            Category::Set => &self.sets,
            Category::SortedSet => &self.zsets,
        }
    }

    fn keyspaces(&self) -> impl Iterator<Item = &dyn KeyspaceHandle> {
        Category::ALL
            .into_iter()
            .map(move |category| self.keyspace(category))
    }

    /// Compacts every category whose dead-byte ratio reached the threshold.
    fn auto_compact(&self) {
        let threshold = self.config.compaction_ratio;
        for keyspace in self.keyspaces() {
            let category = keyspace.category();
            let ratio = match keyspace.discard_ratio() {
                Ok(ratio) => ratio,
                Err(err) => {
                    warn!(category = %category, error = %err, "could not compute discard ratio");
                    continue;
                }
            };
            if ratio <= 0.0 || ratio < threshold {
                continue;
            }

            debug!(category = %category, ratio, "discard ratio reached threshold");
            match keyspace.compact() {
                Ok(_) => {}
                Err(CoreError::MergeInProgress { .. }) => {
                    debug!(category = %category, "compaction already running");
                }
                Err(err) => warn!(category = %category, error = %err, "background compaction failed"),
            }
        }
    }
}

/// The main database handle.
///
/// `Database` is the entry point for OpenDB. It owns one keyspace per
/// category and provides:
/// - Typed commands for strings, lists, hashes, sets and sorted sets
/// - Deadlines on keys of any category
/// - Manual and background compaction
/// - Recovery by replaying the log on open
///
/// # Opening a Database
///
/// ```rust,ignore
/// use opendb_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_database"))?;
/// db.set(b"greeting", b"hello")?;
/// assert_eq!(db.get(b"greeting")?, Some(b"hello".to_vec()));
/// db.close()?;
/// ```
///
/// # In-Memory Databases
///
/// For testing, use `Database::open_in_memory()`. Nothing survives the
/// handle.
pub struct Database {
    inner: Arc<Inner>,
    worker: Mutex<Option<CompactionWorker>>,
    /// Whether the database is open.
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database from a directory path with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the database locked (`DatabaseLocked`)
    /// - The directory is missing and may not be created (`InvalidFormat`)
    /// - I/O errors occur while replaying
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database from a directory path with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use opendb_core::{Config, Database, IndexMode};
    ///
    /// let config = Config::default()
    ///     .index_mode(IndexMode::KeyValue)
    ///     .max_segment_size(4 * 1024 * 1024);
    ///
    /// let db = Database::open_with_config(Path::new("my_database"), config)?;
    /// ```
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = Arc::new(DatabaseDir::open(path, config.create_if_missing)?);
        info!(path = %path.display(), "opening database");
        Self::build(Some(dir), config)
    }

    /// Opens an in-memory database.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens an in-memory database with custom configuration.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        Self::build(None, config)
    }

    fn build(dir: Option<Arc<DatabaseDir>>, config: Config) -> CoreResult<Self> {
        // Categories share nothing, so they replay side by side.
        let (strings, lists, hashes, sets, zsets) = thread::scope(|scope| {
            let dir = dir.as_ref();
            let config = &config;
            let strings = scope.spawn(move || {
                open_keyspace(dir, config, StrIndex::new(config.index_mode))
            });
            let lists = scope.spawn(move || open_keyspace(dir, config, ListIndex::new()));
            let hashes = scope.spawn(move || open_keyspace(dir, config, HashIndex::new()));
            let sets = scope.spawn(move || open_keyspace(dir, config, SetIndex::new()));
            let zsets = scope.spawn(move || open_keyspace(dir, config, ZSetIndex::new()));
            (
                join(strings),
                join(lists),
                join(hashes),
                join(sets),
                join(zsets),
            )
        });

        let inner = Arc::new(Inner {
            config,
            dir,
            strings: strings?,
            lists: lists?,
            hashes: hashes?,
            sets: sets?,
            zsets: zsets?,
        });

        let worker = if inner.config.compaction_interval.is_zero() {
            None
        } else {
            let shared = Arc::clone(&inner);
            Some(CompactionWorker::spawn(
                inner.config.compaction_interval,
                move || shared.auto_compact(),
            )?)
        };

        Ok(Self {
            inner,
            worker: Mutex::new(worker),
            is_open: RwLock::new(true),
        })
    }

    /// Stops background compaction, syncs every category and releases the
    /// directory lock.
    ///
    /// Closing twice is a no-op. Every other operation on a closed
    /// database fails with `DatabaseClosed`, so the directory may be
    /// reopened while this handle is still alive. A command that already
    /// passed its open check on another thread can still finish after
    /// `close` returns; join such threads before reopening.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
        for keyspace in self.inner.keyspaces() {
            keyspace.sync()?;
        }

        *is_open = false;
        if let Some(dir) = &self.inner.dir {
            dir.unlock()?;
        }
        info!("database closed");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the database directory. `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.dir.as_deref().map(DatabaseDir::path)
    }

    // ========================================================================
    // Log access
    // ========================================================================

    /// Appends one record to `category` and applies it.
    ///
    /// This is the raw write path the typed commands are built on. A write
    /// to an expired key first clears it.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `operation` belongs to another category,
    /// `EmptyKey` before any I/O, or the append error.
    pub fn append(
        &self,
        category: Category,
        key: &[u8],
        value: &[u8],
        extra: &[u8],
        operation: Operation,
    ) -> CoreResult<Location> {
        self.ensure_open()?;
        if operation.category() != category {
            return Err(CoreError::invalid_operation(format!(
                "{operation:?} does not belong to category {category}"
            )));
        }
        let record = Record::new(operation, key, value, extra);
        self.inner.keyspace(category).log(&record)
    }

    /// Reads the record stored at `location`.
    pub fn read_at(&self, category: Category, location: Location) -> CoreResult<Record> {
        self.ensure_open()?;
        self.inner.keyspace(category).read_at(location)
    }

    /// Visits every record of `category` in replay order.
    pub fn replay_category<F>(&self, category: Category, mut visit: F) -> CoreResult<ReplayStats>
    where
        F: FnMut(&Record, Location),
    {
        self.ensure_open()?;
        self.inner.keyspace(category).replay(&mut visit)
    }

    // ========================================================================
    // Compaction and statistics
    // ========================================================================

    /// Compacts the archived segments of `category`.
    ///
    /// # Errors
    ///
    /// `MergeInProgress` if a compaction of the category is already running.
    pub fn compact(&self, category: Category) -> CoreResult<CompactionResult> {
        self.ensure_open()?;
        self.inner.keyspace(category).compact()
    }

    /// Compacts every category in turn.
    pub fn compact_all(&self) -> CoreResult<Vec<CompactionResult>> {
        self.ensure_open()?;
        self.inner
            .keyspaces()
            .map(|keyspace| keyspace.compact())
            .collect()
    }

    /// Number of segments of `category`, active included.
    pub fn segment_count(&self, category: Category) -> CoreResult<usize> {
        self.ensure_open()?;
        Ok(self.inner.keyspace(category).segment_count())
    }

    /// Bytes on disk across every segment of `category`.
    pub fn disk_size(&self, category: Category) -> CoreResult<u64> {
        self.ensure_open()?;
        self.inner.keyspace(category).disk_size()
    }

    /// Dead archived bytes of `category` over its archived bytes.
    pub fn discard_ratio(&self, category: Category) -> CoreResult<f64> {
        self.ensure_open()?;
        self.inner.keyspace(category).discard_ratio()
    }

    /// Syncs the active segment of every category.
    pub fn sync(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.inner.keyspaces().try_for_each(|keyspace| keyspace.sync())
    }

    // ========================================================================
    // Deadlines
    // ========================================================================

    /// Expires `key` after `ttl`, rounded down to whole seconds.
    ///
    /// # Errors
    ///
    /// `InvalidTtl` for a ttl under one second, `KeyNotFound` if the key
    /// does not exist.
    pub fn expire(&self, category: Category, key: &[u8], ttl: Duration) -> CoreResult<()> {
        if ttl.as_secs() == 0 {
            return Err(CoreError::InvalidTtl);
        }
        self.expire_at(category, key, now_secs().saturating_add(ttl.as_secs()))
    }

    /// Expires `key` at `deadline` seconds since the Unix epoch.
    ///
    /// A deadline in the past expires the key immediately.
    pub fn expire_at(&self, category: Category, key: &[u8], deadline: u64) -> CoreResult<()> {
        self.ensure_open()?;
        check_key(key)?;
        self.inner.keyspace(category).expire_at(key, deadline)
    }

    /// Seconds left before `key` expires, `None` if it has no deadline.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the key does not exist or already expired.
    pub fn ttl(&self, category: Category, key: &[u8]) -> CoreResult<Option<u64>> {
        self.ensure_open()?;
        check_key(key)?;
        self.inner.keyspace(category).ttl(key)
    }

    /// Removes the deadline of `key`. Returns false if it had none.
    pub fn persist(&self, category: Category, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        self.inner.keyspace(category).persist(key)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close database cleanly");
        }
    }
}

pub(crate) fn check_key(key: &[u8]) -> CoreResult<()> {
    if key.is_empty() {
        Err(CoreError::EmptyKey)
    } else {
        Ok(())
    }
}

fn open_keyspace<I: IndexAdapter>(
    dir: Option<&Arc<DatabaseDir>>,
    config: &Config,
    index: I,
) -> CoreResult<Keyspace<I>> {
    let threshold = config.segment_size(I::CATEGORY);
    let segments = match dir {
        Some(dir) => {
            SegmentManager::open(Arc::clone(dir), I::CATEGORY, threshold, config.sync_on_write)?
        }
        None => SegmentManager::in_memory(I::CATEGORY, threshold),
    };
    Keyspace::open(segments, index)
}

fn join<T>(handle: ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}
