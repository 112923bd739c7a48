//! Database configuration.

use crate::types::Category;
use std::time::Duration;

/// Default rotation threshold for every category (32 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 32 * 1024 * 1024;

/// How the String index holds values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Cache values in memory next to their locations.
    KeyValue,
    /// Keep only locations and read values back from the segment.
    #[default]
    KeyOnly,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Rotation threshold used by categories without an override.
    pub max_segment_size: u64,

    /// Per-category rotation thresholds, indexed by [`Category::index`].
    pub segment_size_overrides: [Option<u64>; 5],

    /// Whether to fsync the active segment after every append.
    pub sync_on_write: bool,

    /// Whether the String index caches values.
    pub index_mode: IndexMode,

    /// Fraction of dead archived bytes that triggers automatic compaction.
    pub compaction_ratio: f64,

    /// How often the background worker checks the ratio (zero = never).
    pub compaction_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_segment_size: DEFAULT_SEGMENT_SIZE,
            segment_size_overrides: [None; 5],
            sync_on_write: false,
            index_mode: IndexMode::KeyOnly,
            compaction_ratio: 0.5,
            compaction_interval: Duration::ZERO, // disabled
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the default rotation threshold.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the rotation threshold of a single category.
    #[must_use]
    pub fn segment_size_for(mut self, category: Category, size: u64) -> Self {
        self.segment_size_overrides[category.index()] = Some(size);
        self
    }

    /// Sets whether to fsync after every append.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets how the String index holds values.
    #[must_use]
    pub const fn index_mode(mut self, mode: IndexMode) -> Self {
        self.index_mode = mode;
        self
    }

    /// Sets the dead-byte ratio that triggers automatic compaction.
    #[must_use]
    pub fn compaction_ratio(mut self, ratio: f64) -> Self {
        self.compaction_ratio = ratio;
        self
    }

    /// Sets how often the background worker checks the ratio.
    #[must_use]
    pub const fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Resolves the rotation threshold for `category`.
    #[must_use]
    pub fn segment_size(&self, category: Category) -> u64 {
        self.segment_size_overrides[category.index()].unwrap_or(self.max_segment_size)
    }
}
