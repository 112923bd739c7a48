//! Core type definitions for OpenDB.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// One of the five logical data-structure families.
///
/// Each category owns its own segment family, index and expiry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Plain byte values.
    String,
    /// Double-ended lists.
    List,
    /// Field/value maps.
    Hash,
    /// Unordered member sets.
    Set,
    /// Members ordered by score.
    SortedSet,
}

impl Category {
    /// Every category, in wire-code order.
    pub const ALL: [Self; 5] = [
        Self::String,
        Self::List,
        Self::Hash,
        Self::Set,
        Self::SortedSet,
    ];

    /// Returns the on-disk category code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::String => 0,
            Self::List => 1,
            Self::Hash => 2,
            Self::Set => 3,
            Self::SortedSet => 4,
        }
    }

    /// Parses an on-disk category code.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::String),
            1 => Some(Self::List),
            2 => Some(Self::Hash),
            3 => Some(Self::Set),
            4 => Some(Self::SortedSet),
            _ => None,
        }
    }

    /// Returns the file-name suffix of this category's segments.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::String => "str",
            Self::List => "list",
            Self::Hash => "hash",
            Self::Set => "set",
            Self::SortedSet => "zset",
        }
    }

    /// Parses a segment file-name suffix.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.suffix() == suffix)
    }

    /// Position of this category in [`Category::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self.code() as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// The id space a segment lives in.
///
/// The merge area orders before the main area, so sorting segment ids
/// yields the replay order directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Area {
    /// Compaction output that has not been promoted yet.
    Merge,
    /// Organic segments written by the foreground path.
    Main,
}

/// Identifies a segment within one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId {
    area: Area,
    id: u32,
}

impl SegmentId {
    /// Creates an id in the main area.
    #[must_use]
    pub const fn main(id: u32) -> Self {
        Self {
            area: Area::Main,
            id,
        }
    }

    /// Creates an id in the merge area.
    #[must_use]
    pub const fn merge(id: u32) -> Self {
        Self {
            area: Area::Merge,
            id,
        }
    }

    /// Returns the area of this id.
    #[must_use]
    pub const fn area(self) -> Area {
        self.area
    }

    /// Returns the numeric part of this id.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.id
    }

    /// Returns true for compaction output that has not been promoted.
    #[must_use]
    pub const fn is_merge(self) -> bool {
        matches!(self.area, Area::Merge)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.area {
            Area::Merge => write!(f, "merge:{:09}", self.id),
            Area::Main => write!(f, "{:09}", self.id),
        }
    }
}

/// Points at the authoritative bytes of a record.
///
/// This is a plain value, never a handle. It is checked against the
/// segment manager on every dereference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    /// Segment holding the record.
    pub segment_id: SegmentId,
    /// Byte offset of the record header.
    pub offset: u64,
}

impl Location {
    /// Creates a new location.
    #[must_use]
    pub const fn new(segment_id: SegmentId, offset: u64) -> Self {
        Self { segment_id, offset }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.segment_id, self.offset)
    }
}

/// What an index entry stores: where a record lives and how large it is.
///
/// The size feeds dead-byte accounting once the entry is superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Where the record lives.
    pub location: Location,
    /// Encoded size of the record in bytes.
    pub size: u64,
}

impl Slot {
    /// Creates a new slot.
    #[must_use]
    pub const fn new(location: Location, size: u64) -> Self {
        Self { location, size }
    }
}

/// Current wall-clock time in whole seconds since the Unix epoch.
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_codes_round_trip() {
        for category in Category::ALL {
            assert_eq!(Category::from_code(category.code()), Some(category));
            assert_eq!(Category::from_suffix(category.suffix()), Some(category));
        }
        assert_eq!(Category::from_code(5), None);
        assert_eq!(Category::from_suffix("dat"), None);
    }

    #[test]
    fn merge_area_sorts_first() {
        let mut ids = vec![
            SegmentId::main(2),
            SegmentId::merge(7),
            SegmentId::main(0),
            SegmentId::merge(1),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                SegmentId::merge(1),
                SegmentId::merge(7),
                SegmentId::main(0),
                SegmentId::main(2),
            ]
        );
    }

    #[test]
    fn segment_id_display() {
        assert_eq!(SegmentId::main(12).to_string(), "000000012");
        assert_eq!(SegmentId::merge(3).to_string(), "merge:000000003");
    }
}
