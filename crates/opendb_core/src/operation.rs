//! Per-category operation codes.
//!
//! Operations form a closed enum-of-enums: the category is derived from the
//! operation, and every apply path matches exhaustively on the inner enum.
//! Wire codes follow declaration order starting at zero.

use crate::types::Category;

macro_rules! op_codes {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $code:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Returns the on-disk code of this operation.
            #[must_use]
            pub const fn code(self) -> u16 {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            /// Parses an on-disk operation code.
            #[must_use]
            pub const fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

op_codes! {
    /// Operations on plain values.
    pub enum StrOp {
        /// Store a value, replacing any previous one and its deadline.
        Set = 0,
        /// Remove the key.
        Delete = 1,
        /// Arm a deadline. The value holds it as u64 big-endian seconds.
        Expire = 2,
        /// Drop the deadline.
        Persist = 3,
    }
}

op_codes! {
    /// Operations on lists.
    ///
    /// Element records are keyed by the sequence number (u32 big-endian)
    /// followed by the user key.
    pub enum ListOp {
        /// Store at the head sequence and extend the window leftwards.
        PushLeft = 0,
        /// Store at the tail sequence and extend the window rightwards.
        PushRight = 1,
        /// Remove the element just right of the head.
        PopLeft = 2,
        /// Remove the element just left of the tail.
        PopRight = 3,
        /// Stage an element of a list rebuilt without removed values.
        RemoveByValue = 4,
        /// Stage an element of a list rebuilt around an insertion.
        InsertRelative = 5,
        /// Overwrite the element at a sequence.
        SetAt = 6,
        /// Narrow the window to the counters in the value and drop the
        /// elements outside it.
        Trim = 7,
        /// Drop the whole list.
        Clear = 8,
        /// Set the head/tail counters and drop elements outside them.
        /// Value is head ++ tail, u32 BE.
        Meta = 9,
        /// Arm a deadline.
        Expire = 10,
        /// Drop the deadline.
        Persist = 11,
    }
}

op_codes! {
    /// Operations on hashes. The field travels in `extra`.
    pub enum HashOp {
        /// Upsert a field.
        Set = 0,
        /// Remove a field.
        Delete = 1,
        /// Drop the whole hash.
        Clear = 2,
        /// Arm a deadline.
        Expire = 3,
        /// Drop the deadline.
        Persist = 4,
    }
}

op_codes! {
    /// Operations on sets. The member travels in `value`.
    pub enum SetOp {
        /// Insert a member.
        Add = 0,
        /// Remove a member.
        Remove = 1,
        /// Move a member to the key named in `extra`.
        Move = 2,
        /// Drop the whole set.
        Clear = 3,
        /// Arm a deadline.
        Expire = 4,
        /// Drop the deadline.
        Persist = 5,
    }
}

op_codes! {
    /// Operations on sorted sets. The member travels in `value` and the
    /// score, as text, in `extra`.
    pub enum ZSetOp {
        /// Upsert a member with its score.
        Add = 0,
        /// Remove a member.
        Remove = 1,
        /// Drop the whole sorted set.
        Clear = 2,
        /// Arm a deadline.
        Expire = 3,
        /// Drop the deadline.
        Persist = 4,
    }
}

/// A mutation, tagged with the category it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A plain-value operation.
    Str(StrOp),
    /// A list operation.
    List(ListOp),
    /// A hash operation.
    Hash(HashOp),
    /// A set operation.
    Set(SetOp),
    /// A sorted-set operation.
    ZSet(ZSetOp),
}

impl Operation {
    /// Returns the category this operation belongs to.
    #[must_use]
    pub const fn category(self) -> Category {
        match self {
            Self::Str(_) => Category::String,
            Self::List(_) => Category::List,
            Self::Hash(_) => Category::Hash,
            Self::Set(_) => Category::Set,
            Self::ZSet(_) => Category::SortedSet,
        }
    }

    /// Returns the on-disk code, scoped within the category.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Str(op) => op.code(),
            Self::List(op) => op.code(),
            Self::Hash(op) => op.code(),
            Self::Set(op) => op.code(),
            Self::ZSet(op) => op.code(),
        }
    }

    /// Rebuilds an operation from its category and code.
    #[must_use]
    pub const fn from_parts(category: Category, code: u16) -> Option<Self> {
        match category {
            Category::String => match StrOp::from_code(code) {
                Some(op) => Some(Self::Str(op)),
                None => None,
            },
            Category::List => match ListOp::from_code(code) {
                Some(op) => Some(Self::List(op)),
                None => None,
            },
            Category::Hash => match HashOp::from_code(code) {
                Some(op) => Some(Self::Hash(op)),
                None => None,
            },
            Category::Set => match SetOp::from_code(code) {
                Some(op) => Some(Self::Set(op)),
                None => None,
            },
            Category::SortedSet => match ZSetOp::from_code(code) {
                Some(op) => Some(Self::ZSet(op)),
                None => None,
            },
        }
    }

    /// The operation that arms a deadline in `category`.
    #[must_use]
    pub const fn expire(category: Category) -> Self {
        match category {
            Category::String => Self::Str(StrOp::Expire),
            Category::List => Self::List(ListOp::Expire),
            Category::Hash => Self::Hash(HashOp::Expire),
            Category::Set => Self::Set(SetOp::Expire),
            Category::SortedSet => Self::ZSet(ZSetOp::Expire),
        }
    }

    /// The operation that drops a deadline in `category`.
    #[must_use]
    pub const fn persist(category: Category) -> Self {
        match category {
            Category::String => Self::Str(StrOp::Persist),
            Category::List => Self::List(ListOp::Persist),
            Category::Hash => Self::Hash(HashOp::Persist),
            Category::Set => Self::Set(SetOp::Persist),
            Category::SortedSet => Self::ZSet(ZSetOp::Persist),
        }
    }

    /// The operation that drops a whole key in `category`.
    ///
    /// Plain values have no clear of their own; `Delete` plays that role.
    #[must_use]
    pub const fn clear(category: Category) -> Self {
        match category {
            Category::String => Self::Str(StrOp::Delete),
            Category::List => Self::List(ListOp::Clear),
            Category::Hash => Self::Hash(HashOp::Clear),
            Category::Set => Self::Set(SetOp::Clear),
            Category::SortedSet => Self::ZSet(ZSetOp::Clear),
        }
    }

    /// True for `Expire` and `Persist`, which only touch the expiry table.
    #[must_use]
    pub const fn is_ttl(self) -> bool {
        matches!(
            self,
            Self::Str(StrOp::Expire | StrOp::Persist)
                | Self::List(ListOp::Expire | ListOp::Persist)
                | Self::Hash(HashOp::Expire | HashOp::Persist)
                | Self::Set(SetOp::Expire | SetOp::Persist)
                | Self::ZSet(ZSetOp::Expire | ZSetOp::Persist)
        )
    }

    /// True for `Expire` only.
    #[must_use]
    pub const fn is_expire(self) -> bool {
        matches!(
            self,
            Self::Str(StrOp::Expire)
                | Self::List(ListOp::Expire)
                | Self::Hash(HashOp::Expire)
                | Self::Set(SetOp::Expire)
                | Self::ZSet(ZSetOp::Expire)
        )
    }

    /// True for data operations that also drop the key's deadline.
    #[must_use]
    pub const fn clears_ttl(self) -> bool {
        matches!(
            self,
            Self::Str(StrOp::Set | StrOp::Delete)
                | Self::List(ListOp::Clear)
                | Self::Hash(HashOp::Clear)
                | Self::Set(SetOp::Clear)
                | Self::ZSet(ZSetOp::Clear)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_declaration_order() {
        assert_eq!(ListOp::PushLeft.code(), 0);
        assert_eq!(ListOp::Meta.code(), 9);
        assert_eq!(SetOp::Move.code(), 2);
        assert_eq!(ZSetOp::Persist.code(), 4);
        assert_eq!(ListOp::from_code(12), None);
    }

    #[test]
    fn from_parts_round_trip() {
        for category in Category::ALL {
            let mut code = 0;
            while let Some(op) = Operation::from_parts(category, code) {
                assert_eq!(op.category(), category);
                assert_eq!(op.code(), code);
                code += 1;
            }
            assert!(code >= 4, "{category} has too few operations");
        }
    }

    #[test]
    fn ttl_helpers_agree_per_category() {
        for category in Category::ALL {
            assert!(Operation::expire(category).is_ttl());
            assert!(Operation::expire(category).is_expire());
            assert!(Operation::persist(category).is_ttl());
            assert!(!Operation::persist(category).is_expire());
            assert!(Operation::clear(category).clears_ttl());
            assert_eq!(Operation::clear(category).category(), category);
        }
        assert!(!Operation::Hash(HashOp::Set).clears_ttl());
    }
}
