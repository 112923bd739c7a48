//! Typed commands on top of the log.
//!
//! Each submodule adds an `impl Database` block for one category. Writes
//! take the category's exclusive lock for the whole command, reads take the
//! shared lock. Every command rejects an empty key before touching a lock.

mod hash;
mod list;
mod set;
mod strs;
mod zset;

use crate::error::{CoreError, CoreResult};

/// Resolves an inclusive `[start, stop]` range with negative offsets
/// counted from the end. `None` when the range selects nothing.
pub(crate) fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = i64::try_from(len).ok()?;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

/// Resolves a single position, negative counted from the end.
pub(crate) fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { len + index } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

/// Fails with `WrongNumberOfArgs` for an empty argument list.
pub(crate) fn require_args<T>(command: &'static str, args: &[T]) -> CoreResult<()> {
    if args.is_empty() {
        Err(CoreError::WrongNumberOfArgs { command })
    } else {
        Ok(())
    }
}
