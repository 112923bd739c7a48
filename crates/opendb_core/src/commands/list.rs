//! List commands.
//!
//! Positions are resolved against the head/tail window on every call; the
//! log only ever sees sequence numbers. Commands that reshape the window
//! (pop, remove, insert, trim) finish with a counter record holding the new
//! counters, and that record is what makes the change visible. A command
//! that empties a list logs `Clear` instead.

use super::{require_args, resolve_index, resolve_range};
use crate::database::{check_key, Database};
use crate::error::{CoreError, CoreResult};
use crate::index::{element_key, ListIndex, ListMeta};
use crate::keyspace::KeyspaceState;
use crate::operation::{ListOp, Operation};
use crate::segment::Record;

type ListState = KeyspaceState<ListIndex>;

fn element(op: ListOp, seq: u32, key: &[u8], value: &[u8]) -> Record {
    Record::new(Operation::List(op), element_key(seq, key), value, "")
}

fn live_meta(state: &ListState, key: &[u8]) -> Option<ListMeta> {
    if !state.is_live_key(key) {
        return None;
    }
    state.index().meta(key).filter(|meta| !meta.is_empty())
}

fn live_window(state: &ListState, key: &[u8]) -> Vec<(u32, Vec<u8>)> {
    if !state.is_live_key(key) {
        return Vec::new();
    }
    state
        .index()
        .window(key)
        .into_iter()
        .map(|(seq, value)| (seq, value.to_vec()))
        .collect()
}

fn element_at(state: &ListState, key: &[u8], seq: u32) -> CoreResult<Vec<u8>> {
    state
        .index()
        .element(key, seq)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| CoreError::invalid_format(format!("list element {seq} is missing")))
}

fn log_meta(state: &mut ListState, key: &[u8], meta: ListMeta) -> CoreResult<()> {
    state.log(&Record::new(Operation::List(ListOp::Meta), key, meta.encode(), ""))?;
    Ok(())
}

/// Writes `values` as the whole list under fresh sequences, then commits
/// them with one `Meta` record. Until that record lands the old window is
/// what readers and replay see.
fn rewrite(
    state: &mut ListState,
    key: &[u8],
    meta: ListMeta,
    op: ListOp,
    values: &[&[u8]],
) -> CoreResult<()> {
    let moved = u32::try_from(values.len())
        .ok()
        .and_then(|len| meta.relocated(len))
        .ok_or(CoreError::ListSequenceOverflow)?;
    for (position, value) in values.iter().enumerate() {
        state.log(&element(op, moved.seq_at(position), key, value))?;
    }
    log_meta(state, key, moved)
}

fn log_clear(state: &mut ListState, key: &[u8]) -> CoreResult<()> {
    state.log(&Record::new(Operation::List(ListOp::Clear), key, "", ""))?;
    Ok(())
}

#[derive(Clone, Copy)]
enum End {
    Left,
    Right,
}

impl Database {
    fn push(&self, end: End, key: &[u8], values: &[&[u8]]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().lists.write();
        state.prepare_write(key)?;

        let meta = state.index().meta(key).unwrap_or_default();
        let room = match end {
            End::Left => meta.head as usize,
            End::Right => (u32::MAX - meta.tail) as usize,
        };
        if room < values.len() {
            return Err(CoreError::ListSequenceOverflow);
        }

        for value in values {
            let meta = state.index().meta(key).unwrap_or_default();
            let record = match end {
                End::Left => element(ListOp::PushLeft, meta.head, key, value),
                End::Right => element(ListOp::PushRight, meta.tail, key, value),
            };
            state.log(&record)?;
        }
        Ok(state.index().meta(key).map_or(0, ListMeta::len))
    }

    fn pop(&self, end: End, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().lists.write();
        state.prepare_write(key)?;
        let Some(meta) = live_meta(&state, key) else {
            return Ok(None);
        };

        let (op, seq, after) = match end {
            End::Left => (
                ListOp::PopLeft,
                meta.head + 1,
                ListMeta::from_counters(meta.head + 1, meta.tail),
            ),
            End::Right => (
                ListOp::PopRight,
                meta.tail - 1,
                ListMeta::from_counters(meta.head, meta.tail - 1),
            ),
        };
        let value = element_at(&state, key, seq)?;

        if meta.len() == 1 {
            log_clear(&mut state, key)?;
        } else {
            state.log(&element(op, seq, key, b""))?;
            log_meta(&mut state, key, after)?;
        }
        Ok(Some(value))
    }

    /// Pushes `values` onto the head of `key`, one after another. Returns
    /// the new length.
    ///
    /// # Errors
    ///
    /// `ListSequenceOverflow` if the head counter would pass zero.
    pub fn lpush(&self, key: &[u8], values: &[&[u8]]) -> CoreResult<usize> {
        require_args("lpush", values)?;
        self.push(End::Left, key, values)
    }

    /// Pushes `values` onto the tail of `key`. Returns the new length.
    pub fn rpush(&self, key: &[u8], values: &[&[u8]]) -> CoreResult<usize> {
        require_args("rpush", values)?;
        self.push(End::Right, key, values)
    }

    /// Removes and returns the first element.
    pub fn lpop(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.pop(End::Left, key)
    }

    /// Removes and returns the last element.
    pub fn rpop(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.pop(End::Right, key)
    }

    /// Number of elements in `key`.
    pub fn llen(&self, key: &[u8]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().lists.read();
        Ok(live_meta(&state, key).map_or(0, ListMeta::len))
    }

    /// Element at `index`, negative counted from the end.
    pub fn lindex(&self, key: &[u8], index: i64) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().lists.read();
        let Some(meta) = live_meta(&state, key) else {
            return Ok(None);
        };
        match resolve_index(meta.len(), index) {
            Some(position) => element_at(&state, key, meta.seq_at(position)).map(Some),
            None => Ok(None),
        }
    }

    /// Elements in the inclusive range `[start, stop]`.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> CoreResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().lists.read();
        let window = live_window(&state, key);
        Ok(match resolve_range(window.len(), start, stop) {
            Some((from, to)) => window[from..=to].iter().map(|(_, v)| v.clone()).collect(),
            None => Vec::new(),
        })
    }

    /// Overwrites the element at `index`.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` for a missing list, `IndexOutOfRange` outside it.
    pub fn lset(&self, key: &[u8], index: i64, value: &[u8]) -> CoreResult<()> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().lists.write();
        state.prepare_write(key)?;
        let meta = live_meta(&state, key).ok_or(CoreError::KeyNotFound)?;
        let position =
            resolve_index(meta.len(), index).ok_or(CoreError::IndexOutOfRange { index })?;
        state.log(&element(ListOp::SetAt, meta.seq_at(position), key, value))?;
        Ok(())
    }

    /// Removes elements equal to `value`: the first `count` for a positive
    /// count, the last `|count|` for a negative one, all for zero. Returns
    /// how many were removed.
    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().lists.write();
        state.prepare_write(key)?;
        let Some(meta) = live_meta(&state, key) else {
            return Ok(0);
        };
        let window = live_window(&state, key);

        let limit = usize::try_from(count.unsigned_abs()).unwrap_or(usize::MAX);
        let limit = if count == 0 { usize::MAX } else { limit };
        let mut doomed = vec![false; window.len()];
        let mut removed = 0;
        let positions: Box<dyn Iterator<Item = usize>> = if count < 0 {
            Box::new((0..window.len()).rev())
        } else {
            Box::new(0..window.len())
        };
        for position in positions {
            if removed == limit {
                break;
            }
            if window[position].1 == value {
                doomed[position] = true;
                removed += 1;
            }
        }
        if removed == 0 {
            return Ok(0);
        }
        if removed == window.len() {
            log_clear(&mut state, key)?;
            return Ok(removed);
        }

        // Removals at the ends only narrow the window.
        let first = doomed.iter().position(|d| !*d).unwrap_or(0);
        let last = doomed.iter().rposition(|d| !*d).unwrap_or(0);
        if doomed[first..=last].iter().all(|d| !*d) {
            let narrowed = ListMeta::from_counters(meta.seq_at(first) - 1, meta.seq_at(last) + 1);
            log_meta(&mut state, key, narrowed)?;
            return Ok(removed);
        }

        let survivors: Vec<&[u8]> = window
            .iter()
            .zip(&doomed)
            .filter(|(_, doomed)| !**doomed)
            .map(|((_, value), _)| value.as_slice())
            .collect();
        rewrite(&mut state, key, meta, ListOp::RemoveByValue, &survivors)?;
        Ok(removed)
    }

    /// Inserts `value` before or after the first element equal to `pivot`.
    ///
    /// Returns the new length, or `None` if the list or the pivot is missing.
    pub fn linsert(
        &self,
        key: &[u8],
        before: bool,
        pivot: &[u8],
        value: &[u8],
    ) -> CoreResult<Option<usize>> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().lists.write();
        state.prepare_write(key)?;
        let Some(meta) = live_meta(&state, key) else {
            return Ok(None);
        };
        let window = live_window(&state, key);
        let Some(position) = window.iter().position(|(_, v)| v == pivot) else {
            return Ok(None);
        };

        let at = if before { position } else { position + 1 };
        if at == 0 || at == window.len() {
            // Inserting at an end is a plain push, one record.
            let (op, seq, room) = if at == 0 {
                (ListOp::PushLeft, meta.head, meta.head > 0)
            } else {
                (ListOp::PushRight, meta.tail, meta.tail < u32::MAX)
            };
            if !room {
                return Err(CoreError::ListSequenceOverflow);
            }
            state.log(&element(op, seq, key, value))?;
            return Ok(Some(window.len() + 1));
        }

        let mut values: Vec<&[u8]> = window.iter().map(|(_, v)| v.as_slice()).collect();
        values.insert(at, value);
        rewrite(&mut state, key, meta, ListOp::InsertRelative, &values)?;
        Ok(Some(values.len()))
    }

    /// Keeps only the inclusive range `[start, stop]`. An empty range
    /// deletes the list.
    pub fn ltrim(&self, key: &[u8], start: i64, stop: i64) -> CoreResult<()> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().lists.write();
        state.prepare_write(key)?;
        let Some(meta) = live_meta(&state, key) else {
            return Ok(());
        };
        let len = meta.len();

        let Some((from, to)) = resolve_range(len, start, stop) else {
            return log_clear(&mut state, key);
        };
        if from == 0 && to + 1 == len {
            return Ok(());
        }
        let trimmed = ListMeta::from_counters(meta.seq_at(from) - 1, meta.seq_at(to) + 1);
        state.log(&Record::new(Operation::List(ListOp::Trim), key, trimmed.encode(), ""))?;
        Ok(())
    }

    /// Deletes the list. Returns false if it did not exist.
    pub fn lclear(&self, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().lists.write();
        state.prepare_write(key)?;
        if !state.is_live_key(key) {
            return Ok(false);
        }
        log_clear(&mut state, key)?;
        Ok(true)
    }
}
