//! String commands.

use super::require_args;
use crate::database::{check_key, Database};
use crate::error::{CoreError, CoreResult};
use crate::index::{StrIndex, StrValue};
use crate::keyspace::KeyspaceState;
use crate::operation::{Operation, StrOp};
use crate::segment::Record;
use std::collections::HashSet;
use std::time::Duration;

fn set_record(key: &[u8], value: &[u8]) -> Record {
    Record::new(Operation::Str(StrOp::Set), key, value, "")
}

fn current(state: &KeyspaceState<StrIndex>, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
    if !state.is_live_key(key) {
        return Ok(None);
    }
    match state.index().lookup(key) {
        None => Ok(None),
        Some(StrValue::Cached(value)) => Ok(Some(value.to_vec())),
        Some(StrValue::OnDisk(location)) => Ok(Some(state.read_at(location)?.value)),
    }
}

/// Replaces the value of a live key without touching its deadline.
fn overwrite(state: &mut KeyspaceState<StrIndex>, key: &[u8], value: &[u8]) -> CoreResult<()> {
    let deadline = state.deadline(key);
    state.log(&set_record(key, value))?;
    if let Some(at) = deadline {
        state.expire_at(key, at)?;
    }
    Ok(())
}

fn parse_int(raw: &[u8]) -> CoreResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| CoreError::wrong_value_type("value is not an integer"))
}

impl Database {
    /// Sets `key` to `value`, dropping any deadline.
    pub fn set(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.ensure_open()?;
        check_key(key)?;
        self.inner().strings.write().log(&set_record(key, value))?;
        Ok(())
    }

    /// Returns the value of `key`.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        check_key(key)?;
        current(&self.inner().strings.read(), key)
    }

    /// Deletes `key`. Returns false if it did not exist.
    pub fn delete(&self, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().strings.write();
        state.prepare_write(key)?;
        if !state.is_live_key(key) {
            return Ok(false);
        }
        state.log(&Record::new(Operation::Str(StrOp::Delete), key, "", ""))?;
        Ok(true)
    }

    /// Sets `key` to `value` and expires it after `ttl`.
    pub fn set_ex(&self, key: &[u8], value: &[u8], ttl: Duration) -> CoreResult<()> {
        self.ensure_open()?;
        check_key(key)?;
        if ttl.as_secs() == 0 {
            return Err(CoreError::InvalidTtl);
        }
        let mut state = self.inner().strings.write();
        state.log(&set_record(key, value))?;
        let deadline = crate::types::now_secs().saturating_add(ttl.as_secs());
        state.expire_at(key, deadline)
    }

    /// Sets `key` only if it does not exist. Returns true if it was set.
    pub fn set_nx(&self, key: &[u8], value: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().strings.write();
        if state.is_live_key(key) {
            return Ok(false);
        }
        state.log(&set_record(key, value))?;
        Ok(true)
    }

    /// Returns the value of `key` and deletes it.
    pub fn get_del(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().strings.write();
        let value = current(&state, key)?;
        if value.is_some() {
            state.log(&Record::new(Operation::Str(StrOp::Delete), key, "", ""))?;
        }
        Ok(value)
    }

    /// Sets several keys. Every key is validated before anything is written.
    pub fn mset(&self, pairs: &[(&[u8], &[u8])]) -> CoreResult<()> {
        self.ensure_open()?;
        require_args("mset", pairs)?;
        pairs.iter().try_for_each(|(key, _)| check_key(key))?;

        let mut state = self.inner().strings.write();
        for (key, value) in pairs {
            state.log(&set_record(key, value))?;
        }
        Ok(())
    }

    /// Sets several keys only if none of them exists. Returns true if the
    /// pairs were written.
    ///
    /// A key repeated in `pairs` keeps its first value.
    pub fn mset_nx(&self, pairs: &[(&[u8], &[u8])]) -> CoreResult<bool> {
        self.ensure_open()?;
        require_args("mset_nx", pairs)?;
        pairs.iter().try_for_each(|(key, _)| check_key(key))?;

        let mut state = self.inner().strings.write();
        if pairs.iter().any(|(key, _)| state.is_live_key(key)) {
            return Ok(false);
        }
        let mut written = HashSet::new();
        for (key, value) in pairs {
            if written.insert(*key) {
                state.log(&set_record(key, value))?;
            }
        }
        Ok(true)
    }

    /// Returns the values of several keys, `None` for missing ones.
    pub fn mget(&self, keys: &[&[u8]]) -> CoreResult<Vec<Option<Vec<u8>>>> {
        self.ensure_open()?;
        require_args("mget", keys)?;
        keys.iter().try_for_each(|key| check_key(key))?;

        let state = self.inner().strings.read();
        keys.iter().map(|key| current(&state, key)).collect()
    }

    /// Appends `value` to `key`, creating it if missing. Returns the new
    /// length. A deadline on the key is kept.
    pub fn str_append(&self, key: &[u8], value: &[u8]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().strings.write();
        state.prepare_write(key)?;
        let mut combined = current(&state, key)?.unwrap_or_default();
        combined.extend_from_slice(value);
        overwrite(&mut state, key, &combined)?;
        Ok(combined.len())
    }

    /// Increments the integer at `key` by one.
    pub fn incr(&self, key: &[u8]) -> CoreResult<i64> {
        self.incr_by(key, 1)
    }

    /// Decrements the integer at `key` by one.
    pub fn decr(&self, key: &[u8]) -> CoreResult<i64> {
        self.incr_by(key, -1)
    }

    /// Decrements the integer at `key` by `delta`.
    pub fn decr_by(&self, key: &[u8], delta: i64) -> CoreResult<i64> {
        let delta = delta.checked_neg().ok_or(CoreError::IntegerOverflow)?;
        self.incr_by(key, delta)
    }

    /// Adds `delta` to the integer at `key`. A missing key counts as zero.
    ///
    /// # Errors
    ///
    /// `WrongValueType` if the value is not a decimal i64, `IntegerOverflow`
    /// if the result does not fit.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> CoreResult<i64> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().strings.write();
        state.prepare_write(key)?;
        let value = match current(&state, key)? {
            Some(raw) => parse_int(&raw)?,
            None => 0,
        };
        let value = value.checked_add(delta).ok_or(CoreError::IntegerOverflow)?;
        overwrite(&mut state, key, value.to_string().as_bytes())?;
        Ok(value)
    }

    /// Length of the value at `key`, zero if missing.
    pub fn str_len(&self, key: &[u8]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        Ok(current(&self.inner().strings.read(), key)?.map_or(0, |v| v.len()))
    }

    /// True if `key` holds a live value.
    pub fn exists(&self, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        Ok(self.inner().strings.read().is_live_key(key))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{Config, IndexMode};
    use crate::error::CoreError;
    use crate::types::Category;
    use crate::Database;
    use std::time::Duration;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn set_get_delete() {
        let db = db();
        db.set(b"k", b"v").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(db.exists(b"k").unwrap());

        assert!(db.delete(b"k").unwrap());
        assert!(!db.delete(b"k").unwrap());
        assert_eq!(db.get(b"k").unwrap(), None);
    }

    #[test]
    fn both_index_modes_read_values() {
        for mode in [IndexMode::KeyOnly, IndexMode::KeyValue] {
            let db = Database::open_in_memory_with_config(Config::default().index_mode(mode))
                .unwrap();
            db.set(b"k", b"one").unwrap();
            db.set(b"k", b"two").unwrap();
            assert_eq!(db.get(b"k").unwrap(), Some(b"two".to_vec()));
        }
    }

    #[test]
    fn empty_key_is_rejected() {
        let db = db();
        assert!(matches!(db.set(b"", b"v").unwrap_err(), CoreError::EmptyKey));
        assert!(matches!(db.get(b"").unwrap_err(), CoreError::EmptyKey));
        assert!(matches!(
            db.mset(&[(&b"a"[..], &b"1"[..]), (&b""[..], &b"2"[..])])
                .unwrap_err(),
            CoreError::EmptyKey
        ));
        assert_eq!(db.get(b"a").unwrap(), None);
    }

    #[test]
    fn set_nx_and_get_del() {
        let db = db();
        assert!(db.set_nx(b"k", b"first").unwrap());
        assert!(!db.set_nx(b"k", b"second").unwrap());
        assert_eq!(db.get_del(b"k").unwrap(), Some(b"first".to_vec()));
        assert_eq!(db.get_del(b"k").unwrap(), None);
    }

    #[test]
    fn mset_and_mget() {
        let db = db();
        db.mset(&[(&b"a"[..], &b"1"[..]), (&b"b"[..], &b"2"[..])])
            .unwrap();
        let values = db.mget(&[&b"a"[..], &b"missing"[..], &b"b"[..]]).unwrap();
        assert_eq!(values, vec![Some(b"1".to_vec()), None, Some(b"2".to_vec())]);
        assert!(matches!(
            db.mget(&[]).unwrap_err(),
            CoreError::WrongNumberOfArgs { command: "mget" }
        ));
    }

    #[test]
    fn mset_nx_is_all_or_nothing() {
        let db = db();
        assert!(db
            .mset_nx(&[(&b"a"[..], &b"1"[..]), (&b"b"[..], &b"2"[..]), (&b"a"[..], &b"3"[..])])
            .unwrap());
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));

        assert!(!db
            .mset_nx(&[(&b"c"[..], &b"1"[..]), (&b"b"[..], &b"9"[..])])
            .unwrap());
        assert_eq!(db.get(b"c").unwrap(), None);
        assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));

        db.expire_at(Category::String, b"b", 1).unwrap();
        assert!(db.mset_nx(&[(&b"b"[..], &b"new"[..])]).unwrap());
        assert_eq!(db.get(b"b").unwrap(), Some(b"new".to_vec()));
        assert!(matches!(
            db.mset_nx(&[(&b""[..], &b"v"[..])]).unwrap_err(),
            CoreError::EmptyKey
        ));
    }

    #[test]
    fn counters() {
        let db = db();
        assert_eq!(db.incr(b"n").unwrap(), 1);
        assert_eq!(db.incr_by(b"n", 41).unwrap(), 42);
        assert_eq!(db.decr(b"n").unwrap(), 41);
        assert_eq!(db.decr_by(b"n", 50).unwrap(), -9);
        assert_eq!(db.get(b"n").unwrap(), Some(b"-9".to_vec()));

        db.set(b"max", i64::MAX.to_string().as_bytes()).unwrap();
        assert!(matches!(db.incr(b"max").unwrap_err(), CoreError::IntegerOverflow));
        assert!(matches!(db.decr_by(b"n", i64::MIN).unwrap_err(), CoreError::IntegerOverflow));

        db.set(b"text", b"abc").unwrap();
        assert!(matches!(db.incr(b"text").unwrap_err(), CoreError::WrongValueType { .. }));
    }

    #[test]
    fn append_keeps_deadline() {
        let db = db();
        assert_eq!(db.str_append(b"k", b"ab").unwrap(), 2);
        db.expire(Category::String, b"k", Duration::from_secs(100)).unwrap();
        assert_eq!(db.str_append(b"k", b"cd").unwrap(), 4);
        assert_eq!(db.get(b"k").unwrap(), Some(b"abcd".to_vec()));
        assert_eq!(db.str_len(b"k").unwrap(), 4);
        assert!(db.ttl(Category::String, b"k").unwrap().is_some());
    }

    #[test]
    fn set_ex_and_expiry() {
        let db = db();
        db.set_ex(b"k", b"v", Duration::from_secs(100)).unwrap();
        let ttl = db.ttl(Category::String, b"k").unwrap().unwrap();
        assert!(ttl > 90 && ttl <= 100);

        assert!(db.persist(Category::String, b"k").unwrap());
        assert_eq!(db.ttl(Category::String, b"k").unwrap(), None);

        db.expire_at(Category::String, b"k", 1).unwrap();
        assert_eq!(db.get(b"k").unwrap(), None);
        assert!(!db.exists(b"k").unwrap());
        assert!(matches!(
            db.ttl(Category::String, b"k").unwrap_err(),
            CoreError::KeyNotFound
        ));
    }
}
