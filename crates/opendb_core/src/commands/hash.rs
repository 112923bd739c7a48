//! Hash commands.

use super::require_args;
use crate::database::{check_key, Database};
use crate::error::CoreResult;
use crate::index::HashIndex;
use crate::keyspace::KeyspaceState;
use crate::operation::{HashOp, Operation};
use crate::segment::Record;

type HashState = KeyspaceState<HashIndex>;

fn field_value(state: &HashState, key: &[u8], field: &[u8]) -> Option<Vec<u8>> {
    if !state.is_live_key(key) {
        return None;
    }
    state.index().get(key, field).map(<[u8]>::to_vec)
}

fn log_set(state: &mut HashState, key: &[u8], field: &[u8], value: &[u8]) -> CoreResult<()> {
    state.log(&Record::new(Operation::Hash(HashOp::Set), key, value, field))?;
    Ok(())
}

impl Database {
    /// Sets `field` of `key`. Returns true if the field is new.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().hashes.write();
        state.prepare_write(key)?;
        let created = state.index().get(key, field).is_none();
        log_set(&mut state, key, field, value)?;
        Ok(created)
    }

    /// Sets `field` only if it does not exist. Returns true if it was set.
    pub fn hset_nx(&self, key: &[u8], field: &[u8], value: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().hashes.write();
        state.prepare_write(key)?;
        if state.index().get(key, field).is_some() {
            return Ok(false);
        }
        log_set(&mut state, key, field, value)?;
        Ok(true)
    }

    /// Returns the value of `field` in `key`.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        check_key(key)?;
        Ok(field_value(&self.inner().hashes.read(), key, field))
    }

    /// Sets several fields of `key`.
    pub fn hmset(&self, key: &[u8], pairs: &[(&[u8], &[u8])]) -> CoreResult<()> {
        self.ensure_open()?;
        check_key(key)?;
        require_args("hmset", pairs)?;
        let mut state = self.inner().hashes.write();
        state.prepare_write(key)?;
        for (field, value) in pairs {
            log_set(&mut state, key, field, value)?;
        }
        Ok(())
    }

    /// Returns the values of several fields, `None` for missing ones.
    pub fn hmget(&self, key: &[u8], fields: &[&[u8]]) -> CoreResult<Vec<Option<Vec<u8>>>> {
        self.ensure_open()?;
        check_key(key)?;
        require_args("hmget", fields)?;
        let state = self.inner().hashes.read();
        Ok(fields
            .iter()
            .map(|field| field_value(&state, key, field))
            .collect())
    }

    /// Removes fields from `key`. Returns how many existed.
    pub fn hdel(&self, key: &[u8], fields: &[&[u8]]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        require_args("hdel", fields)?;
        let mut state = self.inner().hashes.write();
        state.prepare_write(key)?;

        let mut removed = 0;
        for field in fields {
            if state.index().get(key, field).is_none() {
                continue;
            }
            state.log(&Record::new(Operation::Hash(HashOp::Delete), key, "", *field))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// True if `key` holds a live hash.
    pub fn hkey_exists(&self, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        Ok(self.inner().hashes.read().is_live_key(key))
    }

    /// True if `field` exists in `key`.
    pub fn hexists(&self, key: &[u8], field: &[u8]) -> CoreResult<bool> {
        Ok(self.hget(key, field)?.is_some())
    }

    /// Number of fields in `key`.
    pub fn hlen(&self, key: &[u8]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().hashes.read();
        Ok(if state.is_live_key(key) {
            state.index().len(key)
        } else {
            0
        })
    }

    /// Field names of `key` in byte order.
    pub fn hkeys(&self, key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(field, _)| field).collect())
    }

    /// Field values of `key`, ordered by field name.
    pub fn hvals(&self, key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(key)?.into_iter().map(|(_, value)| value).collect())
    }

    /// Every field/value pair of `key`, ordered by field name.
    pub fn hgetall(&self, key: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().hashes.read();
        if !state.is_live_key(key) {
            return Ok(Vec::new());
        }
        Ok(state
            .index()
            .fields(key)
            .map(|(field, value)| (field.to_vec(), value.to_vec()))
            .collect())
    }

    /// Deletes the hash. Returns false if it did not exist.
    pub fn hclear(&self, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().hashes.write();
        state.prepare_write(key)?;
        if !state.is_live_key(key) {
            return Ok(false);
        }
        state.log(&Record::new(Operation::Hash(HashOp::Clear), key, "", ""))?;
        Ok(true)
    }
}
