//! Set commands.

use super::require_args;
use crate::database::{check_key, Database};
use crate::error::CoreResult;
use crate::index::SetIndex;
use crate::keyspace::KeyspaceState;
use crate::operation::{Operation, SetOp};
use crate::segment::Record;
use rand::seq::{IteratorRandom, SliceRandom};
use std::collections::BTreeSet;

type SetState = KeyspaceState<SetIndex>;

fn live_members(state: &SetState, key: &[u8]) -> BTreeSet<Vec<u8>> {
    if !state.is_live_key(key) {
        return BTreeSet::new();
    }
    state.index().members(key).map(<[u8]>::to_vec).collect()
}

fn log_remove(state: &mut SetState, key: &[u8], member: &[u8]) -> CoreResult<()> {
    state.log(&Record::new(Operation::Set(SetOp::Remove), key, member, ""))?;
    Ok(())
}

impl Database {
    /// Adds members to `key`. Returns how many were new.
    pub fn sadd(&self, key: &[u8], members: &[&[u8]]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        require_args("sadd", members)?;
        let mut state = self.inner().sets.write();
        state.prepare_write(key)?;

        let mut added = 0;
        for member in members {
            if state.index().contains(key, member) {
                continue;
            }
            state.log(&Record::new(Operation::Set(SetOp::Add), key, *member, ""))?;
            added += 1;
        }
        Ok(added)
    }

    /// Removes members from `key`. Returns how many were present.
    pub fn srem(&self, key: &[u8], members: &[&[u8]]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        require_args("srem", members)?;
        let mut state = self.inner().sets.write();
        state.prepare_write(key)?;

        let mut removed = 0;
        for member in members {
            if !state.index().contains(key, member) {
                continue;
            }
            log_remove(&mut state, key, member)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Removes and returns up to `count` members, smallest first.
    pub fn spop(&self, key: &[u8], count: usize) -> CoreResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().sets.write();
        state.prepare_write(key)?;

        let popped: Vec<Vec<u8>> = state
            .index()
            .members(key)
            .take(count)
            .map(<[u8]>::to_vec)
            .collect();
        for member in &popped {
            log_remove(&mut state, key, member)?;
        }
        Ok(popped)
    }

    /// Random members of `key`, left in place.
    ///
    /// A positive `count` returns up to `count` distinct members. A negative
    /// one returns exactly `|count|` members and may repeat them.
    pub fn srand_member(&self, key: &[u8], count: i64) -> CoreResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().sets.read();
        if !state.is_live_key(key) {
            return Ok(Vec::new());
        }

        let wanted = usize::try_from(count.unsigned_abs()).unwrap_or(usize::MAX);
        let mut rng = rand::thread_rng();
        let members = state.index().members(key);
        if count >= 0 {
            return Ok(members
                .choose_multiple(&mut rng, wanted)
                .into_iter()
                .map(<[u8]>::to_vec)
                .collect());
        }
        let members: Vec<&[u8]> = members.collect();
        Ok((0..wanted)
            .filter_map(|_| members.choose(&mut rng))
            .map(|member| member.to_vec())
            .collect())
    }

    /// True if `key` holds a live set.
    pub fn skey_exists(&self, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        Ok(self.inner().sets.read().is_live_key(key))
    }

    /// True if `member` is in `key`.
    pub fn sismember(&self, key: &[u8], member: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().sets.read();
        Ok(state.is_live_key(key) && state.index().contains(key, member))
    }

    /// Members of `key` in byte order.
    pub fn smembers(&self, key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        check_key(key)?;
        Ok(live_members(&self.inner().sets.read(), key)
            .into_iter()
            .collect())
    }

    /// Number of members in `key`.
    pub fn scard(&self, key: &[u8]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().sets.read();
        Ok(if state.is_live_key(key) {
            state.index().len(key)
        } else {
            0
        })
    }

    /// Moves `member` from `source` to `destination`.
    ///
    /// Returns false if `member` is not in `source`. Moving within the same
    /// set succeeds without writing anything.
    pub fn smove(&self, source: &[u8], destination: &[u8], member: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(source)?;
        check_key(destination)?;
        let mut state = self.inner().sets.write();
        state.prepare_write(source)?;
        state.prepare_write(destination)?;

        if !state.index().contains(source, member) {
            return Ok(false);
        }
        if source == destination {
            return Ok(true);
        }
        state.log(&Record::new(
            Operation::Set(SetOp::Move),
            source,
            member,
            destination,
        ))?;
        Ok(true)
    }

    /// Members present in any of `keys`, in byte order.
    pub fn sunion(&self, keys: &[&[u8]]) -> CoreResult<Vec<Vec<u8>>> {
        self.combine("sunion", keys, |acc, next| acc.extend(next))
    }

    /// Members of the first key absent from every other key.
    pub fn sdiff(&self, keys: &[&[u8]]) -> CoreResult<Vec<Vec<u8>>> {
        self.combine("sdiff", keys, |acc, next| {
            acc.retain(|member| !next.contains(member));
        })
    }

    /// Members present in every one of `keys`.
    pub fn sinter(&self, keys: &[&[u8]]) -> CoreResult<Vec<Vec<u8>>> {
        self.combine("sinter", keys, |acc, next| {
            acc.retain(|member| next.contains(member));
        })
    }

    fn combine(
        &self,
        command: &'static str,
        keys: &[&[u8]],
        mut fold: impl FnMut(&mut BTreeSet<Vec<u8>>, BTreeSet<Vec<u8>>),
    ) -> CoreResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        require_args(command, keys)?;
        keys.iter().try_for_each(|key| check_key(key))?;

        let state = self.inner().sets.read();
        let mut acc = live_members(&state, keys[0]);
        for key in &keys[1..] {
            fold(&mut acc, live_members(&state, key));
        }
        Ok(acc.into_iter().collect())
    }

    /// Deletes the set. Returns false if it did not exist.
    pub fn sclear(&self, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().sets.write();
        state.prepare_write(key)?;
        if !state.is_live_key(key) {
            return Ok(false);
        }
        state.log(&Record::new(Operation::Set(SetOp::Clear), key, "", ""))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CoreError;
    use crate::types::Category;
    use crate::Database;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn owned(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn add_remove_members() {
        let db = db();
        assert_eq!(db.sadd(b"s", &[&b"b"[..], &b"a"[..], &b"b"[..]]).unwrap(), 2);
        assert_eq!(db.sadd(b"s", &[&b"a"[..]]).unwrap(), 0);
        assert_eq!(db.scard(b"s").unwrap(), 2);
        assert!(db.sismember(b"s", b"a").unwrap());
        assert_eq!(db.smembers(b"s").unwrap(), owned(&["a", "b"]));

        assert_eq!(db.srem(b"s", &[&b"a"[..], &b"zz"[..]]).unwrap(), 1);
        assert!(!db.sismember(b"s", b"a").unwrap());
        assert!(matches!(
            db.sadd(b"s", &[]).unwrap_err(),
            CoreError::WrongNumberOfArgs { command: "sadd" }
        ));
    }

    #[test]
    fn spop_takes_smallest_members() {
        let db = db();
        db.sadd(b"s", &[&b"c"[..], &b"a"[..], &b"b"[..]]).unwrap();
        assert_eq!(db.spop(b"s", 2).unwrap(), owned(&["a", "b"]));
        assert_eq!(db.spop(b"s", 5).unwrap(), owned(&["c"]));
        assert!(db.spop(b"s", 1).unwrap().is_empty());
        assert_eq!(db.scard(b"s").unwrap(), 0);
    }

    #[test]
    fn smove_between_sets() {
        let db = db();
        db.sadd(b"src", &[&b"m"[..], &b"n"[..]]).unwrap();
        assert!(db.smove(b"src", b"dst", b"m").unwrap());
        assert!(!db.smove(b"src", b"dst", b"m").unwrap());
        assert!(db.smove(b"src", b"src", b"n").unwrap());

        assert_eq!(db.smembers(b"src").unwrap(), owned(&["n"]));
        assert_eq!(db.smembers(b"dst").unwrap(), owned(&["m"]));
        assert!(matches!(
            db.smove(b"src", b"", b"n").unwrap_err(),
            CoreError::EmptyKey
        ));
    }

    #[test]
    fn algebra() {
        let db = db();
        db.sadd(b"x", &[&b"1"[..], &b"2"[..], &b"3"[..]]).unwrap();
        db.sadd(b"y", &[&b"2"[..], &b"3"[..], &b"4"[..]]).unwrap();
        let keys: &[&[u8]] = &[b"x", b"y"];

        assert_eq!(db.sunion(keys).unwrap(), owned(&["1", "2", "3", "4"]));
        assert_eq!(db.sinter(keys).unwrap(), owned(&["2", "3"]));
        assert_eq!(db.sdiff(keys).unwrap(), owned(&["1"]));
        assert_eq!(db.sinter(&[&b"x"[..], &b"missing"[..]]).unwrap(), owned(&[]));
        assert!(matches!(
            db.sunion(&[]).unwrap_err(),
            CoreError::WrongNumberOfArgs { command: "sunion" }
        ));
    }

    #[test]
    fn random_members_stay_in_place() {
        let db = db();
        assert!(db.srand_member(b"s", 3).unwrap().is_empty());
        db.sadd(b"s", &[&b"a"[..], &b"b"[..], &b"c"[..]]).unwrap();

        let mut picked = db.srand_member(b"s", 2).unwrap();
        picked.sort();
        picked.dedup();
        assert_eq!(picked.len(), 2);
        assert!(picked.iter().all(|m| db.sismember(b"s", m).unwrap()));

        let mut everything = db.srand_member(b"s", 10).unwrap();
        everything.sort();
        assert_eq!(everything, owned(&["a", "b", "c"]));

        let repeated = db.srand_member(b"s", -7).unwrap();
        assert_eq!(repeated.len(), 7);
        assert!(repeated.iter().all(|m| db.sismember(b"s", m).unwrap()));
        assert!(db.srand_member(b"s", 0).unwrap().is_empty());
        assert_eq!(db.scard(b"s").unwrap(), 3);
    }

    #[test]
    fn key_existence() {
        let db = db();
        assert!(!db.skey_exists(b"s").unwrap());
        db.sadd(b"s", &[&b"a"[..]]).unwrap();
        assert!(db.skey_exists(b"s").unwrap());
        db.srem(b"s", &[&b"a"[..]]).unwrap();
        assert!(!db.skey_exists(b"s").unwrap());

        db.sadd(b"s", &[&b"a"[..]]).unwrap();
        db.expire_at(Category::Set, b"s", 1).unwrap();
        assert!(!db.skey_exists(b"s").unwrap());
    }

    #[test]
    fn emptied_set_forgets_its_deadline() {
        let db = db();
        db.sadd(b"s", &[&b"a"[..]]).unwrap();
        db.sadd(b"t", &[&b"b"[..]]).unwrap();
        let later = crate::types::now_secs() + 1000;
        db.expire_at(Category::Set, b"s", later).unwrap();
        db.expire_at(Category::Set, b"t", later).unwrap();

        db.srem(b"s", &[&b"a"[..]]).unwrap();
        db.sadd(b"s", &[&b"c"[..]]).unwrap();
        assert_eq!(db.ttl(Category::Set, b"s").unwrap(), None);

        db.spop(b"t", 1).unwrap();
        db.sadd(b"t", &[&b"d"[..]]).unwrap();
        assert_eq!(db.ttl(Category::Set, b"t").unwrap(), None);

        db.sadd(b"u", &[&b"e"[..]]).unwrap();
        db.expire_at(Category::Set, b"u", later).unwrap();
        assert!(db.smove(b"u", b"v", b"e").unwrap());
        db.sadd(b"u", &[&b"f"[..]]).unwrap();
        assert_eq!(db.ttl(Category::Set, b"u").unwrap(), None);
    }

    #[test]
    fn clear_and_expiry() {
        let db = db();
        db.sadd(b"s", &[&b"a"[..]]).unwrap();
        assert!(db.sclear(b"s").unwrap());
        assert!(!db.sclear(b"s").unwrap());

        db.sadd(b"s", &[&b"a"[..]]).unwrap();
        db.expire_at(Category::Set, b"s", 1).unwrap();
        assert!(!db.sismember(b"s", b"a").unwrap());
        assert_eq!(db.sadd(b"s", &[&b"a"[..]]).unwrap(), 1);
        assert_eq!(db.ttl(Category::Set, b"s").unwrap(), None);
    }
}
