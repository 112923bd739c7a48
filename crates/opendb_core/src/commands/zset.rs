//! Sorted set commands.

use super::{require_args, resolve_range};
use crate::database::{check_key, Database};
use crate::error::{CoreError, CoreResult};
use crate::index::{Score, ZSetIndex};
use crate::keyspace::KeyspaceState;
use crate::operation::{Operation, ZSetOp};
use crate::segment::Record;

type ZSetState = KeyspaceState<ZSetIndex>;

fn log_add(state: &mut ZSetState, key: &[u8], member: &[u8], score: f64) -> CoreResult<()> {
    if score.is_nan() {
        return Err(CoreError::wrong_value_type("score is not a number"));
    }
    state.log(&Record::new(
        Operation::ZSet(ZSetOp::Add),
        key,
        member,
        Score(score).encode(),
    ))?;
    Ok(())
}

fn live_score(state: &ZSetState, key: &[u8], member: &[u8]) -> Option<f64> {
    if !state.is_live_key(key) {
        return None;
    }
    state.index().score(key, member)
}

/// Members at ascending positions `[start, stop]`, reversed on request.
fn ranked(
    state: &ZSetState,
    key: &[u8],
    start: i64,
    stop: i64,
    reverse: bool,
) -> Vec<(Vec<u8>, f64)> {
    if !state.is_live_key(key) {
        return Vec::new();
    }
    let index = state.index();
    let Some((first, last)) = resolve_range(index.len(key), start, stop) else {
        return Vec::new();
    };
    let take = last - first + 1;
    let owned = |(member, score): (&[u8], f64)| (member.to_vec(), score);
    if reverse {
        index.ascending(key).rev().skip(first).take(take).map(owned).collect()
    } else {
        index.ascending(key).skip(first).take(take).map(owned).collect()
    }
}

impl Database {
    /// Adds `member` with `score`, or rescores it. Returns true if new.
    ///
    /// # Errors
    ///
    /// `WrongValueType` if `score` is NaN.
    pub fn zadd(&self, key: &[u8], member: &[u8], score: f64) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().zsets.write();
        state.prepare_write(key)?;
        let created = state.index().score(key, member).is_none();
        log_add(&mut state, key, member, score)?;
        Ok(created)
    }

    /// Score of `member` in `key`.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> CoreResult<Option<f64>> {
        self.ensure_open()?;
        check_key(key)?;
        Ok(live_score(&self.inner().zsets.read(), key, member))
    }

    /// Number of members in `key`.
    pub fn zcard(&self, key: &[u8]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().zsets.read();
        Ok(if state.is_live_key(key) {
            state.index().len(key)
        } else {
            0
        })
    }

    /// Position of `member` by ascending score.
    pub fn zrank(&self, key: &[u8], member: &[u8]) -> CoreResult<Option<usize>> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().zsets.read();
        Ok(state
            .is_live_key(key)
            .then(|| state.index().rank(key, member))
            .flatten())
    }

    /// Position of `member` by descending score.
    pub fn zrev_rank(&self, key: &[u8], member: &[u8]) -> CoreResult<Option<usize>> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().zsets.read();
        Ok(state
            .is_live_key(key)
            .then(|| state.index().rev_rank(key, member))
            .flatten())
    }

    /// Adds `delta` to the score of `member`, which starts at zero when
    /// missing. Returns the new score.
    pub fn zincr_by(&self, key: &[u8], member: &[u8], delta: f64) -> CoreResult<f64> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().zsets.write();
        state.prepare_write(key)?;
        let score = state.index().score(key, member).unwrap_or(0.0) + delta;
        log_add(&mut state, key, member, score)?;
        Ok(score)
    }

    /// Members at positions `[start, stop]` by ascending score.
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> CoreResult<Vec<Vec<u8>>> {
        Ok(self
            .zrange_with_scores(key, start, stop)?
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }

    /// Members at positions `[start, stop]` by descending score.
    pub fn zrev_range(&self, key: &[u8], start: i64, stop: i64) -> CoreResult<Vec<Vec<u8>>> {
        Ok(self
            .zrev_range_with_scores(key, start, stop)?
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }

    /// Like [`Database::zrange`] but with scores.
    pub fn zrange_with_scores(
        &self,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> CoreResult<Vec<(Vec<u8>, f64)>> {
        self.ensure_open()?;
        check_key(key)?;
        Ok(ranked(&self.inner().zsets.read(), key, start, stop, false))
    }

    /// Like [`Database::zrev_range`] but with scores.
    pub fn zrev_range_with_scores(
        &self,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> CoreResult<Vec<(Vec<u8>, f64)>> {
        self.ensure_open()?;
        check_key(key)?;
        Ok(ranked(&self.inner().zsets.read(), key, start, stop, true))
    }

    /// Member and score at `rank`, counted from the lowest score.
    pub fn zget_by_rank(&self, key: &[u8], rank: usize) -> CoreResult<Option<(Vec<u8>, f64)>> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().zsets.read();
        if !state.is_live_key(key) {
            return Ok(None);
        }
        let entry = state
            .index()
            .ascending(key)
            .nth(rank)
            .map(|(member, score)| (member.to_vec(), score));
        Ok(entry)
    }

    /// Member and score at `rank`, counted from the highest score.
    pub fn zrev_get_by_rank(
        &self,
        key: &[u8],
        rank: usize,
    ) -> CoreResult<Option<(Vec<u8>, f64)>> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().zsets.read();
        if !state.is_live_key(key) {
            return Ok(None);
        }
        let entry = state
            .index()
            .ascending(key)
            .rev()
            .nth(rank)
            .map(|(member, score)| (member.to_vec(), score));
        Ok(entry)
    }

    /// Members with `min <= score <= max`, ascending.
    pub fn zscore_range(&self, key: &[u8], min: f64, max: f64) -> CoreResult<Vec<(Vec<u8>, f64)>> {
        self.ensure_open()?;
        check_key(key)?;
        let state = self.inner().zsets.read();
        if !state.is_live_key(key) {
            return Ok(Vec::new());
        }
        Ok(state
            .index()
            .score_range(key, min, max)
            .map(|(member, score)| (member.to_vec(), score))
            .collect())
    }

    /// Members with `min <= score <= max`, descending. Bounds come high
    /// first.
    pub fn zrev_score_range(
        &self,
        key: &[u8],
        max: f64,
        min: f64,
    ) -> CoreResult<Vec<(Vec<u8>, f64)>> {
        let mut members = self.zscore_range(key, min, max)?;
        members.reverse();
        Ok(members)
    }

    /// True if `key` holds a live sorted set.
    pub fn zkey_exists(&self, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        Ok(self.inner().zsets.read().is_live_key(key))
    }

    /// Removes members. Returns how many were present.
    pub fn zrem(&self, key: &[u8], members: &[&[u8]]) -> CoreResult<usize> {
        self.ensure_open()?;
        check_key(key)?;
        require_args("zrem", members)?;
        let mut state = self.inner().zsets.write();
        state.prepare_write(key)?;

        let mut removed = 0;
        for member in members {
            if state.index().score(key, member).is_none() {
                continue;
            }
            state.log(&Record::new(Operation::ZSet(ZSetOp::Remove), key, *member, ""))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Deletes the sorted set. Returns false if it did not exist.
    pub fn zclear(&self, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        check_key(key)?;
        let mut state = self.inner().zsets.write();
        state.prepare_write(key)?;
        if !state.is_live_key(key) {
            return Ok(false);
        }
        state.log(&Record::new(Operation::ZSet(ZSetOp::Clear), key, "", ""))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CoreError;
    use crate::types::Category;
    use crate::Database;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.zadd(b"z", b"carol", 3.0).unwrap();
        db.zadd(b"z", b"alice", 1.0).unwrap();
        db.zadd(b"z", b"bob", 2.0).unwrap();
        db
    }

    fn owned(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn scores_and_ranks() {
        let db = db();
        assert!(!db.zadd(b"z", b"alice", 1.5).unwrap());
        assert_eq!(db.zscore(b"z", b"alice").unwrap(), Some(1.5));
        assert_eq!(db.zcard(b"z").unwrap(), 3);
        assert_eq!(db.zrank(b"z", b"carol").unwrap(), Some(2));
        assert_eq!(db.zrev_rank(b"z", b"carol").unwrap(), Some(0));
        assert_eq!(db.zrank(b"z", b"dave").unwrap(), None);
    }

    #[test]
    fn ranges() {
        let db = db();
        assert_eq!(db.zrange(b"z", 0, -1).unwrap(), owned(&["alice", "bob", "carol"]));
        assert_eq!(db.zrange(b"z", 1, 1).unwrap(), owned(&["bob"]));
        assert_eq!(db.zrev_range(b"z", 0, 1).unwrap(), owned(&["carol", "bob"]));
        assert_eq!(
            db.zrange_with_scores(b"z", -1, -1).unwrap(),
            vec![(b"carol".to_vec(), 3.0)]
        );
        assert_eq!(
            db.zscore_range(b"z", 2.0, 3.0).unwrap(),
            vec![(b"bob".to_vec(), 2.0), (b"carol".to_vec(), 3.0)]
        );
        assert!(db.zrange(b"z", 5, 9).unwrap().is_empty());
    }

    #[test]
    fn reverse_views() {
        let db = db();
        assert_eq!(
            db.zrev_range_with_scores(b"z", 0, 1).unwrap(),
            vec![(b"carol".to_vec(), 3.0), (b"bob".to_vec(), 2.0)]
        );
        assert_eq!(
            db.zrev_score_range(b"z", 2.5, 1.0).unwrap(),
            vec![(b"bob".to_vec(), 2.0), (b"alice".to_vec(), 1.0)]
        );
        assert!(db.zrev_score_range(b"z", 1.0, 2.5).unwrap().is_empty());
        assert!(db.zrev_range_with_scores(b"missing", 0, -1).unwrap().is_empty());
    }

    #[test]
    fn lookup_by_rank() {
        let db = db();
        assert_eq!(db.zget_by_rank(b"z", 0).unwrap(), Some((b"alice".to_vec(), 1.0)));
        assert_eq!(db.zget_by_rank(b"z", 2).unwrap(), Some((b"carol".to_vec(), 3.0)));
        assert_eq!(db.zget_by_rank(b"z", 3).unwrap(), None);
        assert_eq!(db.zrev_get_by_rank(b"z", 0).unwrap(), Some((b"carol".to_vec(), 3.0)));
        assert_eq!(db.zrev_get_by_rank(b"z", 2).unwrap(), Some((b"alice".to_vec(), 1.0)));
        assert_eq!(db.zget_by_rank(b"missing", 0).unwrap(), None);
    }

    #[test]
    fn key_existence_and_deadlines() {
        let db = db();
        assert!(db.zkey_exists(b"z").unwrap());
        assert!(!db.zkey_exists(b"missing").unwrap());

        let later = crate::types::now_secs() + 1000;
        db.expire_at(Category::SortedSet, b"z", later).unwrap();
        db.zrem(b"z", &[&b"alice"[..], &b"bob"[..], &b"carol"[..]]).unwrap();
        assert!(!db.zkey_exists(b"z").unwrap());

        db.zadd(b"z", b"dave", 4.0).unwrap();
        assert_eq!(db.ttl(Category::SortedSet, b"z").unwrap(), None);
        db.expire_at(Category::SortedSet, b"z", 1).unwrap();
        assert!(!db.zkey_exists(b"z").unwrap());
    }

    #[test]
    fn incr_by_and_nan() {
        let db = db();
        assert_eq!(db.zincr_by(b"z", b"alice", 5.0).unwrap(), 6.0);
        assert_eq!(db.zincr_by(b"z", b"new", 0.5).unwrap(), 0.5);
        assert_eq!(db.zrange(b"z", 0, 0).unwrap(), owned(&["new"]));
        assert!(matches!(
            db.zadd(b"z", b"x", f64::NAN).unwrap_err(),
            CoreError::WrongValueType { .. }
        ));
    }

    #[test]
    fn remove_clear_and_expiry() {
        let db = db();
        assert_eq!(db.zrem(b"z", &[&b"bob"[..], &b"nobody"[..]]).unwrap(), 1);
        assert_eq!(db.zrange(b"z", 0, -1).unwrap(), owned(&["alice", "carol"]));

        db.expire_at(Category::SortedSet, b"z", 1).unwrap();
        assert_eq!(db.zcard(b"z").unwrap(), 0);
        assert!(!db.zclear(b"z").unwrap());
        assert!(db.zadd(b"z", b"alice", 1.0).unwrap());
        assert!(db.zclear(b"z").unwrap());
    }
}
