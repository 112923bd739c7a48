//! Reopen and crash-recovery tests against real directories.

use opendb_core::{Category, Config, CoreError, Database};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn small_segments() -> Config {
    Config::default().max_segment_size(256)
}

/// The highest-numbered main segment of `category`, which is the active one.
fn active_segment(dir: &Path, category: Category) -> PathBuf {
    let suffix = format!(".data.{}", category.suffix());
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(&suffix))
        })
        .collect();
    paths.sort();
    paths.pop().expect("no segment for category")
}

#[test]
fn every_category_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.set(b"s", b"value").unwrap();
        db.rpush(b"l", &[&b"a"[..], &b"b"[..]]).unwrap();
        db.hset(b"h", b"f", b"v").unwrap();
        db.sadd(b"set", &[&b"m"[..]]).unwrap();
        db.zadd(b"z", b"m", 4.5).unwrap();
        db.close().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.get(b"s").unwrap(), Some(b"value".to_vec()));
    assert_eq!(db.lrange(b"l", 0, -1).unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
    assert_eq!(db.hget(b"h", b"f").unwrap(), Some(b"v".to_vec()));
    assert!(db.sismember(b"set", b"m").unwrap());
    assert_eq!(db.zscore(b"z", b"m").unwrap(), Some(4.5));
}

#[test]
fn last_write_wins_across_rotation_and_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open_with_config(dir.path(), small_segments()).unwrap();
        for round in 0..50u32 {
            db.set(b"counter", round.to_string().as_bytes()).unwrap();
        }
        db.delete(b"gone").unwrap();
        db.set(b"gone", b"x").unwrap();
        db.delete(b"gone").unwrap();
        assert!(db.segment_count(Category::String).unwrap() > 1);
    }

    let db = Database::open_with_config(dir.path(), small_segments()).unwrap();
    assert_eq!(db.get(b"counter").unwrap(), Some(b"49".to_vec()));
    assert_eq!(db.get(b"gone").unwrap(), None);
}

#[test]
fn replay_is_idempotent() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.lpush(b"l", &[&b"a"[..]]).unwrap();
        db.rpush(b"l", &[&b"c"[..]]).unwrap();
        db.linsert(b"l", true, b"c", b"b").unwrap();
        db.hmset(b"h", &[(&b"x"[..], &b"1"[..]), (&b"y"[..], &b"2"[..])])
            .unwrap();
        db.hdel(b"h", &[&b"x"[..]]).unwrap();
    }

    let snapshot = |db: &Database| {
        (
            db.lrange(b"l", 0, -1).unwrap(),
            db.hgetall(b"h").unwrap(),
        )
    };

    let first = {
        let db = Database::open(dir.path()).unwrap();
        snapshot(&db)
    };
    let second = {
        let db = Database::open(dir.path()).unwrap();
        snapshot(&db)
    };

    assert_eq!(first, second);
    assert_eq!(first.0, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(first.1, vec![(b"y".to_vec(), b"2".to_vec())]);
}

#[test]
fn torn_tail_is_truncated_and_writes_resume() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.set(b"a", b"1").unwrap();
        db.set(b"b", b"2").unwrap();
    }

    let path = active_segment(dir.path(), Category::String);
    let intact = fs::metadata(&path).unwrap().len();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; 7]).unwrap();
    drop(file);

    {
        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);
        db.set(b"c", b"3").unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.get(b"c").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn deadlines_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.set(b"stale", b"v").unwrap();
        db.expire_at(Category::String, b"stale", 1).unwrap();
        db.hset(b"fresh", b"f", b"v").unwrap();
        db.expire_at(Category::Hash, b"fresh", u64::MAX / 2).unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.get(b"stale").unwrap(), None);
    assert_eq!(db.hget(b"fresh", b"f").unwrap(), Some(b"v".to_vec()));
    assert!(db.ttl(Category::Hash, b"fresh").unwrap().is_some());
}

#[test]
fn emptied_key_deadline_stays_gone_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.hset(b"h", b"f", b"v").unwrap();
        db.expire_at(Category::Hash, b"h", u64::MAX / 2).unwrap();
        db.hdel(b"h", &[&b"f"[..]]).unwrap();
        db.hset(b"h", b"g", b"w").unwrap();
        assert_eq!(db.ttl(Category::Hash, b"h").unwrap(), None);
    }

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.ttl(Category::Hash, b"h").unwrap(), None);
    assert_eq!(db.hget(b"h", b"g").unwrap(), Some(b"w".to_vec()));
}

#[test]
fn second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let _db = Database::open(dir.path()).unwrap();
    assert!(matches!(
        Database::open(dir.path()).unwrap_err(),
        CoreError::DatabaseLocked
    ));
}

#[test]
fn close_releases_the_directory() {
    let dir = TempDir::new().unwrap();
    let first = Database::open(dir.path()).unwrap();
    first.set(b"k", b"v").unwrap();
    first.close().unwrap();

    let second = Database::open(dir.path()).unwrap();
    assert_eq!(second.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert!(matches!(
        first.get(b"k").unwrap_err(),
        CoreError::DatabaseClosed
    ));
    drop(first);
    second.set(b"k", b"w").unwrap();
    assert_eq!(second.get(b"k").unwrap(), Some(b"w".to_vec()));
}

fn quiet() -> Config {
    Config::default().compaction_interval(Duration::ZERO)
}

/// Runs `command` on list `l` seeded with `seed`, then cuts the log at
/// every byte the command wrote and reopens. Each cut must replay to the
/// list before the command or after it, and must take a push on top.
fn assert_list_command_is_atomic(seed: &[&[u8]], command: impl Fn(&Database)) {
    let dir = TempDir::new().unwrap();
    let before = {
        let db = Database::open_with_config(dir.path(), quiet()).unwrap();
        db.rpush(b"l", seed).unwrap();
        db.lrange(b"l", 0, -1).unwrap()
    };
    let path = active_segment(dir.path(), Category::List);
    let start = fs::metadata(&path).unwrap().len() as usize;

    let after = {
        let db = Database::open_with_config(dir.path(), quiet()).unwrap();
        command(&db);
        db.lrange(b"l", 0, -1).unwrap()
    };
    assert_ne!(before, after);
    let full = fs::read(&path).unwrap();
    assert!(full.len() > start);

    for cut in start..=full.len() {
        fs::write(&path, &full[..cut]).unwrap();
        let db = Database::open_with_config(dir.path(), quiet()).unwrap();
        let seen = db.lrange(b"l", 0, -1).unwrap();
        assert!(
            seen == before || seen == after,
            "cut at byte {cut} replayed {seen:?}"
        );
        if cut == start {
            assert_eq!(seen, before);
        }
        if cut == full.len() {
            assert_eq!(seen, after);
        }

        db.rpush(b"l", &[&b"next"[..]]).unwrap();
        let mut expected = seen.clone();
        expected.push(b"next".to_vec());
        assert_eq!(db.lrange(b"l", 0, -1).unwrap(), expected);
        assert_eq!(db.llen(b"l").unwrap(), expected.len());
    }
}

#[test]
fn linsert_is_atomic_across_a_crash() {
    assert_list_command_is_atomic(&[&b"a"[..], &b"b"[..], &b"c"[..]], |db| {
        assert_eq!(db.linsert(b"l", true, b"b", b"z").unwrap(), Some(4));
    });
}

#[test]
fn lrem_is_atomic_across_a_crash() {
    let seed = [&b"a"[..], &b"x"[..], &b"b"[..], &b"x"[..], &b"c"[..]];
    assert_list_command_is_atomic(&seed, |db| {
        assert_eq!(db.lrem(b"l", 0, b"x").unwrap(), 2);
    });
}

#[test]
fn ltrim_is_atomic_across_a_crash() {
    let seed = [&b"a"[..], &b"b"[..], &b"c"[..], &b"d"[..], &b"e"[..]];
    assert_list_command_is_atomic(&seed, |db| db.ltrim(b"l", 1, -2).unwrap());
}

#[test]
fn raw_log_replays_in_write_order() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open_with_config(dir.path(), small_segments()).unwrap();
        for i in 0..30u32 {
            db.sadd(b"s", &[i.to_string().as_bytes()]).unwrap();
        }
    }

    let db = Database::open_with_config(dir.path(), small_segments()).unwrap();
    let mut members = Vec::new();
    let stats = db
        .replay_category(Category::Set, |record, _| members.push(record.value.clone()))
        .unwrap();

    assert_eq!(stats.records, 30);
    assert!(stats.segments > 1);
    let expected: Vec<Vec<u8>> = (0..30u32).map(|i| i.to_string().into_bytes()).collect();
    assert_eq!(members, expected);
}
