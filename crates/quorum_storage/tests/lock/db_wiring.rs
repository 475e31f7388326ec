#![forbid(unsafe_code)]

use quorum_contracts::dao::LockRecord;
use quorum_contracts::UnixMillis;
use quorum_storage::{DaoStore, LockRepo};

fn lock(holder: &str, token: &str, expires_at: u64) -> LockRecord {
    LockRecord {
        name: "2.0.0".to_string(),
        holder: holder.to_string(),
        token: token.to_string(),
        expires_at: UnixMillis(expires_at),
    }
}

fn stores() -> Vec<(&'static str, Box<dyn LockRepo>)> {
    vec![
        ("memory", Box::new(DaoStore::new_in_memory())),
        ("sqlite", Box::new(DaoStore::open_sqlite_in_memory().unwrap())),
    ]
}

#[test]
fn at_db_lock_01_only_one_holder_while_lease_is_live() {
    for (name, mut s) in stores() {
        assert!(s
            .try_acquire_lock(&lock("host-1", "t1", 10_000), UnixMillis(1_000))
            .unwrap());
        assert!(
            !s.try_acquire_lock(&lock("host-2", "t2", 11_000), UnixMillis(2_000))
                .unwrap(),
            "{name}"
        );
        assert_eq!(s.lock_record("2.0.0").unwrap().unwrap().holder, "host-1");
    }
}

#[test]
fn at_db_lock_02_expired_lease_is_reclaimable() {
    for (name, mut s) in stores() {
        assert!(s
            .try_acquire_lock(&lock("host-1", "t1", 10_000), UnixMillis(1_000))
            .unwrap());
        assert!(
            s.try_acquire_lock(&lock("host-2", "t2", 20_000), UnixMillis(10_001))
                .unwrap(),
            "{name}"
        );
        let held = s.lock_record("2.0.0").unwrap().unwrap();
        assert_eq!(held.holder, "host-2");
        assert_eq!(held.token, "t2");
        // The previous holder can no longer renew or release.
        assert!(!s
            .renew_lock("2.0.0", "host-1", "t1", UnixMillis(30_000))
            .unwrap());
        assert!(!s.release_lock("2.0.0", "host-1", "t1").unwrap());
    }
}

#[test]
fn at_db_lock_03_release_requires_holder_and_token() {
    for (name, mut s) in stores() {
        assert!(s
            .try_acquire_lock(&lock("host-1", "t1", 10_000), UnixMillis(1_000))
            .unwrap());
        assert!(!s.release_lock("2.0.0", "host-1", "other").unwrap(), "{name}");
        assert!(!s.release_lock("2.0.0", "host-9", "t1").unwrap(), "{name}");
        assert!(s.release_lock("2.0.0", "host-1", "t1").unwrap(), "{name}");
        assert!(s.lock_record("2.0.0").unwrap().is_none());
    }
}

#[test]
fn at_db_lock_04_renew_extends_lease() {
    for (name, mut s) in stores() {
        assert!(s
            .try_acquire_lock(&lock("host-1", "t1", 10_000), UnixMillis(1_000))
            .unwrap());
        assert!(s
            .renew_lock("2.0.0", "host-1", "t1", UnixMillis(40_000))
            .unwrap());
        assert!(
            !s.try_acquire_lock(&lock("host-2", "t2", 50_000), UnixMillis(20_000))
                .unwrap(),
            "{name}"
        );
    }
}

#[test]
fn at_db_lock_05_two_connections_share_one_lock_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dao.sqlite");
    let mut first = DaoStore::open_sqlite(&path).unwrap();
    let mut second = DaoStore::open_sqlite(&path).unwrap();
    assert!(first
        .try_acquire_lock(&lock("host-1", "t1", 10_000), UnixMillis(1_000))
        .unwrap());
    assert!(!second
        .try_acquire_lock(&lock("host-2", "t2", 10_000), UnixMillis(1_000))
        .unwrap());
    assert!(first.release_lock("2.0.0", "host-1", "t1").unwrap());
    assert!(second
        .try_acquire_lock(&lock("host-2", "t2", 10_000), UnixMillis(1_000))
        .unwrap());
}
