//! Snapshot save/load through files and buffers.

use chronocache::persist::{read_snapshot, write_snapshot};
use chronocache::{Cache, CacheError, Ttl};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    user: String,
    roles: Vec<String>,
    visits: u32,
}

fn session(user: &str, visits: u32) -> Session {
    Session {
        user: user.to_string(),
        roles: vec!["reader".to_string()],
        visits,
    }
}

#[test]
fn save_and_load_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sessions.bin");

    let cache: Cache<Session> = Cache::builder().shards(8).build();
    cache.set("alice", session("alice", 3), Ttl::Never);
    cache.set("bob", session("bob", 1), Ttl::After(Duration::from_secs(600)));
    cache.set("gone", session("gone", 0), Ttl::After(Duration::from_millis(5)));
    std::thread::sleep(Duration::from_millis(15));

    cache.save_file(&path)?;

    let restored: Cache<Session> = Cache::builder().shards(2).build();
    assert_eq!(restored.load_file(&path)?, 2);
    assert_eq!(restored.get("alice"), Some(session("alice", 3)));
    assert_eq!(restored.get("gone"), None);

    let (_, expires_at) = restored.get_with_expiration("bob").unwrap();
    assert!(expires_at.is_some());
    Ok(())
}

#[test]
fn restore_with_from_items() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("counters.bin");

    let cache: Cache<u64> = Cache::builder().build();
    for i in 0..50 {
        cache.set(format!("counter:{}", i), i, Ttl::Never);
    }
    write_snapshot(&cache.items(), File::create(&path)?)?;

    let items = read_snapshot::<u64, _>(File::open(&path)?)?;
    let restored = Cache::from_items(Duration::ZERO, Duration::ZERO, items);
    assert_eq!(restored.item_count(), 50);
    assert_eq!(restored.increment("counter:7", 1)?, 8);
    Ok(())
}

#[test]
fn load_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let cache: Cache<u64> = Cache::builder().build();

    let err = cache.load_file(dir.path().join("absent.bin")).unwrap_err();
    assert!(matches!(err, CacheError::Io(_)));
}

#[test]
fn truncated_file_is_serialization_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("truncated.bin");

    let cache: Cache<Session> = Cache::builder().build();
    cache.set("alice", session("alice", 3), Ttl::Never);
    let bytes = cache.to_bytes()?;
    std::fs::write(&path, &bytes[..bytes.len() / 2])?;

    let target: Cache<Session> = Cache::builder().build();
    let err = target.load_file(&path).unwrap_err();
    assert!(matches!(err, CacheError::Serialization(_)));
    assert_eq!(target.item_count(), 0);
    Ok(())
}
