//! Snapshot persistence.
//!
//! A snapshot is the `bincode` encoding of the cache's live entries. Entry
//! expirations are monotonic [`Instant`]s in memory, which mean nothing to
//! another process, so they are written as wall-clock Unix nanoseconds and
//! converted back on load. Entries whose wall-clock expiry has passed by the
//! time a snapshot is read are skipped.
//!
//! Snapshots are a convenience for warm restarts, not a durability guarantee.

use crate::cache::Cache;
use crate::error::Result;
use crate::storage::Entry;
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// On-disk form of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry<V> {
    value: V,
    /// Wall-clock expiry in nanoseconds since the Unix epoch
    expires_at: Option<u64>,
}

/// On-disk form of a whole cache.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot<V> {
    entries: HashMap<String, SnapshotEntry<V>>,
}

/// Pairs "now" on both clocks so instants can be translated.
#[derive(Clone, Copy)]
struct Clocks {
    mono: Instant,
    wall: SystemTime,
}

impl Clocks {
    fn now() -> Self {
        Self {
            mono: Instant::now(),
            wall: SystemTime::now(),
        }
    }

    fn to_unix_nanos(self, at: Instant) -> Option<u64> {
        let wall = match at.checked_duration_since(self.mono) {
            Some(ahead) => self.wall.checked_add(ahead)?,
            None => self.wall.checked_sub(self.mono.duration_since(at))?,
        };
        let since_epoch = wall.duration_since(UNIX_EPOCH).ok()?;
        u64::try_from(since_epoch.as_nanos()).ok()
    }

    /// Returns None if `nanos` is not in the future.
    fn from_unix_nanos(self, nanos: u64) -> Option<Instant> {
        let wall = UNIX_EPOCH.checked_add(Duration::from_nanos(nanos))?;
        let ahead = wall.duration_since(self.wall).ok().filter(|d| !d.is_zero())?;
        self.mono.checked_add(ahead)
    }
}

/// Encodes `items` as a snapshot into `writer`.
///
/// Entries without a representable wall-clock expiry are written as never
/// expiring.
pub fn write_snapshot<V, W>(items: &HashMap<String, Entry<V>>, writer: W) -> Result<()>
where
    V: Serialize,
    W: Write,
{
    #[derive(Serialize)]
    struct SnapshotRef<'a, V> {
        entries: HashMap<&'a str, SnapshotEntryRef<'a, V>>,
    }

    #[derive(Serialize)]
    struct SnapshotEntryRef<'a, V> {
        value: &'a V,
        expires_at: Option<u64>,
    }

    let clocks = Clocks::now();
    let snapshot = SnapshotRef {
        entries: items
            .iter()
            .map(|(key, entry)| {
                let expires_at = entry.expires_at.and_then(|at| clocks.to_unix_nanos(at));
                (
                    key.as_str(),
                    SnapshotEntryRef {
                        value: &entry.value,
                        expires_at,
                    },
                )
            })
            .collect(),
    };

    bincode::serialize_into(writer, &snapshot)?;
    Ok(())
}

/// Decodes a snapshot from `reader`, dropping entries that have expired.
///
/// The payload is read fully before decoding, so a corrupt length prefix
/// surfaces as an error instead of a huge allocation.
pub fn read_snapshot<V, R>(mut reader: R) -> Result<HashMap<String, Entry<V>>>
where
    V: DeserializeOwned,
    R: Read,
{
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    decode_snapshot(&buf)
}

/// Decodes a snapshot held in memory, dropping entries that have expired.
pub fn decode_snapshot<V>(buf: &[u8]) -> Result<HashMap<String, Entry<V>>>
where
    V: DeserializeOwned,
{
    let snapshot: Snapshot<V> = bincode::deserialize(buf)?;
    let clocks = Clocks::now();

    let total = snapshot.entries.len();
    let items: HashMap<String, Entry<V>> = snapshot
        .entries
        .into_iter()
        .filter_map(|(key, entry)| match entry.expires_at {
            None => Some((key, Entry::new(entry.value))),
            Some(nanos) => clocks
                .from_unix_nanos(nanos)
                .map(|at| (key, Entry::with_expiration(entry.value, Some(at)))),
        })
        .collect();

    debug!(
        entries = items.len(),
        skipped = total - items.len(),
        "Snapshot decoded"
    );
    Ok(items)
}

impl<V> Cache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Writes every live entry to `writer`.
    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        let items = self.items();
        write_snapshot(&items, writer)?;
        debug!(entries = items.len(), "Snapshot saved");
        Ok(())
    }

    /// Writes every live entry to the file at `path`, replacing it.
    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer)?;
        writer.flush()?;
        debug!(path = %path.display(), "Snapshot file written");
        Ok(())
    }

    /// Encodes every live entry into a buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut writer = BytesMut::new().writer();
        self.save(&mut writer)?;
        Ok(writer.into_inner().freeze())
    }

    /// Loads a snapshot from `reader`.
    ///
    /// Keys that already hold a live entry keep it. Returns the number of
    /// entries inserted.
    pub fn load<R: Read>(&self, reader: R) -> Result<usize> {
        let items = read_snapshot(reader)?;
        Ok(self.restore(items))
    }

    /// Loads a snapshot from the file at `path`.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        self.load(reader)
    }

    /// Loads a snapshot from an in-memory buffer.
    pub fn load_bytes(&self, buf: &[u8]) -> Result<usize> {
        let items = decode_snapshot(buf)?;
        Ok(self.restore(items))
    }

    fn restore(&self, items: HashMap<String, Entry<V>>) -> usize {
        let inserted = self.merge(items);
        debug!(inserted = inserted, "Snapshot loaded");
        inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::storage::Ttl;

    #[test]
    fn test_clock_translation() {
        let clocks = Clocks::now();
        let at = clocks.mono + Duration::from_secs(30);

        let nanos = clocks.to_unix_nanos(at).unwrap();
        let back = clocks.from_unix_nanos(nanos).unwrap();
        let drift = if back > at { back - at } else { at - back };
        assert!(drift < Duration::from_millis(1));

        let past = clocks.to_unix_nanos(clocks.mono).unwrap();
        assert!(clocks.from_unix_nanos(past).is_none());
    }

    #[test]
    fn test_bytes_round_trip_keeps_expiration() {
        let cache: Cache<String> = Cache::builder().shards(4).build();
        cache.set("forever", "a".to_string(), Ttl::Never);
        cache.set("later", "b".to_string(), Ttl::After(Duration::from_secs(60)));

        let bytes = cache.to_bytes().unwrap();

        let restored: Cache<String> = Cache::builder().build();
        assert_eq!(restored.load_bytes(&bytes).unwrap(), 2);

        assert_eq!(
            restored.get_with_expiration("forever"),
            Some(("a".to_string(), None))
        );
        let (value, expires_at) = restored.get_with_expiration("later").unwrap();
        assert_eq!(value, "b");
        let remaining = expires_at.unwrap() - Instant::now();
        assert!(remaining > Duration::from_secs(58) && remaining <= Duration::from_secs(60));
    }

    #[test]
    fn test_expired_entries_are_not_saved_or_loaded() {
        let mut items = HashMap::new();
        items.insert("gone".to_string(), Entry::with_ttl(1u32, Duration::from_millis(5)));
        items.insert("kept".to_string(), Entry::new(2u32));

        let mut buf = Vec::new();
        write_snapshot(&items, &mut buf).unwrap();
        std::thread::sleep(Duration::from_millis(15));

        let decoded: HashMap<String, Entry<u32>> = decode_snapshot(&buf).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded["kept"].value, 2);
    }

    #[test]
    fn test_load_keeps_live_keys() {
        let source: Cache<i32> = Cache::builder().build();
        source.set("a", 1, Ttl::Never);
        source.set("b", 2, Ttl::Never);
        let bytes = source.to_bytes().unwrap();

        let target: Cache<i32> = Cache::builder().build();
        target.set("a", 100, Ttl::Never);
        assert_eq!(target.load_bytes(&bytes).unwrap(), 1);
        assert_eq!(target.get("a"), Some(100));
        assert_eq!(target.get("b"), Some(2));
    }

    #[test]
    fn test_malformed_payload() {
        let cache: Cache<String> = Cache::builder().build();
        let err = cache.load_bytes(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
        assert_eq!(cache.item_count(), 0);
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let numbers: Cache<u64> = Cache::builder().build();
        numbers.set("n", u64::MAX, Ttl::Never);
        let bytes = numbers.to_bytes().unwrap();

        // A u64 payload cannot be read back as a string.
        let strings: Cache<String> = Cache::builder().build();
        assert!(matches!(
            strings.load_bytes(&bytes),
            Err(CacheError::Serialization(_))
        ));
    }
}
