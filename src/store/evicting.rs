//! Evicting Store Wrapper
//!
//! Decorator adding TTL or max-entries bounding atop any store without
//! that store knowing about eviction. Values are framed with their
//! insertion time and key before delegation, so age and identity are
//! recoverable purely from what is read back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::ObjectStore;

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Envelope framing one stored value:
/// inserted_at (8) + key_len (4) + key + value
struct StoredObject {
    inserted_at_ms: u64,
    key: String,
    value: Bytes,
}

impl StoredObject {
    fn encode(key: &str, value: &Bytes) -> Bytes {
        let key_bytes = key.as_bytes();
        let mut buf = BytesMut::with_capacity(12 + key_bytes.len() + value.len());
        buf.put_u64_le(unix_millis());
        buf.put_u32_le(key_bytes.len() as u32);
        buf.put_slice(key_bytes);
        buf.put_slice(value);
        buf.freeze()
    }

    fn decode(raw: Bytes) -> StoreResult<StoredObject> {
        let (inserted_at_ms, key, header_len) = Self::decode_header(&raw)?;
        Ok(StoredObject {
            inserted_at_ms,
            key,
            value: raw.slice(header_len..),
        })
    }

    /// Decode only the envelope header; no copy of the value is made
    fn decode_header(raw: &Bytes) -> StoreResult<(u64, String, usize)> {
        let mut buf = raw.as_ref();
        if buf.remaining() < 12 {
            return Err(StoreError::Serialization("envelope truncated".into()));
        }
        let inserted_at_ms = buf.get_u64_le();
        let key_len = buf.get_u32_le() as usize;
        if buf.remaining() < key_len {
            return Err(StoreError::Serialization("envelope key truncated".into()));
        }
        let key = String::from_utf8(buf.copy_to_bytes(key_len).to_vec())
            .map_err(|e| StoreError::Serialization(format!("envelope key is not utf-8: {e}")))?;
        Ok((inserted_at_ms, key, 12 + key_len))
    }
}

/// Decorator bounding any store by TTL and/or entry count
///
/// The wrapper owns no storage of its own: eviction decisions read only
/// envelope headers, and every decoded value is dropped in the scope that
/// produced it, so nothing references an evicted value once the
/// underlying removal is confirmed.
pub struct EvictingStoreWrapper {
    inner: Arc<dyn ObjectStore>,
    entry_ttl: Option<Duration>,
    max_entries: Option<usize>,
}

impl EvictingStoreWrapper {
    pub fn new(
        inner: Arc<dyn ObjectStore>,
        entry_ttl: Option<Duration>,
        max_entries: Option<usize>,
    ) -> Self {
        Self {
            inner,
            entry_ttl,
            max_entries,
        }
    }

    /// Run one eviction pass and return the number of entries removed
    ///
    /// The key snapshot is taken once; entries removed concurrently by
    /// others are skipped silently. TTL bounding wins when both bounds
    /// are set, otherwise the oldest surplus beyond `max_entries` goes.
    pub fn expire(&self) -> StoreResult<usize> {
        let keys = self.inner.all_keys()?;
        let now = unix_millis();

        // Ages only; values never leave this loop
        let mut candidates: Vec<(u64, String)> = Vec::with_capacity(keys.len());
        for key in keys {
            match self.inner.retrieve(&key) {
                Ok(raw) => match StoredObject::decode_header(&raw) {
                    Ok((inserted_at_ms, _, _)) => candidates.push((inserted_at_ms, key)),
                    Err(err) => {
                        warn!(key = %key, error = %err, "skipping entry with malformed envelope")
                    }
                },
                Err(err) if err.is_does_not_exist() => continue,
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping unreadable entry during eviction")
                }
            }
        }

        let mut removed = 0;
        if let Some(ttl) = self.entry_ttl {
            let ttl_ms = ttl.as_millis() as u64;
            for (inserted_at_ms, key) in &candidates {
                if now.saturating_sub(*inserted_at_ms) >= ttl_ms {
                    removed += self.evict(key);
                }
            }
        } else if let Some(max) = self.max_entries {
            if candidates.len() > max {
                candidates.sort_unstable();
                let surplus = candidates.len() - max;
                for (_, key) in candidates.iter().take(surplus) {
                    removed += self.evict(key);
                }
            }
        }

        if removed > 0 {
            debug!(removed, "evicted entries");
        }
        Ok(removed)
    }

    /// Best-effort removal; the returned value is dropped on the spot and
    /// a concurrent removal counts as done
    fn evict(&self, key: &str) -> usize {
        match self.inner.remove(key) {
            Ok(_) => 1,
            Err(err) if err.is_does_not_exist() => 0,
            Err(err) => {
                warn!(key, error = %err, "eviction removal failed");
                0
            }
        }
    }
}

impl ObjectStore for EvictingStoreWrapper {
    fn open(&self) -> StoreResult<()> {
        self.inner.open()
    }

    fn close(&self) -> StoreResult<()> {
        self.inner.close()
    }

    fn store(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.inner.store(key, StoredObject::encode(key, &value))
    }

    fn retrieve(&self, key: &str) -> StoreResult<Bytes> {
        let raw = self.inner.retrieve(key)?;
        Ok(StoredObject::decode(raw)?.value)
    }

    fn remove(&self, key: &str) -> StoreResult<Bytes> {
        let raw = self.inner.remove(key)?;
        Ok(StoredObject::decode(raw)?.value)
    }

    fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    fn clear(&self) -> StoreResult<()> {
        self.inner.clear()
    }

    fn all_keys(&self) -> StoreResult<Vec<String>> {
        self.inner.all_keys()
    }

    fn retrieve_all(&self) -> StoreResult<HashMap<String, Bytes>> {
        let mut all = HashMap::new();
        for (key, raw) in self.inner.retrieve_all()? {
            all.insert(key, StoredObject::decode(raw)?.value);
        }
        Ok(all)
    }

    fn is_persistent(&self) -> bool {
        self.inner.is_persistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::thread;

    fn bounded_by_count(max: usize) -> (Arc<InMemoryStore>, EvictingStoreWrapper) {
        let inner = Arc::new(InMemoryStore::new());
        let wrapper = EvictingStoreWrapper::new(inner.clone(), None, Some(max));
        (inner, wrapper)
    }

    #[test]
    fn test_transparent_round_trip() {
        let (_, wrapper) = bounded_by_count(10);
        let value = Bytes::from(vec![1, 2, 3]);

        wrapper.store("key", value.clone()).unwrap();
        assert!(wrapper.contains("key"));
        assert_eq!(wrapper.retrieve("key").unwrap(), value);
        assert_eq!(wrapper.remove("key").unwrap(), value);
        assert!(!wrapper.contains("key"));
    }

    #[test]
    fn test_envelope_header_round_trip() {
        let value = Bytes::from_static(b"payload");
        let raw = StoredObject::encode("the-key", &value);

        let decoded = StoredObject::decode(raw).unwrap();
        assert_eq!(decoded.key, "the-key");
        assert_eq!(decoded.value, value);
        assert!(decoded.inserted_at_ms > 0);
    }

    #[test]
    fn test_count_bounding_scenario() {
        let (_, wrapper) = bounded_by_count(3);
        for key in ["1", "2", "3", "4"] {
            wrapper.store(key, Bytes::from(key.as_bytes().to_vec())).unwrap();
            // Distinct envelope timestamps keep insertion order observable
            thread::sleep(Duration::from_millis(5));
        }

        // Nothing goes until an expiry pass runs
        assert!(wrapper.contains("1"));

        let removed = wrapper.expire().unwrap();
        assert_eq!(removed, 1);

        let mut keys = wrapper.all_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_under_bound_expires_nothing() {
        let (_, wrapper) = bounded_by_count(5);
        wrapper.store("only", Bytes::from_static(b"v")).unwrap();
        assert_eq!(wrapper.expire().unwrap(), 0);
        assert!(wrapper.contains("only"));
    }

    #[test]
    fn test_ttl_bounding() {
        let inner = Arc::new(InMemoryStore::new());
        let wrapper =
            EvictingStoreWrapper::new(inner.clone(), Some(Duration::from_millis(30)), None);

        wrapper.store("short-lived", Bytes::from_static(b"v")).unwrap();
        assert_eq!(wrapper.expire().unwrap(), 0);
        assert!(wrapper.contains("short-lived"));

        thread::sleep(Duration::from_millis(60));
        assert_eq!(wrapper.expire().unwrap(), 1);
        assert!(!wrapper.contains("short-lived"));
    }

    #[test]
    fn test_concurrent_removal_is_not_an_error() {
        let (inner, wrapper) = bounded_by_count(1);
        wrapper.store("a", Bytes::from_static(b"a")).unwrap();
        wrapper.store("b", Bytes::from_static(b"b")).unwrap();
        wrapper.store("c", Bytes::from_static(b"c")).unwrap();

        // Another caller races the pass and empties the store
        inner.clear().unwrap();
        assert_eq!(wrapper.expire().unwrap(), 0);
    }

    #[test]
    fn test_eviction_releases_value_reference() {
        let (inner, wrapper) = bounded_by_count(1);
        wrapper.store("old", Bytes::from(vec![9; 32])).unwrap();
        thread::sleep(Duration::from_millis(5));
        wrapper.store("new", Bytes::from_static(b"n")).unwrap();

        // Hold a second handle to the envelope bytes the store keeps
        let envelope = inner.retrieve("old").unwrap();
        assert!(!envelope.is_unique());

        wrapper.expire().unwrap();

        // The store and the eviction pass both released their copies;
        // this handle is the only reference left
        assert!(envelope.is_unique());
        assert!(!wrapper.contains("old"));
        assert!(wrapper.contains("new"));
    }

    #[test]
    fn test_retrieve_all_unwraps_envelopes() {
        let (_, wrapper) = bounded_by_count(10);
        wrapper.store("x", Bytes::from_static(b"1")).unwrap();
        wrapper.store("y", Bytes::from_static(b"2")).unwrap();

        let all = wrapper.retrieve_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["x"].as_ref(), b"1");
        assert_eq!(all["y"].as_ref(), b"2");
    }
}
