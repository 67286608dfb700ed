//! Content cache over the object store
//!
//! Reads refresh `last_accessed_at`; writes that hit the shared quota evict
//! cache entries (highest priority number first, then least recently
//! accessed) until the write fits. Eviction never touches any other
//! collection.

pub mod key;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::events::{EngineEvent, EventBus};
use crate::store::{CacheEntry, Collection, IndexQuery, ObjectStore, Value};

pub use key::{canonical_key, canonical_url, manifest_version};

type Result<T> = std::result::Result<T, StoreError>;

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub cache_bytes: u64,
    /// Bytes used by every collection against the shared quota
    pub total_bytes: u64,
    pub quota_bytes: u64,
}

pub struct ContentCache {
    store: Arc<ObjectStore>,
    clock: Clock,
    events: EventBus,
}

impl ContentCache {
    pub fn new(store: Arc<ObjectStore>, clock: Clock, events: EventBus) -> Self {
        Self {
            store,
            clock,
            events,
        }
    }

    /// Read an entry and record the access
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(mut entry) = self.store.get::<CacheEntry>(&Value::from(key))? else {
            log::debug!("Cache miss: {}", key);
            return Ok(None);
        };
        log::debug!("Cache hit: {}", key);

        entry.last_accessed_at = (self.clock)();
        if let Err(e) = self.store.put(&entry) {
            // The read still succeeded; a stale access time only skews eviction order
            log::debug!("Failed to record access for {}: {}", key, e);
        }
        Ok(Some(entry))
    }

    /// Read an entry without touching its access time
    pub fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.store.get::<CacheEntry>(&Value::from(key))
    }

    /// Store an entry, evicting other entries until it fits.
    ///
    /// Fails with `QuotaExceeded` only once no evictable entry is left.
    pub fn put(&self, entry: &CacheEntry) -> Result<()> {
        let mut reported = false;
        loop {
            match self.store.put(entry) {
                Ok(()) => {
                    log::debug!("Cached {} ({} bytes)", entry.key, entry.size_bytes);
                    return Ok(());
                }
                Err(StoreError::QuotaExceeded { needed, quota }) => {
                    if !reported {
                        self.events
                            .emit(EngineEvent::QuotaExceeded { needed, quota });
                        reported = true;
                    }
                    let freed = self.evict(needed, Some(&entry.key))?;
                    if freed == 0 {
                        log::warn!(
                            "Cannot cache {}: nothing left to evict ({} bytes over quota)",
                            entry.key,
                            needed
                        );
                        return Err(StoreError::QuotaExceeded { needed, quota });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Evict entries until at least `needed` bytes are free; returns bytes freed
    pub fn make_room(&self, needed: u64) -> Result<u64> {
        self.evict(needed, None)
    }

    fn evict(&self, needed: u64, keep: Option<&str>) -> Result<u64> {
        let mut candidates: Vec<CacheEntry> = self
            .store
            .get_all_by_index("priority", &IndexQuery::All)?
            .into_iter()
            .filter(|e: &CacheEntry| Some(e.key.as_str()) != keep)
            .collect();
        candidates.sort_by_key(|e| (Reverse(e.priority), e.last_accessed_at, e.key.clone()));

        let mut freed = 0u64;
        for entry in candidates {
            if freed >= needed {
                break;
            }
            if self.store.delete::<CacheEntry>(&Value::from(entry.key.as_str()))? {
                log::warn!(
                    "Evicted {} (priority {}, last accessed {})",
                    entry.key,
                    entry.priority,
                    entry.last_accessed_at
                );
                freed += entry.size_bytes;
            }
        }
        Ok(freed)
    }

    /// Delete entries not accessed since `horizon`
    pub fn sweep_expired(&self, horizon: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<CacheEntry> = self
            .store
            .get_all_by_index("last_accessed", &IndexQuery::below(horizon))?;

        let mut removed = 0;
        for entry in expired {
            if self.store.delete::<CacheEntry>(&Value::from(entry.key.as_str()))? {
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("Swept {} expired cache entries", removed);
        }
        Ok(removed)
    }

    /// All entries, least recently accessed first
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        self.store
            .get_all_by_index("last_accessed", &IndexQuery::All)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let usage = self.store.usage()?;
        let cached = usage.collection(Collection::CachedContent);
        Ok(CacheStats {
            entries: cached.records,
            cache_bytes: cached.bytes,
            total_bytes: usage.total_bytes,
            quota_bytes: usage.quota_bytes,
        })
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.store.clear(Collection::CachedContent)?;
        log::info!("Cleared {} cache entries", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, ProgressRecord};
    use chrono::{Duration, TimeZone};

    struct Fixture {
        cache: ContentCache,
        store: Arc<ObjectStore>,
        clock: ManualClock,
        events: EventBus,
    }

    fn fixture(quota: u64) -> Fixture {
        let store = Arc::new(ObjectStore::open(Arc::new(MemoryStore::new(quota))).unwrap());
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let events = EventBus::new();
        Fixture {
            cache: ContentCache::new(store.clone(), clock.as_clock(), events.clone()),
            store,
            clock,
            events,
        }
    }

    fn entry(f: &Fixture, key: &str, size: usize, priority: u8) -> CacheEntry {
        CacheEntry::new(key, vec![b'x'; size], None, 200, priority, f.clock.now())
    }

    #[test]
    fn test_get_updates_last_accessed() {
        let f = fixture(1 << 20);
        f.cache.put(&entry(&f, "a", 10, 1)).unwrap();

        f.clock.advance(Duration::minutes(5));
        let read = f.cache.get("a").unwrap().unwrap();
        assert_eq!(read.last_accessed_at, f.clock.now());

        let stored = f.cache.peek("a").unwrap().unwrap();
        assert_eq!(stored.last_accessed_at, f.clock.now());
        assert!(stored.created_at < stored.last_accessed_at);
    }

    #[test]
    fn test_get_missing_is_none() {
        let f = fixture(1 << 20);
        assert!(f.cache.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_quota_evicts_lowest_priority_then_oldest() {
        // Room for three 400-byte payloads
        let f = fixture(1400);

        f.cache.put(&entry(&f, "https://x/1", 400, 1)).unwrap();
        f.clock.advance(Duration::seconds(1));
        f.cache.put(&entry(&f, "https://x/2", 400, 3)).unwrap();
        f.clock.advance(Duration::seconds(1));
        f.cache.put(&entry(&f, "https://x/3", 400, 3)).unwrap();
        f.clock.advance(Duration::seconds(1));

        let mut events = f.events.subscribe();
        f.cache.put(&entry(&f, "https://x/4", 400, 0)).unwrap();

        // Priority 3 goes first, and of those the oldest access
        assert!(f.cache.peek("https://x/2").unwrap().is_none());
        assert!(f.cache.peek("https://x/3").unwrap().is_some());
        assert!(f.cache.peek("https://x/1").unwrap().is_some());
        assert!(f.cache.peek("https://x/4").unwrap().is_some());
        assert!(matches!(
            events.try_recv(),
            Ok(EngineEvent::QuotaExceeded { .. })
        ));
    }

    #[test]
    fn test_eviction_never_touches_other_collections() {
        let f = fixture(2048);
        let progress = ProgressRecord {
            id: 1,
            section: "intro".to_string(),
            payload: serde_json::json!({ "note": "y".repeat(900) }),
            timestamp: f.clock.now(),
            synced: false,
        };
        f.store.put(&progress).unwrap();
        f.cache.put(&entry(&f, "small", 100, 3)).unwrap();

        let result = f.cache.put(&entry(&f, "huge", 1500, 1));
        assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));

        let kept: Option<ProgressRecord> = f.store.get(&Value::Int(1)).unwrap();
        assert!(kept.is_some());
        assert!(f.cache.peek("small").unwrap().is_none());
    }

    #[test]
    fn test_quota_charges_payload_size_not_encoding() {
        // Base64 inflates each body past 1200 bytes; the quota counts 1000
        let f = fixture(2000);
        f.cache.put(&entry(&f, "a", 1000, 1)).unwrap();
        f.cache.put(&entry(&f, "b", 1000, 1)).unwrap();

        let stats = f.cache.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.cache_bytes, 2000);
    }

    #[test]
    fn test_make_room_frees_requested_bytes() {
        let f = fixture(1 << 20);
        f.cache.put(&entry(&f, "a", 100, 2)).unwrap();
        f.cache.put(&entry(&f, "b", 100, 2)).unwrap();

        let freed = f.cache.make_room(1).unwrap();
        assert!(freed > 0);
        assert_eq!(f.cache.stats().unwrap().entries, 1);
    }

    #[test]
    fn test_sweep_expired_uses_last_access() {
        let f = fixture(1 << 20);
        f.cache.put(&entry(&f, "old", 10, 1)).unwrap();
        f.cache.put(&entry(&f, "fresh", 10, 1)).unwrap();

        f.clock.advance(Duration::days(40));
        f.cache.get("fresh").unwrap();

        let removed = f
            .cache
            .sweep_expired(f.clock.now() - Duration::days(30))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(f.cache.peek("old").unwrap().is_none());
        assert!(f.cache.peek("fresh").unwrap().is_some());
    }

    #[test]
    fn test_stats_and_clear() {
        let f = fixture(1 << 20);
        f.cache.put(&entry(&f, "a", 10, 1)).unwrap();
        f.cache.put(&entry(&f, "b", 10, 1)).unwrap();

        let stats = f.cache.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.quota_bytes, 1 << 20);

        assert_eq!(f.cache.clear().unwrap(), 2);
        assert_eq!(f.cache.stats().unwrap().entries, 0);
    }
}
