//! Durable outbound sync queue
//!
//! Items are ordered by priority (lower first), then by enqueue order. The
//! `priority` index breaks ties by key, and keys come from a monotonic
//! sequence, so enqueue order falls out of the store ordering.

use std::collections::HashSet;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{Collection, IndexQuery, ObjectStore, SourceKey, SyncKind, SyncQueueItem, Value};

type Result<T> = std::result::Result<T, StoreError>;

/// What `resolve` did with an item
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Delivered and removed
    Removed,
    /// Failed; kept for another attempt
    Retrying { attempts: u32 },
    /// Failed for the last time and removed; report it
    Exhausted(SyncQueueItem),
    /// No such item (already resolved)
    Missing,
}

pub struct SyncQueue {
    store: Arc<ObjectStore>,
    clock: Clock,
    max_attempts: u32,
}

impl SyncQueue {
    pub fn new(store: Arc<ObjectStore>, clock: Clock, max_attempts: u32) -> Self {
        Self {
            store,
            clock,
            max_attempts,
        }
    }

    /// Persist a new item with zero attempts
    pub fn enqueue(
        &self,
        kind: SyncKind,
        payload: serde_json::Value,
        priority: u8,
    ) -> Result<SyncQueueItem> {
        self.push(kind, payload, priority, None)
    }

    /// Enqueue a snapshot of the record stored under `source`
    pub fn enqueue_for(
        &self,
        kind: SyncKind,
        payload: serde_json::Value,
        source: SourceKey,
    ) -> Result<SyncQueueItem> {
        self.push(kind, payload, kind.default_priority(), Some(source))
    }

    fn push(
        &self,
        kind: SyncKind,
        payload: serde_json::Value,
        priority: u8,
        source: Option<SourceKey>,
    ) -> Result<SyncQueueItem> {
        let item = SyncQueueItem {
            id: self.store.next_id(Collection::SyncQueue)?,
            kind,
            payload,
            source,
            priority,
            enqueued_at: (self.clock)(),
            attempts: 0,
            max_attempts: self.max_attempts,
        };
        self.store.put(&item)?;
        log::debug!("Enqueued {} item {} (priority {})", kind, item.id, priority);
        Ok(item)
    }

    /// Up to `limit` items in delivery order, without claiming them
    pub fn next_batch(&self, limit: usize) -> Result<Vec<SyncQueueItem>> {
        self.store
            .first_by_index("priority", &IndexQuery::All, Some(limit))
    }

    /// Record a delivery outcome
    pub fn resolve(&self, id: i64, success: bool) -> Result<Resolution> {
        let key = Value::Int(id);
        let Some(mut item) = self.store.get::<SyncQueueItem>(&key)? else {
            return Ok(Resolution::Missing);
        };

        if success {
            self.store.delete::<SyncQueueItem>(&key)?;
            return Ok(Resolution::Removed);
        }

        item.attempts = (item.attempts + 1).min(item.max_attempts);
        if item.is_exhausted() {
            self.store.delete::<SyncQueueItem>(&key)?;
            log::warn!(
                "Giving up on {} item {} after {} attempts",
                item.kind,
                id,
                item.attempts
            );
            return Ok(Resolution::Exhausted(item));
        }

        self.store.put(&item)?;
        Ok(Resolution::Retrying {
            attempts: item.attempts,
        })
    }

    /// Drop an item the remote refused as malformed
    pub fn reject(&self, id: i64) -> Result<Option<SyncQueueItem>> {
        let key = Value::Int(id);
        let item = self.store.get::<SyncQueueItem>(&key)?;
        if item.is_some() {
            self.store.delete::<SyncQueueItem>(&key)?;
        }
        Ok(item)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.usage()?.collection(Collection::SyncQueue).records)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every item in delivery order
    pub fn list(&self) -> Result<Vec<SyncQueueItem>> {
        self.store.get_all_by_index("priority", &IndexQuery::All)
    }

    pub fn clear(&self) -> Result<usize> {
        self.store.clear(Collection::SyncQueue)
    }

    /// Source keys of every queued item of `kind`
    pub fn sources(&self, kind: SyncKind) -> Result<HashSet<Value>> {
        let items: Vec<SyncQueueItem> = self
            .store
            .get_all_by_index("kind", &IndexQuery::eq(kind.as_str()))?;
        Ok(items
            .into_iter()
            .filter_map(|item| item.source.map(Value::from))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn queue(max_attempts: u32) -> SyncQueue {
        let store = Arc::new(ObjectStore::open(Arc::new(MemoryStore::new(1 << 20))).unwrap());
        SyncQueue::new(store, system_clock(), max_attempts)
    }

    #[test]
    fn test_enqueue_starts_at_zero_attempts() {
        let q = queue(3);
        let item = q.enqueue(SyncKind::Profile, json!({ "name": "a" }), 2).unwrap();
        assert_eq!(item.attempts, 0);
        assert_eq!(item.max_attempts, 3);
        assert_eq!(q.len().unwrap(), 1);
    }

    #[test]
    fn test_next_batch_orders_by_priority_then_enqueue_order() {
        let q = queue(3);
        let a = q.enqueue(SyncKind::Analytics, json!(1), 5).unwrap();
        let b = q.enqueue(SyncKind::Progress, json!(2), 1).unwrap();
        let c = q.enqueue(SyncKind::Favorites, json!(3), 2).unwrap();
        let d = q.enqueue(SyncKind::Progress, json!(4), 1).unwrap();

        let ids: Vec<i64> = q.next_batch(10).unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![b.id, d.id, c.id, a.id]);

        let first_two: Vec<i64> = q.next_batch(2).unwrap().iter().map(|i| i.id).collect();
        assert_eq!(first_two, vec![b.id, d.id]);
    }

    #[test]
    fn test_next_batch_is_a_peek() {
        let q = queue(3);
        q.enqueue(SyncKind::Progress, json!(1), 1).unwrap();
        q.next_batch(5).unwrap();
        assert_eq!(q.next_batch(5).unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_success_twice_is_noop() {
        let q = queue(3);
        let item = q.enqueue(SyncKind::Progress, json!(1), 1).unwrap();

        assert_eq!(q.resolve(item.id, true).unwrap(), Resolution::Removed);
        assert_eq!(q.resolve(item.id, true).unwrap(), Resolution::Missing);
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn test_failures_exhaust_at_max_attempts() {
        let q = queue(3);
        let item = q.enqueue(SyncKind::Progress, json!({ "k": 1 }), 1).unwrap();

        assert_eq!(
            q.resolve(item.id, false).unwrap(),
            Resolution::Retrying { attempts: 1 }
        );
        assert_eq!(
            q.resolve(item.id, false).unwrap(),
            Resolution::Retrying { attempts: 2 }
        );
        match q.resolve(item.id, false).unwrap() {
            Resolution::Exhausted(gone) => {
                assert_eq!(gone.attempts, gone.max_attempts);
                assert_eq!(gone.payload, json!({ "k": 1 }));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn test_attempts_never_exceed_max() {
        let q = queue(1);
        let item = q.enqueue(SyncKind::Progress, json!(1), 1).unwrap();
        assert!(matches!(
            q.resolve(item.id, false).unwrap(),
            Resolution::Exhausted(ref i) if i.attempts == 1
        ));
    }

    #[test]
    fn test_reject_removes() {
        let q = queue(3);
        let item = q.enqueue(SyncKind::Favorites, json!(1), 2).unwrap();
        assert_eq!(q.reject(item.id).unwrap().map(|i| i.id), Some(item.id));
        assert!(q.reject(item.id).unwrap().is_none());
    }

    #[test]
    fn test_sources_by_kind() {
        let q = queue(3);
        q.enqueue_for(SyncKind::Progress, json!(1), SourceKey::Id(7))
            .unwrap();
        q.enqueue_for(SyncKind::Favorites, json!(2), SourceKey::Name("f".into()))
            .unwrap();

        let sources = q.sources(SyncKind::Progress).unwrap();
        assert!(sources.contains(&Value::Int(7)));
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn test_enqueue_for_uses_kind_priority() {
        let q = queue(3);
        let item = q
            .enqueue_for(SyncKind::Analytics, json!(1), SourceKey::Id(1))
            .unwrap();
        assert_eq!(item.priority, 5);
    }

    #[test]
    fn test_clear() {
        let q = queue(3);
        q.enqueue(SyncKind::Progress, json!(1), 1).unwrap();
        q.enqueue(SyncKind::Progress, json!(2), 1).unwrap();
        assert_eq!(q.clear().unwrap(), 2);
        assert_eq!(q.list().unwrap().len(), 0);
    }
}
