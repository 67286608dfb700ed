//! Persistent multi-collection object store
//!
//! Records live in five named collections, each with a declared set of
//! secondary indexes. The backend sits behind [`StoragePort`] so the engine
//! runs against SQLite in production and against [`MemoryStore`] in tests.
//! [`ObjectStore`] is the typed facade: it runs schema migrations before the
//! first operation and blocks every operation once the backend reports
//! corruption, until [`ObjectStore::repair`] succeeds.

pub mod memory;
pub mod records;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use records::{
    AnalyticsEvent, CacheEntry, FavoriteRecord, ProgressRecord, SourceKey, SyncKind, SyncQueueItem,
};
pub use sqlite::SqliteStore;

/// Current schema version. Older stores are migrated up on open.
pub const SCHEMA_VERSION: u32 = 2;

pub type Result<T> = std::result::Result<T, StoreError>;

/// The named collections of the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Progress,
    Favorites,
    CachedContent,
    AnalyticsEvents,
    SyncQueue,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Progress,
        Collection::Favorites,
        Collection::CachedContent,
        Collection::AnalyticsEvents,
        Collection::SyncQueue,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Progress => "progress",
            Collection::Favorites => "favorites",
            Collection::CachedContent => "cached_content",
            Collection::AnalyticsEvents => "analytics_events",
            Collection::SyncQueue => "sync_queue",
        }
    }

    /// Declared secondary indexes
    pub fn indexes(&self) -> &'static [&'static str] {
        match self {
            Collection::Progress => &["timestamp", "section", "synced"],
            Collection::Favorites => &["timestamp", "type"],
            Collection::CachedContent => &["priority", "last_accessed"],
            Collection::AnalyticsEvents => &["timestamp", "type", "synced"],
            Collection::SyncQueue => &["priority", "kind", "enqueued_at"],
        }
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.indexes().contains(&index)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// A key or index value. Integers order before text, matching SQLite.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Int(v.timestamp_millis())
    }
}

/// Selection over one secondary index
#[derive(Debug, Clone, PartialEq)]
pub enum IndexQuery {
    All,
    Eq(Value),
    Range { lower: Bound<Value>, upper: Bound<Value> },
}

impl IndexQuery {
    pub fn eq(value: impl Into<Value>) -> Self {
        IndexQuery::Eq(value.into())
    }

    /// Everything strictly below `value`
    pub fn below(value: impl Into<Value>) -> Self {
        IndexQuery::Range {
            lower: Bound::Unbounded,
            upper: Bound::Excluded(value.into()),
        }
    }

    /// Everything at or above `value`
    pub fn at_least(value: impl Into<Value>) -> Self {
        IndexQuery::Range {
            lower: Bound::Included(value.into()),
            upper: Bound::Unbounded,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            IndexQuery::All => true,
            IndexQuery::Eq(v) => v == value,
            IndexQuery::Range { lower, upper } => {
                let above = match lower {
                    Bound::Included(l) => value >= l,
                    Bound::Excluded(l) => value > l,
                    Bound::Unbounded => true,
                };
                let beneath = match upper {
                    Bound::Included(u) => value <= u,
                    Bound::Excluded(u) => value < u,
                    Bound::Unbounded => true,
                };
                above && beneath
            }
        }
    }
}

/// An encoded record as the backend sees it
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub key: Value,
    pub indexes: Vec<(&'static str, Value)>,
    pub body: Vec<u8>,
    /// Bytes charged against the shared quota
    pub charge: u64,
}

impl RawRecord {
    pub fn encode<R: Record>(record: &R) -> Result<Self> {
        let body = serde_json::to_vec(record)?;
        Ok(Self {
            key: record.key(),
            indexes: record.index_values(),
            charge: record.quota_charge(body.len()),
            body,
        })
    }

    pub fn size_bytes(&self) -> u64 {
        self.charge
    }
}

/// Per-collection storage accounting
#[derive(Debug, Clone, Default)]
pub struct CollectionUsage {
    pub records: usize,
    pub bytes: u64,
}

/// Storage accounting across the shared quota
#[derive(Debug, Clone, Default)]
pub struct StoreUsage {
    pub collections: BTreeMap<Collection, CollectionUsage>,
    pub total_bytes: u64,
    pub quota_bytes: u64,
}

impl StoreUsage {
    pub fn collection(&self, collection: Collection) -> CollectionUsage {
        self.collections
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }
}

/// Storage backend contract.
///
/// Each call is atomic. A `put` that fails leaves the previous value intact;
/// `put` enforces the shared quota over the summed [`RawRecord::charge`]
/// of all collections. `get_all_by_index` orders by index value, then key.
pub trait StoragePort: Send + Sync {
    fn schema_version(&self) -> Result<u32>;

    /// Upgrade from `from` to `to`. Every step is idempotent.
    fn migrate(&self, from: u32, to: u32) -> Result<()>;

    /// `Err(StoreError::Corrupted)` when the backend fails its integrity check
    fn check_integrity(&self) -> Result<()>;

    /// Rebuild indexes; recreate the backend if it is beyond rebuilding
    fn repair(&self) -> Result<()>;

    fn put(&self, collection: Collection, record: RawRecord) -> Result<()>;

    fn get(&self, collection: Collection, key: &Value) -> Result<Option<Vec<u8>>>;

    fn get_all_by_index(
        &self,
        collection: Collection,
        index: &str,
        query: &IndexQuery,
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>>;

    fn delete(&self, collection: Collection, key: &Value) -> Result<bool>;

    fn clear(&self, collection: Collection) -> Result<usize>;

    /// Next value of the collection's monotonic id sequence
    fn next_id(&self, collection: Collection) -> Result<i64>;

    fn usage(&self) -> Result<StoreUsage>;

    fn quota_bytes(&self) -> u64;
}

/// A typed record stored in one collection
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn key(&self) -> Value;

    /// Values for every index the collection declares
    fn index_values(&self) -> Vec<(&'static str, Value)>;

    /// Bytes this record costs against the quota, given its encoded length
    fn quota_charge(&self, encoded_len: usize) -> u64 {
        encoded_len as u64
    }
}

/// Whether the store accepts operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreHealth {
    Ready,
    NeedsRepair(String),
}

/// Typed facade over a storage backend
pub struct ObjectStore {
    port: Arc<dyn StoragePort>,
    health: RwLock<StoreHealth>,
}

impl ObjectStore {
    /// Wrap a backend, migrating an older schema before anything else runs.
    ///
    /// A newer-than-known schema or a failed integrity check leaves the
    /// store in [`StoreHealth::NeedsRepair`] rather than failing the open.
    pub fn open(port: Arc<dyn StoragePort>) -> Result<Self> {
        let store = Self {
            port,
            health: RwLock::new(StoreHealth::Ready),
        };

        let found = match store.port.schema_version() {
            Ok(found) => found,
            Err(StoreError::Corrupted(reason)) => {
                log::warn!("Object store is unreadable: {}", reason);
                store.mark_needs_repair(reason);
                return Ok(store);
            }
            Err(e) => return Err(e),
        };
        if found < SCHEMA_VERSION {
            log::info!(
                "Object store schema v{} is older than v{}, migrating",
                found,
                SCHEMA_VERSION
            );
            store.port.migrate(found, SCHEMA_VERSION)?;
        } else if found > SCHEMA_VERSION {
            let err = StoreError::SchemaVersionMismatch {
                found,
                expected: SCHEMA_VERSION,
            };
            log::warn!("{}", err);
            store.mark_needs_repair(err.to_string());
            return Ok(store);
        }

        match store.port.check_integrity() {
            Ok(()) => {}
            Err(StoreError::Corrupted(reason)) => {
                log::warn!("Object store failed integrity check: {}", reason);
                store.mark_needs_repair(reason);
            }
            Err(e) => return Err(e),
        }

        Ok(store)
    }

    pub fn health(&self) -> StoreHealth {
        self.health
            .read()
            .map(|h| h.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Run the repair pass and unblock the store
    pub fn repair(&self) -> Result<()> {
        log::info!("Repairing object store");
        self.port.repair()?;
        let found = self.port.schema_version()?;
        if found < SCHEMA_VERSION {
            self.port.migrate(found, SCHEMA_VERSION)?;
        }
        self.port.check_integrity()?;
        self.set_health(StoreHealth::Ready);
        Ok(())
    }

    pub fn put<R: Record>(&self, record: &R) -> Result<()> {
        self.guard()?;
        let raw = RawRecord::encode(record)?;
        self.observe(self.port.put(R::COLLECTION, raw))
    }

    /// Look up a record; absence is `Ok(None)`
    pub fn get<R: Record>(&self, key: &Value) -> Result<Option<R>> {
        self.guard()?;
        match self.observe(self.port.get(R::COLLECTION, key))? {
            Some(body) => self.decode::<R>(&body).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_all_by_index<R: Record>(&self, index: &str, query: &IndexQuery) -> Result<Vec<R>> {
        self.first_by_index(index, query, None)
    }

    /// Like [`get_all_by_index`](Self::get_all_by_index), stopping after `limit` records
    pub fn first_by_index<R: Record>(
        &self,
        index: &str,
        query: &IndexQuery,
        limit: Option<usize>,
    ) -> Result<Vec<R>> {
        self.guard()?;
        if !R::COLLECTION.has_index(index) {
            return Err(StoreError::UnknownIndex {
                collection: R::COLLECTION.name(),
                index: index.to_string(),
            });
        }
        let bodies = self.observe(
            self.port
                .get_all_by_index(R::COLLECTION, index, query, limit),
        )?;
        bodies.iter().map(|b| self.decode::<R>(b)).collect()
    }

    /// Delete by key; `false` if nothing was stored under it
    pub fn delete<R: Record>(&self, key: &Value) -> Result<bool> {
        self.guard()?;
        self.observe(self.port.delete(R::COLLECTION, key))
    }

    pub fn clear(&self, collection: Collection) -> Result<usize> {
        self.guard()?;
        self.observe(self.port.clear(collection))
    }

    pub fn next_id(&self, collection: Collection) -> Result<i64> {
        self.guard()?;
        self.observe(self.port.next_id(collection))
    }

    pub fn usage(&self) -> Result<StoreUsage> {
        self.guard()?;
        self.observe(self.port.usage())
    }

    pub fn quota_bytes(&self) -> u64 {
        self.port.quota_bytes()
    }

    fn guard(&self) -> Result<()> {
        match self.health() {
            StoreHealth::Ready => Ok(()),
            StoreHealth::NeedsRepair(reason) => Err(StoreError::NeedsRepair(reason)),
        }
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(StoreError::Corrupted(ref reason)) = result {
            self.mark_needs_repair(reason.clone());
        }
        result
    }

    fn decode<R: Record>(&self, body: &[u8]) -> Result<R> {
        serde_json::from_slice(body).map_err(|e| {
            let reason = format!("undecodable {} record: {}", R::COLLECTION.name(), e);
            self.mark_needs_repair(reason.clone());
            StoreError::Corrupted(reason)
        })
    }

    fn mark_needs_repair(&self, reason: String) {
        self.set_health(StoreHealth::NeedsRepair(reason));
    }

    fn set_health(&self, health: StoreHealth) {
        match self.health.write() {
            Ok(mut guard) => *guard = health,
            Err(poisoned) => *poisoned.into_inner() = health,
        }
    }
}
