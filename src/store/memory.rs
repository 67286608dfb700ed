//! In-memory storage backend
//!
//! Same contract as the SQLite backend, held in process memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{
    Collection, CollectionUsage, IndexQuery, RawRecord, Result, SCHEMA_VERSION, StoragePort,
    StoreUsage, Value,
};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct StoredRecord {
    indexes: Vec<(&'static str, Value)>,
    body: Vec<u8>,
    charge: u64,
}

#[derive(Debug, Default)]
struct State {
    schema_version: u32,
    collections: HashMap<Collection, BTreeMap<Value, StoredRecord>>,
    sequences: HashMap<Collection, i64>,
}

impl State {
    fn total_bytes(&self) -> u64 {
        self.collections
            .values()
            .flat_map(|records| records.values())
            .map(|r| r.charge)
            .sum()
    }
}

/// Storage backend held entirely in memory
pub struct MemoryStore {
    state: Mutex<State>,
    quota_bytes: u64,
    corrupted: AtomicBool,
}

impl MemoryStore {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            state: Mutex::new(State {
                schema_version: SCHEMA_VERSION,
                ..State::default()
            }),
            quota_bytes,
            corrupted: AtomicBool::new(false),
        }
    }

    /// Start from a given on-"disk" schema version
    pub fn with_schema_version(self, version: u32) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.schema_version = version;
        }
        self
    }

    /// Make every subsequent operation report corruption until repaired
    pub fn mark_corrupted(&self) {
        self.corrupted.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        if self.corrupted.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupted("memory store marked corrupted".into()));
        }
        self.state
            .lock()
            .map_err(|e| StoreError::Database(format!("Lock poisoned: {}", e)))
    }
}

impl StoragePort for MemoryStore {
    fn schema_version(&self) -> Result<u32> {
        Ok(self.lock()?.schema_version)
    }

    fn migrate(&self, from: u32, to: u32) -> Result<()> {
        let mut state = self.lock()?;
        log::debug!("Migrating memory store v{} -> v{}", from, to);
        state.schema_version = to;
        Ok(())
    }

    fn check_integrity(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    fn repair(&self) -> Result<()> {
        self.corrupted.store(false, Ordering::SeqCst);
        let mut state = self.lock()?;
        if state.schema_version > SCHEMA_VERSION {
            *state = State {
                schema_version: SCHEMA_VERSION,
                ..State::default()
            };
        }
        Ok(())
    }

    fn put(&self, collection: Collection, record: RawRecord) -> Result<()> {
        let mut state = self.lock()?;
        let existing = state
            .collections
            .get(&collection)
            .and_then(|records| records.get(&record.key))
            .map(|r| r.charge)
            .unwrap_or(0);
        let projected = state.total_bytes() - existing + record.size_bytes();
        if projected > self.quota_bytes {
            return Err(StoreError::QuotaExceeded {
                needed: projected - self.quota_bytes,
                quota: self.quota_bytes,
            });
        }

        state.collections.entry(collection).or_default().insert(
            record.key,
            StoredRecord {
                charge: record.charge,
                indexes: record.indexes,
                body: record.body,
            },
        );
        Ok(())
    }

    fn get(&self, collection: Collection, key: &Value) -> Result<Option<Vec<u8>>> {
        let state = self.lock()?;
        Ok(state
            .collections
            .get(&collection)
            .and_then(|records| records.get(key))
            .map(|r| r.body.clone()))
    }

    fn get_all_by_index(
        &self,
        collection: Collection,
        index: &str,
        query: &IndexQuery,
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>> {
        let state = self.lock()?;
        let Some(records) = state.collections.get(&collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<(&Value, &Value, &StoredRecord)> = records
            .iter()
            .filter_map(|(key, record)| {
                record
                    .indexes
                    .iter()
                    .find(|(name, _)| *name == index)
                    .map(|(_, value)| (value, key, record))
            })
            .filter(|(value, _, _)| query.matches(value))
            .collect();
        matched.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        Ok(matched
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, _, record)| record.body.clone())
            .collect())
    }

    fn delete(&self, collection: Collection, key: &Value) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state
            .collections
            .get_mut(&collection)
            .and_then(|records| records.remove(key))
            .is_some())
    }

    fn clear(&self, collection: Collection) -> Result<usize> {
        let mut state = self.lock()?;
        Ok(state
            .collections
            .remove(&collection)
            .map(|records| records.len())
            .unwrap_or(0))
    }

    fn next_id(&self, collection: Collection) -> Result<i64> {
        let mut state = self.lock()?;
        let next = state.sequences.entry(collection).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    fn usage(&self) -> Result<StoreUsage> {
        let state = self.lock()?;
        let mut usage = StoreUsage {
            quota_bytes: self.quota_bytes,
            ..StoreUsage::default()
        };
        for (collection, records) in &state.collections {
            let bytes: u64 = records.values().map(|r| r.charge).sum();
            usage.collections.insert(
                *collection,
                CollectionUsage {
                    records: records.len(),
                    bytes,
                },
            );
            usage.total_bytes += bytes;
        }
        Ok(usage)
    }

    fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }
}
