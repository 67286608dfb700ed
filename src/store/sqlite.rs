//! SQLite storage backend
//!
//! All collections share one database file: a `records` table keyed by
//! (collection, key) and a `record_indexes` table holding one row per
//! declared index value. Keys and index values are stored without type
//! affinity so integers sort numerically and before text.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{
    Collection, CollectionUsage, IndexQuery, RawRecord, Result, SCHEMA_VERSION, StoragePort,
    StoreUsage, Value,
};
use crate::error::StoreError;

/// Schema steps; entry `i` upgrades a database from version `i` to `i + 1`.
const MIGRATIONS: [&str; SCHEMA_VERSION as usize] = [
    r#"
    CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        record_key BLOB NOT NULL,
        body BLOB NOT NULL,
        size_bytes INTEGER NOT NULL,
        PRIMARY KEY (collection, record_key)
    );

    CREATE TABLE IF NOT EXISTS record_indexes (
        collection TEXT NOT NULL,
        index_name TEXT NOT NULL,
        index_value BLOB NOT NULL,
        record_key BLOB NOT NULL,
        PRIMARY KEY (collection, index_name, record_key)
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_record_indexes_value
        ON record_indexes(collection, index_name, index_value, record_key);

    CREATE TABLE IF NOT EXISTS sequences (
        collection TEXT PRIMARY KEY NOT NULL,
        next_id INTEGER NOT NULL
    );
    "#,
];

/// SQLite-backed object store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    quota_bytes: u64,
}

impl SqliteStore {
    /// Open (or create) the database file at `db_path`
    pub fn open_at(db_path: &Path, quota_bytes: u64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("Failed to create data dir: {}", e)))?;
        }

        let conn = Self::connect(db_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
            quota_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(format!("Lock poisoned: {}", e)))
    }

    fn user_version(conn: &Connection) -> Result<u32> {
        let version: i64 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
        Ok(version as u32)
    }

    fn quick_check(conn: &Connection) -> Result<()> {
        let verdict: String = conn.query_row("PRAGMA quick_check", [], |r| r.get(0))?;
        if verdict == "ok" {
            Ok(())
        } else {
            Err(StoreError::Corrupted(verdict))
        }
    }

    /// Delete the database file and its journals
    fn nuke(db_path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut path = db_path.as_os_str().to_owned();
            path.push(suffix);
            let path = PathBuf::from(path);
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| {
                    StoreError::Io(format!("Failed to remove {}: {}", path.display(), e))
                })?;
            }
        }
        Ok(())
    }
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
    }
}

impl StoragePort for SqliteStore {
    fn schema_version(&self) -> Result<u32> {
        let conn = self.lock()?;
        Self::user_version(&conn)
    }

    fn migrate(&self, from: u32, to: u32) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for step in from..to.min(SCHEMA_VERSION) {
            log::info!("Applying object store migration v{} -> v{}", step, step + 1);
            tx.execute_batch(MIGRATIONS[step as usize])?;
        }
        tx.pragma_update(None, "user_version", to)?;
        tx.commit()?;
        Ok(())
    }

    fn check_integrity(&self) -> Result<()> {
        let conn = self.lock()?;
        Self::quick_check(&conn)
    }

    fn repair(&self) -> Result<()> {
        let mut conn = self.lock()?;

        let healthy = conn.execute_batch("REINDEX;").is_ok()
            && Self::quick_check(&conn).is_ok()
            && Self::user_version(&conn)
                .map(|v| v <= SCHEMA_VERSION)
                .unwrap_or(false);
        if healthy {
            log::info!("Rebuilt indexes for {}", self.db_path.display());
            return Ok(());
        }

        log::warn!(
            "Database at {} is beyond repair, recreating it",
            self.db_path.display()
        );
        let old = std::mem::replace(&mut *conn, Connection::open_in_memory()?);
        drop(old);
        Self::nuke(&self.db_path)?;
        *conn = Self::connect(&self.db_path)?;
        Ok(())
    }

    fn put(&self, collection: Collection, record: RawRecord) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let key = sql_value(&record.key);

        let existing: i64 = tx
            .query_row(
                "SELECT size_bytes FROM records WHERE collection = ?1 AND record_key = ?2",
                params![collection.name(), key],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or(0);
        let total: i64 = tx.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM records",
            [],
            |r| r.get(0),
        )?;

        let projected = (total - existing) as u64 + record.size_bytes();
        if projected > self.quota_bytes {
            // Dropping the transaction rolls it back; the old row is untouched
            return Err(StoreError::QuotaExceeded {
                needed: projected - self.quota_bytes,
                quota: self.quota_bytes,
            });
        }

        tx.execute(
            "INSERT OR REPLACE INTO records (collection, record_key, body, size_bytes)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                collection.name(),
                key,
                record.body,
                record.size_bytes() as i64
            ],
        )?;
        tx.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND record_key = ?2",
            params![collection.name(), key],
        )?;
        for (index, value) in &record.indexes {
            tx.execute(
                "INSERT INTO record_indexes (collection, index_name, index_value, record_key)
                 VALUES (?1, ?2, ?3, ?4)",
                params![collection.name(), index, sql_value(value), key],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get(&self, collection: Collection, key: &Value) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let body = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND record_key = ?2",
                params![collection.name(), sql_value(key)],
                |r| r.get(0),
            )
            .optional()?;
        Ok(body)
    }

    fn get_all_by_index(
        &self,
        collection: Collection,
        index: &str,
        query: &IndexQuery,
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>> {
        let conn = self.lock()?;

        let mut sql = String::from(
            "SELECT r.body FROM record_indexes i
             INNER JOIN records r ON r.collection = i.collection AND r.record_key = i.record_key
             WHERE i.collection = ?1 AND i.index_name = ?2",
        );
        let mut args = vec![
            SqlValue::Text(collection.name().to_string()),
            SqlValue::Text(index.to_string()),
        ];

        let mut push_condition = |op: &str, value: &Value| {
            args.push(sql_value(value));
            sql.push_str(&format!(" AND i.index_value {} ?{}", op, args.len()));
        };
        match query {
            IndexQuery::All => {}
            IndexQuery::Eq(value) => push_condition("=", value),
            IndexQuery::Range { lower, upper } => {
                match lower {
                    Bound::Included(v) => push_condition(">=", v),
                    Bound::Excluded(v) => push_condition(">", v),
                    Bound::Unbounded => {}
                }
                match upper {
                    Bound::Included(v) => push_condition("<=", v),
                    Bound::Excluded(v) => push_condition("<", v),
                    Bound::Unbounded => {}
                }
            }
        }

        sql.push_str(" ORDER BY i.index_value, i.record_key");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        let bodies = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, Vec<u8>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bodies)
    }

    fn delete(&self, collection: Collection, key: &Value) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let key = sql_value(key);
        let deleted = tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND record_key = ?2",
            params![collection.name(), key],
        )?;
        tx.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND record_key = ?2",
            params![collection.name(), key],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn clear(&self, collection: Collection) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM records WHERE collection = ?1",
            [collection.name()],
        )?;
        tx.execute(
            "DELETE FROM record_indexes WHERE collection = ?1",
            [collection.name()],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    fn next_id(&self, collection: Collection) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO sequences (collection, next_id) VALUES (?1, 1)
             ON CONFLICT(collection) DO UPDATE SET next_id = next_id + 1",
            [collection.name()],
        )?;
        let id: i64 = tx.query_row(
            "SELECT next_id FROM sequences WHERE collection = ?1",
            [collection.name()],
            |r| r.get(0),
        )?;
        tx.commit()?;
        Ok(id)
    }

    fn usage(&self) -> Result<StoreUsage> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT collection, COUNT(*), COALESCE(SUM(size_bytes), 0)
             FROM records GROUP BY collection",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut usage = StoreUsage {
            quota_bytes: self.quota_bytes,
            ..StoreUsage::default()
        };
        for (name, records, bytes) in rows {
            let Some(collection) = Collection::from_name(&name) else {
                log::warn!("Ignoring rows for unknown collection '{}'", name);
                continue;
            };
            usage.collections.insert(
                collection,
                CollectionUsage {
                    records: records as usize,
                    bytes: bytes as u64,
                },
            );
            usage.total_bytes += bytes as u64;
        }
        Ok(usage)
    }

    fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        CacheEntry, ObjectStore, ProgressRecord, StoreHealth, SyncKind, SyncQueueItem,
    };
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open(dir: &TempDir, quota: u64) -> (Arc<SqliteStore>, ObjectStore) {
        let port = Arc::new(SqliteStore::open_at(&dir.path().join("engine.db"), quota).unwrap());
        let store = ObjectStore::open(port.clone()).unwrap();
        (port, store)
    }

    fn queue_item(id: i64, priority: u8) -> SyncQueueItem {
        SyncQueueItem {
            id,
            kind: SyncKind::Progress,
            payload: serde_json::json!({ "n": id }),
            source: None,
            priority,
            enqueued_at: Utc::now(),
            attempts: 0,
            max_attempts: 3,
        }
    }

    #[test]
    fn test_fresh_database_is_migrated() {
        let dir = TempDir::new().unwrap();
        let (port, store) = open(&dir, 1 << 20);
        assert_eq!(port.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(store.health(), StoreHealth::Ready);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let (_, store) = open(&dir, 1 << 20);
            store.put(&queue_item(1, 1)).unwrap();
        }

        let (_, store) = open(&dir, 1 << 20);
        let item: Option<SyncQueueItem> = store.get(&Value::Int(1)).unwrap();
        assert_eq!(item.map(|i| i.id), Some(1));
    }

    #[test]
    fn test_integer_keys_sort_numerically() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open(&dir, 1 << 20);
        for id in [10, 9, 2] {
            store.put(&queue_item(id, 1)).unwrap();
        }

        let items: Vec<SyncQueueItem> = store
            .get_all_by_index("priority", &IndexQuery::All)
            .unwrap();
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 9, 10]);
    }

    #[test]
    fn test_range_query_and_limit() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open(&dir, 1 << 20);
        store.put(&queue_item(1, 5)).unwrap();
        store.put(&queue_item(2, 1)).unwrap();
        store.put(&queue_item(3, 3)).unwrap();

        let urgent: Vec<SyncQueueItem> = store
            .get_all_by_index("priority", &IndexQuery::below(4i64))
            .unwrap();
        assert_eq!(urgent.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2, 3]);

        let first: Vec<SyncQueueItem> = store
            .first_by_index("priority", &IndexQuery::All, Some(1))
            .unwrap();
        assert_eq!(first[0].id, 2);
    }

    #[test]
    fn test_quota_failure_keeps_prior_value() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open(&dir, 300);
        let mut record = ProgressRecord {
            id: 1,
            section: "intro".to_string(),
            payload: serde_json::json!({ "t": 1 }),
            timestamp: Utc::now(),
            synced: false,
        };
        store.put(&record).unwrap();

        record.payload = serde_json::json!({ "blob": "x".repeat(500) });
        let result = store.put(&record);
        assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));

        let kept: ProgressRecord = store.get(&Value::Int(1)).unwrap().unwrap();
        assert_eq!(kept.payload, serde_json::json!({ "t": 1 }));
    }

    #[test]
    fn test_delete_removes_index_rows() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open(&dir, 1 << 20);
        store.put(&queue_item(1, 1)).unwrap();
        assert!(store.delete::<SyncQueueItem>(&Value::Int(1)).unwrap());

        let items: Vec<SyncQueueItem> = store
            .get_all_by_index("priority", &IndexQuery::All)
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let (_, store) = open(&dir, 1 << 20);
            assert_eq!(store.next_id(Collection::SyncQueue).unwrap(), 1);
            assert_eq!(store.next_id(Collection::SyncQueue).unwrap(), 2);
        }
        let (_, store) = open(&dir, 1 << 20);
        assert_eq!(store.next_id(Collection::SyncQueue).unwrap(), 3);
    }

    #[test]
    fn test_usage_per_collection() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open(&dir, 1 << 20);
        store.put(&queue_item(1, 1)).unwrap();
        store.put(&queue_item(2, 1)).unwrap();

        let usage = store.usage().unwrap();
        assert_eq!(usage.collection(Collection::SyncQueue).records, 2);
        assert!(usage.total_bytes > 0);
        assert_eq!(usage.collection(Collection::Progress).records, 0);
    }

    #[test]
    fn test_cache_entries_charge_payload_size() {
        let dir = TempDir::new().unwrap();
        let (_, store) = open(&dir, 1000);
        let entry = CacheEntry::new("https://x/a", vec![7u8; 1000], None, 200, 1, Utc::now());
        store.put(&entry).unwrap();

        let usage = store.usage().unwrap();
        assert_eq!(usage.collection(Collection::CachedContent).bytes, 1000);
        assert_eq!(usage.total_bytes, 1000);
    }

    #[test]
    fn test_garbage_file_needs_repair() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("engine.db");
        std::fs::write(&db_path, vec![0x42u8; 4096]).unwrap();

        let port = Arc::new(SqliteStore::open_at(&db_path, 1 << 20).unwrap());
        let store = ObjectStore::open(port).unwrap();
        assert!(matches!(store.health(), StoreHealth::NeedsRepair(_)));

        store.repair().unwrap();
        assert_eq!(store.health(), StoreHealth::Ready);
        store.put(&queue_item(1, 1)).unwrap();
    }
}
