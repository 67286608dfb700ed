//! Collaborator-facing engine facade
//!
//! Wires the object store, content cache, router, sync queue, synchronizer
//! and monitor together. Collaborator calls never fail outright: storage
//! errors are logged, structural ones raise `RepairRequired`, and the call
//! reports `false` or `None`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::cache::{CacheStats, ContentCache, canonical_key};
use crate::clock::{Clock, system_clock};
use crate::config::Config;
use crate::error::{ConfigError, ErrorClass, Result, StoreError};
use crate::events::{EngineEvent, EventBus};
use crate::monitor::{Cadence, ConnectivityMonitor, Visibility};
use crate::queue::SyncQueue;
use crate::router::{Fetcher, HttpFetcher, PrecacheReport, ResourceRequest, Router, RouterResponse};
use crate::store::{
    AnalyticsEvent, Collection, FavoriteRecord, IndexQuery, ObjectStore, ProgressRecord, Record,
    SourceKey, SqliteStore, StoragePort, StoreHealth, StoreUsage, SyncKind, Value,
};
use crate::sync::{BatchReport, HttpSink, RemoteSink, SyncPolicy, SyncState, Synchronizer};

/// Records removed by a retention sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cache_entries: usize,
    pub progress: usize,
    pub analytics: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.cache_entries + self.progress + self.analytics
    }
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_reason: Option<String>,
    pub online: bool,
    pub visibility: Visibility,
    pub cadence: Cadence,
    pub sync_state: SyncState,
    pub queued: usize,
    pub cache: CacheStats,
    pub manifest_version: String,
}

pub struct Engine {
    config: Config,
    store: Arc<ObjectStore>,
    cache: Arc<ContentCache>,
    queue: Arc<SyncQueue>,
    router: Router,
    fetcher: Arc<dyn Fetcher>,
    synchronizer: Synchronizer,
    monitor: ConnectivityMonitor,
    events: EventBus,
    clock: Clock,
}

impl Engine {
    /// Production wiring: SQLite storage, reqwest fetcher and sink
    pub fn open(config: Config) -> Result<Self> {
        let port = Arc::new(SqliteStore::open_at(
            &config.database_path()?,
            config.storage.quota_bytes,
        )?);
        let timeout = config.server.request_timeout();
        let fetcher = Arc::new(HttpFetcher::new(timeout)?);
        let sink = Arc::new(HttpSink::new(
            config.server.base_url()?,
            timeout,
            config.sync.rate_limit_per_second,
        )?);
        Self::with_parts(config, port, fetcher, sink, system_clock())
    }

    /// Wire the engine over injected collaborators
    pub fn with_parts(
        config: Config,
        port: Arc<dyn StoragePort>,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn RemoteSink>,
        clock: Clock,
    ) -> Result<Self> {
        let events = EventBus::new();
        let store = Arc::new(ObjectStore::open(port)?);
        if let StoreHealth::NeedsRepair(reason) = store.health() {
            log::warn!("Object store needs repair: {}", reason);
            events.emit(EngineEvent::RepairRequired { reason });
        }

        let monitor = ConnectivityMonitor::new(
            config.sync.active_interval(),
            config.sync.background_interval(),
            events.clone(),
        );
        let cache = Arc::new(ContentCache::new(
            store.clone(),
            clock.clone(),
            events.clone(),
        ));
        let queue = Arc::new(SyncQueue::new(
            store.clone(),
            clock.clone(),
            config.sync.max_attempts,
        ));
        let router = Router::new(
            cache.clone(),
            fetcher.clone(),
            monitor.clone(),
            config.server.base_url()?,
            config.routes.clone(),
            clock.clone(),
        );
        let synchronizer = Synchronizer::new(
            queue.clone(),
            store.clone(),
            sink,
            monitor.clone(),
            events.clone(),
            SyncPolicy::from_config(&config.sync),
        );

        Ok(Self {
            config,
            store,
            cache,
            queue,
            router,
            fetcher,
            synchronizer,
            monitor,
            events,
            clock,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    // ---- collaborator writes ----

    /// Record a progress write and queue it for delivery
    pub fn save_progress(&self, section: &str, data: serde_json::Value) -> bool {
        let result = self.write_record(|engine| {
            let record = ProgressRecord {
                id: engine.store.next_id(Collection::Progress)?,
                section: section.to_string(),
                payload: data.clone(),
                timestamp: (engine.clock)(),
                synced: false,
            };
            engine.store.put(&record)?;
            Ok(record)
        });

        match result {
            Some(record) => {
                self.enqueue_record(SyncKind::Progress, &record, SourceKey::Id(record.id));
                true
            }
            None => false,
        }
    }

    /// Upsert a favorite by id and queue it for delivery
    pub fn add_to_favorites(&self, id: &str, kind: &str, title: &str, url: &str) -> bool {
        let record = FavoriteRecord {
            id: id.to_string(),
            kind: kind.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            timestamp: (self.clock)(),
            synced: false,
        };
        if self
            .write_record(|engine| engine.store.put(&record))
            .is_none()
        {
            return false;
        }
        self.enqueue_record(SyncKind::Favorites, &record, SourceKey::Name(record.id.clone()));
        true
    }

    /// Delete a favorite; `false` if it did not exist
    pub fn remove_favorite(&self, id: &str) -> bool {
        let removed = self
            .write_record(|engine| engine.store.delete::<FavoriteRecord>(&Value::from(id)))
            .unwrap_or(false);
        if removed && self.config.sync.enabled {
            let payload = serde_json::json!({ "id": id, "removed": true });
            let queued = self.with_quota_retry(|| {
                self.queue
                    .enqueue(SyncKind::Favorites, payload.clone(), SyncKind::Favorites.default_priority())
            });
            if let Err(e) = queued {
                self.report_store_error("queue favorite removal", &e);
            }
        }
        removed
    }

    /// Record an analytics event and queue it for delivery
    pub fn track_event(&self, event_type: &str, data: serde_json::Value) -> bool {
        let result = self.write_record(|engine| {
            let event = AnalyticsEvent {
                id: engine.store.next_id(Collection::AnalyticsEvents)?,
                event_type: event_type.to_string(),
                data: data.clone(),
                timestamp: (engine.clock)(),
                synced: false,
            };
            engine.store.put(&event)?;
            Ok(event)
        });

        match result {
            Some(event) => {
                self.enqueue_record(SyncKind::Analytics, &event, SourceKey::Id(event.id));
                true
            }
            None => false,
        }
    }

    /// Queue a profile update; profiles have no local record
    pub fn update_profile(&self, data: serde_json::Value) -> bool {
        let result = self.with_quota_retry(|| {
            self.queue
                .enqueue(SyncKind::Profile, data.clone(), SyncKind::Profile.default_priority())
        });
        match result {
            Ok(_) => true,
            Err(e) => {
                self.report_store_error("queue profile update", &e);
                false
            }
        }
    }

    // ---- collaborator reads ----

    /// Cached payload for a resource key (absolute URL or path on the origin)
    pub fn get_cached_content(&self, key: &str) -> Option<Vec<u8>> {
        let base = self.config.server.base_url().ok()?;
        let key = match canonical_key(&base, key) {
            Ok(key) => key,
            Err(e) => {
                log::debug!("Not a cacheable key: {}", e);
                return None;
            }
        };
        match self.cache.get(&key) {
            Ok(entry) => entry.map(|e| e.payload),
            Err(e) => {
                self.report_store_error("read cached content", &e);
                None
            }
        }
    }

    /// Favorites, oldest first
    pub fn get_favorites(&self) -> Vec<FavoriteRecord> {
        self.read_records("timestamp", &IndexQuery::All, "list favorites")
    }

    /// Progress records for a section, in write order
    pub fn get_progress(&self, section: &str) -> Vec<ProgressRecord> {
        let mut records: Vec<ProgressRecord> =
            self.read_records("section", &IndexQuery::eq(section), "list progress");
        records.sort_by_key(|r| (r.timestamp, r.id));
        records
    }

    fn read_records<R: Record>(&self, index: &str, query: &IndexQuery, what: &str) -> Vec<R> {
        match self.store.get_all_by_index(index, query) {
            Ok(records) => records,
            Err(e) => {
                self.report_store_error(what, &e);
                Vec::new()
            }
        }
    }

    // ---- lifecycle ----

    pub fn set_online(&self, online: bool) {
        self.monitor.set_online(online);
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.monitor.set_visibility(visibility);
    }

    pub async fn fetch(&self, request: ResourceRequest) -> RouterResponse {
        self.router.handle(request).await
    }

    pub async fn precache(&self) -> PrecacheReport {
        self.router.precache().await
    }

    /// One foreground drain pass
    pub async fn sync_now(&self) -> Result<BatchReport> {
        let report = self.synchronizer.drain_now().await;
        if let Err(ref e) = report {
            self.report_store_error("sync", e);
        }
        Ok(report?)
    }

    /// Run the scheduler and the reachability probe until `shutdown` flips
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let probe_target = ResourceRequest::get(self.config.server.base_url()?);
        let probe_interval = self.config.sync.active_interval();
        tokio::join!(
            self.synchronizer.run(shutdown.clone()),
            self.monitor
                .probe(self.fetcher.clone(), probe_target, probe_interval, shutdown),
        );
        Ok(())
    }

    // ---- maintenance ----

    /// Apply the retention horizon to cache entries and synced records
    pub fn sweep(&self) -> Result<SweepReport> {
        let retention = self.config.storage.retention()?;
        let horizon = (self.clock)()
            .checked_sub_signed(retention)
            .ok_or_else(|| ConfigError::Invalid("retention horizon is out of range".into()))?;
        let report = SweepReport {
            cache_entries: self.cache.sweep_expired(horizon)?,
            progress: self.sweep_synced::<ProgressRecord>(horizon, |r| (r.synced, Value::Int(r.id)))?,
            analytics: self.sweep_synced::<AnalyticsEvent>(horizon, |e| (e.synced, Value::Int(e.id)))?,
        };
        log::info!("Retention sweep removed {} records", report.total());
        Ok(report)
    }

    fn sweep_synced<R: Record>(
        &self,
        horizon: DateTime<Utc>,
        synced_key: impl Fn(&R) -> (bool, Value),
    ) -> std::result::Result<usize, StoreError> {
        let old: Vec<R> = self
            .store
            .get_all_by_index("timestamp", &IndexQuery::below(horizon))?;
        let mut removed = 0;
        for record in &old {
            let (synced, key) = synced_key(record);
            if synced && self.store.delete::<R>(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Re-enqueue unsynced records that no queue item references
    pub fn reconcile(&self) -> Result<usize> {
        let mut requeued = 0;

        let queued = self.queue.sources(SyncKind::Progress)?;
        let progress: Vec<ProgressRecord> = self
            .store
            .get_all_by_index("synced", &IndexQuery::eq(false))?;
        for record in progress.iter().filter(|r| !queued.contains(&Value::Int(r.id))) {
            self.with_quota_retry(|| {
                self.queue
                    .enqueue_for(SyncKind::Progress, serde_json::to_value(record)?, SourceKey::Id(record.id))
            })?;
            requeued += 1;
        }

        let queued = self.queue.sources(SyncKind::Analytics)?;
        let events: Vec<AnalyticsEvent> = self
            .store
            .get_all_by_index("synced", &IndexQuery::eq(false))?;
        for event in events.iter().filter(|e| !queued.contains(&Value::Int(e.id))) {
            self.with_quota_retry(|| {
                self.queue
                    .enqueue_for(SyncKind::Analytics, serde_json::to_value(event)?, SourceKey::Id(event.id))
            })?;
            requeued += 1;
        }

        let queued = self.queue.sources(SyncKind::Favorites)?;
        let favorites: Vec<FavoriteRecord> = self
            .store
            .get_all_by_index("timestamp", &IndexQuery::All)?;
        for favorite in favorites
            .iter()
            .filter(|f| !f.synced && !queued.contains(&Value::from(f.id.as_str())))
        {
            self.with_quota_retry(|| {
                self.queue.enqueue_for(
                    SyncKind::Favorites,
                    serde_json::to_value(favorite)?,
                    SourceKey::Name(favorite.id.clone()),
                )
            })?;
            requeued += 1;
        }

        if requeued > 0 {
            log::info!("Reconciled {} unsynced records into the queue", requeued);
        }
        Ok(requeued)
    }

    /// Repair the object store and unblock it
    pub fn repair(&self) -> Result<()> {
        self.store.repair()?;
        Ok(())
    }

    pub fn usage(&self) -> Result<StoreUsage> {
        Ok(self.store.usage()?)
    }

    pub fn status(&self) -> EngineStatus {
        let (healthy, repair_reason) = match self.store.health() {
            StoreHealth::Ready => (true, None),
            StoreHealth::NeedsRepair(reason) => (false, Some(reason)),
        };
        EngineStatus {
            healthy,
            repair_reason,
            online: self.monitor.is_online(),
            visibility: self.monitor.visibility(),
            cadence: self.monitor.cadence(),
            sync_state: self.synchronizer.state(),
            queued: self.queue.len().unwrap_or(0),
            cache: self.cache.stats().unwrap_or_default(),
            manifest_version: self.router.manifest_version().to_string(),
        }
    }

    // ---- internals ----

    /// Run a record write with the quota hook; `None` when it failed
    fn write_record<T>(
        &self,
        write: impl Fn(&Self) -> std::result::Result<T, StoreError>,
    ) -> Option<T> {
        match self.with_quota_retry(|| write(self)) {
            Ok(value) => Some(value),
            Err(e) => {
                self.report_store_error("write record", &e);
                None
            }
        }
    }

    /// Queue a snapshot of a freshly written record. A failure here leaves
    /// an unsynced record for `reconcile` to pick up.
    fn enqueue_record<R: Record>(&self, kind: SyncKind, record: &R, source: SourceKey) {
        if !self.config.sync.enabled {
            return;
        }
        let result = self.with_quota_retry(|| {
            self.queue
                .enqueue_for(kind, serde_json::to_value(record)?, source.clone())
        });
        if let Err(e) = result {
            self.report_store_error("enqueue sync item", &e);
        }
    }

    /// On `QuotaExceeded`: notify, free cache space, retry once
    fn with_quota_retry<T>(
        &self,
        op: impl Fn() -> std::result::Result<T, StoreError>,
    ) -> std::result::Result<T, StoreError> {
        match op() {
            Err(StoreError::QuotaExceeded { needed, quota }) => {
                self.events
                    .emit(EngineEvent::QuotaExceeded { needed, quota });
                match self.cache.make_room(needed) {
                    Ok(freed) => log::info!("Freed {} cache bytes for a {}-byte shortfall", freed, needed),
                    Err(e) => log::warn!("Cache cleanup failed: {}", e),
                }
                op()
            }
            other => other,
        }
    }

    fn report_store_error(&self, what: &str, error: &StoreError) {
        log::error!("Failed to {}: {}", what, error);
        if error.class() == ErrorClass::Structural {
            self.events.emit(EngineEvent::RepairRequired {
                reason: error.to_string(),
            });
        }
    }
}
