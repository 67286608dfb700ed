//! Background synchronizer
//!
//! Drains the sync queue to the remote sink one item at a time. A single
//! scheduler loop ([`Synchronizer::run`]) owns the only timer and drives the
//! pure state machine in [`state`]. Every batch, scheduled or manual,
//! holds the batch lock for its whole run, so batches never overlap.
//!
//! Before each delivery the monitor is consulted, and the delivery itself is
//! raced against the shutdown signal. An abandoned batch leaves every item
//! it did not resolve untouched, so delivery is at-least-once.

pub mod rate_limit;
pub mod sink;
pub mod state;

#[cfg(test)]
pub(crate) mod mock;

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};
use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::error::{ErrorClass, StoreError};
use crate::events::{EngineEvent, EventBus};
use crate::monitor::{ConnectivityMonitor, MonitorSignal};
use crate::queue::{Resolution, SyncQueue};
use crate::store::{
    AnalyticsEvent, FavoriteRecord, ObjectStore, ProgressRecord, Record, SyncKind, SyncQueueItem,
    Value,
};

pub use sink::{Delivery, HttpSink, RemoteSink};
pub use state::{BackoffPolicy, Effect, SyncEvent, SyncState, transition};

type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub batch_size: usize,
    pub backoff: BackoffPolicy,
}

impl SyncPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            backoff: BackoffPolicy {
                base: config.backoff_base(),
                max: config.backoff_max(),
            },
        }
    }
}

/// What one or more drained batches did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub delivered: usize,
    /// Failed attempts, including those that exhausted their item
    pub failed: usize,
    pub rejected: usize,
    pub exhausted: usize,
    pub abandoned: bool,
    /// The batch was full and the queue still holds items
    pub more: bool,
}

impl BatchReport {
    fn absorb(&mut self, other: BatchReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.rejected += other.rejected;
        self.exhausted += other.exhausted;
        self.abandoned = other.abandoned;
        self.more = other.more;
    }
}

pub struct Synchronizer {
    queue: Arc<SyncQueue>,
    store: Arc<ObjectStore>,
    sink: Arc<dyn RemoteSink>,
    monitor: ConnectivityMonitor,
    events: EventBus,
    policy: SyncPolicy,
    state: Mutex<SyncState>,
    batch: AsyncMutex<()>,
}

impl Synchronizer {
    pub fn new(
        queue: Arc<SyncQueue>,
        store: Arc<ObjectStore>,
        sink: Arc<dyn RemoteSink>,
        monitor: ConnectivityMonitor,
        events: EventBus,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            queue,
            store,
            sink,
            monitor,
            events,
            policy,
            state: Mutex::new(SyncState::Idle),
            batch: AsyncMutex::new(()),
        }
    }

    pub fn state(&self) -> SyncState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Feed one event through the state machine
    fn step(&self, event: SyncEvent) -> Vec<Effect> {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (next, effects) = transition(*guard, event, &self.policy.backoff);
        if next != *guard {
            log::info!("Sync {:?} -> {:?} on {:?}", *guard, next, event);
        }
        *guard = next;
        effects
    }

    /// Deliver up to one batch of queued items.
    ///
    /// Waits for any batch already in flight; the queue is read only once
    /// the lock is held.
    pub async fn drain_batch(&self, shutdown: &mut watch::Receiver<bool>) -> Result<BatchReport> {
        let _batch = self.batch.lock().await;
        let items = self.queue.next_batch(self.policy.batch_size)?;
        let mut report = BatchReport::default();

        for item in &items {
            if !self.monitor.is_online() {
                log::info!("Went offline mid-batch, leaving remaining items queued");
                report.abandoned = true;
                break;
            }
            if *shutdown.borrow() {
                report.abandoned = true;
                break;
            }

            let outcome = tokio::select! {
                outcome = self.sink.deliver(item.kind, &item.payload) => outcome,
                _ = shutdown.changed() => {
                    log::info!("Shutdown during delivery of item {}, leaving it queued", item.id);
                    report.abandoned = true;
                    break;
                }
            };

            match outcome {
                Delivery::Delivered => {
                    self.queue.resolve(item.id, true)?;
                    self.mark_synced(item);
                    report.delivered += 1;
                }
                Delivery::Rejected(reason) => {
                    log::warn!("{} item {} rejected: {}", item.kind, item.id, reason);
                    if let Some(item) = self.queue.reject(item.id)? {
                        self.report_terminal(item, reason);
                    }
                    report.rejected += 1;
                }
                Delivery::Failed(reason) => {
                    log::warn!("Delivering {} item {} failed: {}", item.kind, item.id, reason);
                    report.failed += 1;
                    if let Resolution::Exhausted(item) = self.queue.resolve(item.id, false)? {
                        let reason = format!("gave up after {} attempts: {}", item.attempts, reason);
                        self.report_terminal(item, reason);
                        report.exhausted += 1;
                    }
                }
            }
        }

        report.more = !report.abandoned
            && items.len() == self.policy.batch_size
            && !self.queue.is_empty()?;
        log::debug!("Batch finished: {:?}", report);
        Ok(report)
    }

    /// Drain until the queue is empty, a delivery fails, or the engine goes offline
    pub async fn drain_now(&self) -> Result<BatchReport> {
        let (_stop, mut shutdown) = watch::channel(false);
        let mut total = BatchReport::default();
        loop {
            let report = self.drain_batch(&mut shutdown).await?;
            let keep_going = report.more && report.failed == 0 && report.rejected == 0;
            total.absorb(report);
            if !keep_going {
                return Ok(total);
            }
        }
    }

    /// Scheduler loop. Returns when `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut signals = self.monitor.subscribe();
        let mut deadline: Option<Instant> = None;
        let mut pending: VecDeque<Effect> = VecDeque::new();

        let initial = if self.monitor.is_online() {
            SyncEvent::TimerFired
        } else {
            SyncEvent::WentOffline
        };
        pending.extend(self.step(initial));

        loop {
            while let Some(effect) = pending.pop_front() {
                match effect {
                    Effect::StartBatch => {
                        let event = self.batch_event(&mut shutdown).await;
                        pending.extend(self.step(event));
                    }
                    Effect::ArmTimer => {
                        deadline = self.monitor.cadence().interval().map(|d| Instant::now() + d);
                    }
                    Effect::ScheduleRetry(delay) => {
                        log::info!("Retrying sync in {}s", delay.as_secs());
                        deadline = Some(Instant::now() + delay);
                    }
                    Effect::Pause => deadline = None,
                }
            }

            if *shutdown.borrow() {
                break;
            }

            let timer = deadline;
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                signal = signals.recv() => match signal {
                    Ok(MonitorSignal::ConnectivityRestored) => SyncEvent::ConnectivityRestored,
                    Ok(MonitorSignal::ConnectivityLost) => SyncEvent::WentOffline,
                    Ok(MonitorSignal::CadenceChanged(cadence)) => {
                        if self.state() == SyncState::Idle {
                            deadline = cadence.interval().map(|d| Instant::now() + d);
                        }
                        continue;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Missed {} monitor signals", missed);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = async {
                    match timer {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    deadline = None;
                    match self.state() {
                        SyncState::Backoff { .. } => SyncEvent::BackoffElapsed,
                        _ => SyncEvent::TimerFired,
                    }
                }
            };
            pending.extend(self.step(event));
        }

        log::info!("Sync scheduler stopped");
    }

    async fn batch_event(&self, shutdown: &mut watch::Receiver<bool>) -> SyncEvent {
        match self.drain_batch(shutdown).await {
            Ok(report) if report.abandoned => SyncEvent::BatchAbandoned,
            Ok(report) => SyncEvent::BatchFinished {
                failed: report.failed,
                more: report.more,
            },
            Err(e) => {
                log::error!("Sync batch failed: {}", e);
                if e.class() == ErrorClass::Structural {
                    self.events.emit(EngineEvent::RepairRequired {
                        reason: e.to_string(),
                    });
                }
                SyncEvent::BatchFinished {
                    failed: 1,
                    more: false,
                }
            }
        }
    }

    fn report_terminal(&self, item: SyncQueueItem, reason: String) {
        self.events.emit(EngineEvent::SyncTerminalFailure {
            kind: item.kind,
            payload: item.payload,
            reason,
        });
    }

    /// Flag the record a delivered item came from
    fn mark_synced(&self, item: &SyncQueueItem) {
        let Some(source) = item.source.clone() else {
            return;
        };
        let key = Value::from(source);

        let result = match item.kind {
            SyncKind::Progress => self.flag::<ProgressRecord>(&key, |r| {
                r.synced = true;
                true
            }),
            SyncKind::Analytics => self.flag::<AnalyticsEvent>(&key, |r| {
                r.synced = true;
                true
            }),
            // Only the state that was delivered counts as synced; a favorite
            // upserted since the snapshot still needs its own delivery
            SyncKind::Favorites => {
                let snapshot = serde_json::from_value::<FavoriteRecord>(item.payload.clone()).ok();
                self.flag::<FavoriteRecord>(&key, |r| {
                    let current = !r.synced && snapshot.as_ref().is_some_and(|s| s.same_state(r));
                    if current {
                        r.synced = true;
                    }
                    current
                })
            }
            SyncKind::Profile => Ok(()),
        };

        if let Err(e) = result {
            log::warn!("Failed to mark {} record {} synced: {}", item.kind, key, e);
        }
    }

    fn flag<R: Record>(&self, key: &Value, update: impl FnOnce(&mut R) -> bool) -> Result<()> {
        if let Some(mut record) = self.store.get::<R>(key)? {
            if update(&mut record) {
                self.store.put(&record)?;
            }
        }
        Ok(())
    }
}
