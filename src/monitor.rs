//! Connectivity and lifecycle monitor
//!
//! Tracks reachability and foreground/background visibility, derives the
//! sync cadence from them, and broadcasts transitions to the scheduler.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::events::{EngineEvent, EventBus};
use crate::router::{Fetcher, ResourceRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Foreground,
    Background,
}

/// How often the synchronizer drains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Active(Duration),
    Background(Duration),
    Paused,
}

impl Cadence {
    /// Timer interval, `None` while paused
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Cadence::Active(d) | Cadence::Background(d) => Some(*d),
            Cadence::Paused => None,
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cadence::Active(d) => write!(f, "active ({}s)", d.as_secs()),
            Cadence::Background(d) => write!(f, "background ({}s)", d.as_secs()),
            Cadence::Paused => f.write_str("paused"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorSignal {
    CadenceChanged(Cadence),
    ConnectivityRestored,
    ConnectivityLost,
}

#[derive(Debug, Clone, Copy)]
struct MonitorState {
    online: bool,
    visibility: Visibility,
}

struct Inner {
    state: Mutex<MonitorState>,
    signals: broadcast::Sender<MonitorSignal>,
    events: EventBus,
    active_interval: Duration,
    background_interval: Duration,
}

/// Shared handle; clones observe the same state
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Starts online and in the foreground
    pub fn new(active_interval: Duration, background_interval: Duration, events: EventBus) -> Self {
        let (signals, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MonitorState {
                    online: true,
                    visibility: Visibility::Foreground,
                }),
                signals,
                events,
                active_interval,
                background_interval,
            }),
        }
    }

    fn snapshot(&self) -> MonitorState {
        match self.inner.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Apply `update`, then run `notify` with the state before and after it.
    ///
    /// `notify` runs under the state lock, so concurrent transitions are
    /// broadcast in the order they were applied.
    fn update(
        &self,
        update: impl FnOnce(&mut MonitorState),
        notify: impl FnOnce(MonitorState, MonitorState),
    ) {
        let mut guard = match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = *guard;
        update(&mut guard);
        notify(before, *guard);
    }

    pub fn is_online(&self) -> bool {
        self.snapshot().online
    }

    pub fn visibility(&self) -> Visibility {
        self.snapshot().visibility
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence_for(self.snapshot())
    }

    fn cadence_for(&self, state: MonitorState) -> Cadence {
        match (state.online, state.visibility) {
            (false, _) => Cadence::Paused,
            (true, Visibility::Foreground) => Cadence::Active(self.inner.active_interval),
            (true, Visibility::Background) => Cadence::Background(self.inner.background_interval),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorSignal> {
        self.inner.signals.subscribe()
    }

    pub fn set_online(&self, online: bool) {
        self.update(
            |s| s.online = online,
            |before, after| {
                if before.online == after.online {
                    return;
                }
                log::info!("Connectivity {}", if online { "restored" } else { "lost" });
                self.signal(if online {
                    MonitorSignal::ConnectivityRestored
                } else {
                    MonitorSignal::ConnectivityLost
                });
                self.inner
                    .events
                    .emit(EngineEvent::ConnectivityChanged { online });
                self.signal_cadence(before, after);
            },
        );
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.update(
            |s| s.visibility = visibility,
            |before, after| {
                if before.visibility != after.visibility {
                    log::debug!("Visibility changed to {:?}", visibility);
                    self.signal_cadence(before, after);
                }
            },
        );
    }

    fn signal_cadence(&self, before: MonitorState, after: MonitorState) {
        let cadence = self.cadence_for(after);
        if self.cadence_for(before) != cadence {
            log::info!("Sync cadence now {}", cadence);
            self.signal(MonitorSignal::CadenceChanged(cadence));
        }
    }

    fn signal(&self, signal: MonitorSignal) {
        let _ = self.inner.signals.send(signal);
    }

    /// Poll `target` every `interval` and drive the online signal from it.
    ///
    /// Any HTTP response counts as reachable; a transport error or timeout
    /// counts as offline. Returns when `shutdown` flips to true.
    pub async fn probe(
        &self,
        fetcher: Arc<dyn Fetcher>,
        target: ResourceRequest,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::debug!("Probe stopped");
                        return;
                    }
                    continue;
                }
            }

            let reachable = match fetcher.fetch(&target).await {
                Ok(resp) => {
                    log::debug!("Probe {} -> {}", target.url, resp.status);
                    true
                }
                Err(e) => {
                    log::debug!("Probe {} failed: {}", target.url, e);
                    false
                }
            };
            self.set_online(reachable);
        }
    }
}
