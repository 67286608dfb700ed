//! Status notifications emitted to collaborators

use serde::Serialize;
use tokio::sync::broadcast;

use crate::store::SyncKind;

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ConnectivityChanged {
        online: bool,
    },
    /// A queue item was dropped for good, either exhausted or rejected
    SyncTerminalFailure {
        kind: SyncKind,
        payload: serde_json::Value,
        reason: String,
    },
    QuotaExceeded {
        needed: u64,
        quota: u64,
    },
    RepairRequired {
        reason: String,
    },
}

/// Fan-out channel for [`EngineEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        log::debug!("Engine event: {:?}", event);
        let _ = self.tx.send(event);
    }
}
