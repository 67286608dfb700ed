//! Synchronizer state machine
//!
//! `transition` is pure: the scheduler loop feeds it events and carries out
//! the effects it returns.

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    /// A batch is in flight; `streak` counts consecutive failed batches before it
    Draining { streak: u32 },
    Backoff { streak: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    TimerFired,
    ConnectivityRestored,
    WentOffline,
    BatchFinished { failed: usize, more: bool },
    BatchAbandoned,
    BackoffElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartBatch,
    /// Arm the cadence timer
    ArmTimer,
    ScheduleRetry(Duration),
    /// Disarm every timer
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// `min(base * 2^(streak - 1), max)`
    pub fn delay(&self, streak: u32) -> Duration {
        let exponent = streak.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

pub fn transition(
    state: SyncState,
    event: SyncEvent,
    policy: &BackoffPolicy,
) -> (SyncState, Vec<Effect>) {
    use SyncEvent::*;
    use SyncState::*;

    match (state, event) {
        (_, WentOffline) => (Idle, vec![Effect::Pause]),

        (Idle, TimerFired | ConnectivityRestored) => {
            (Draining { streak: 0 }, vec![Effect::StartBatch])
        }

        (Draining { .. }, BatchFinished { failed: 0, more: true }) => {
            (Draining { streak: 0 }, vec![Effect::StartBatch])
        }
        (Draining { .. }, BatchFinished { failed: 0, more: false }) => (Idle, vec![Effect::ArmTimer]),
        (Draining { streak }, BatchFinished { .. }) => {
            let streak = streak.saturating_add(1);
            (
                Backoff { streak },
                vec![Effect::ScheduleRetry(policy.delay(streak))],
            )
        }
        (Draining { .. }, BatchAbandoned) => (Idle, vec![Effect::Pause]),

        (Backoff { streak }, BackoffElapsed | ConnectivityRestored) => {
            (Draining { streak }, vec![Effect::StartBatch])
        }

        // Batches never overlap; stray ticks and completions are ignored
        (state, _) => (state, Vec::new()),
    }
}
