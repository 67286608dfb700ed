//! Mock remote sink for testing

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::{Delivery, RemoteSink};
use crate::store::SyncKind;

/// Answers from a script, then `Delivered` once the script runs out
#[derive(Default)]
pub struct MockSink {
    script: Mutex<VecDeque<Delivery>>,
    delay: Mutex<Option<Duration>>,
    delivered: Mutex<Vec<(SyncKind, serde_json::Value)>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next deliveries, in order
    pub fn script(&self, outcomes: impl IntoIterator<Item = Delivery>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Every payload seen, whatever the outcome
    pub fn calls(&self) -> Vec<(SyncKind, serde_json::Value)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteSink for MockSink {
    async fn deliver(&self, kind: SyncKind, payload: &serde_json::Value) -> Delivery {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.delivered.lock().unwrap().push((kind, payload.clone()));
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Delivery::Delivered)
    }
}
