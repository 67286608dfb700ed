//! Per-endpoint delivery throttling
//!
//! Reactive: a sync endpoint is only throttled after it answers 429.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;

use crate::store::SyncKind;

/// Throttle for one sync endpoint
pub struct EndpointLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    active: AtomicBool,
    kind: SyncKind,
}

impl EndpointLimiter {
    pub fn new(kind: SyncKind, per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::direct(quota),
            active: AtomicBool::new(false),
            kind,
        }
    }

    pub fn activate(&self) {
        let was_active = self.active.swap(true, Ordering::SeqCst);
        if !was_active {
            debug!("Rate limiting activated for {} endpoint", self.kind);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn wait_if_active(&self) {
        if self.is_active() {
            debug!("Waiting for {} rate limiter", self.kind);
            self.limiter.until_ready().await;
        }
    }
}

/// One limiter per sync kind
pub struct RateLimiterSet {
    limiters: HashMap<SyncKind, EndpointLimiter>,
}

impl RateLimiterSet {
    pub fn new(per_second: u32) -> Self {
        let limiters = SyncKind::ALL
            .into_iter()
            .map(|kind| (kind, EndpointLimiter::new(kind, per_second)))
            .collect();
        Self { limiters }
    }

    pub async fn wait_for(&self, kind: SyncKind) {
        if let Some(limiter) = self.limiters.get(&kind) {
            limiter.wait_if_active().await;
        }
    }

    /// Called when `kind`'s endpoint answers 429
    pub fn activate(&self, kind: SyncKind) {
        if let Some(limiter) = self.limiters.get(&kind) {
            limiter.activate();
        }
    }

    pub fn is_active(&self, kind: SyncKind) -> bool {
        self.limiters
            .get(&kind)
            .map(EndpointLimiter::is_active)
            .unwrap_or(false)
    }
}
