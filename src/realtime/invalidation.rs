// ABOUTME: Invalidation scheduler - coalesces change bursts into one refresh per key
//
// At most one pending invalidation per key. A new event for the same key
// replaces the pending one and restarts its delay, so N events within the
// window produce exactly one downstream refresh, timed from the last event.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::deadline::{DeadlineQueue, TimerId};
use super::engine::Timer;
use super::types::{InvalidationKey, Priority};

/// Per-priority delay before a pending invalidation fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityDelays {
    pub high: Duration,
    pub medium: Duration,
    pub low: Duration,
}

impl PriorityDelays {
    pub const fn delay_for(&self, priority: Priority) -> Duration {
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

impl Default for PriorityDelays {
    fn default() -> Self {
        Self {
            high: Duration::ZERO,
            medium: Duration::from_millis(100),
            low: Duration::from_millis(300),
        }
    }
}

/// A refresh waiting for its burst to settle
#[derive(Debug, Clone)]
pub struct PendingInvalidation {
    pub key: InvalidationKey,
    pub scheduled_at: Instant,
    pub priority: Priority,
    timer: TimerId,
}

#[derive(Debug, Default)]
pub struct InvalidationScheduler {
    pending: HashMap<InvalidationKey, PendingInvalidation>,
    delays: PriorityDelays,
}

impl InvalidationScheduler {
    pub fn new(delays: PriorityDelays) -> Self {
        Self {
            pending: HashMap::new(),
            delays,
        }
    }

    /// Schedule (or reschedule) a refresh of `key`
    pub fn schedule(
        &mut self,
        key: InvalidationKey,
        priority: Priority,
        now: Instant,
        timers: &mut DeadlineQueue<Timer>,
    ) {
        if let Some(previous) = self.pending.remove(&key) {
            timers.cancel(previous.timer);
            debug!(key = %key, "Coalescing invalidation");
        }

        let at = now + self.delays.delay_for(priority);
        let timer = timers.schedule(at, Timer::Invalidate(key.clone()));
        self.pending.insert(
            key.clone(),
            PendingInvalidation {
                key,
                scheduled_at: at,
                priority,
                timer,
            },
        );
    }

    /// Called when a key's timer fires. Returns true if the refresh should be
    /// delivered, false if the timer was superseded.
    pub fn fire(&mut self, key: &InvalidationKey, timer: TimerId) -> bool {
        match self.pending.get(key) {
            Some(pending) if pending.timer == timer => {
                self.pending.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Cancel every pending refresh and return their keys
    pub fn drain(&mut self, timers: &mut DeadlineQueue<Timer>) -> Vec<InvalidationKey> {
        self.pending
            .drain()
            .map(|(key, pending)| {
                timers.cancel(pending.timer);
                key
            })
            .collect()
    }

    pub fn get(&self, key: &InvalidationKey) -> Option<&PendingInvalidation> {
        self.pending.get(key)
    }

}
