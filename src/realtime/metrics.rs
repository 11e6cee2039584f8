// ABOUTME: Metrics and observability for the realtime connection pool
//
// Tracks:
// - Connections: opened, failed, torn down
// - Creation latency: rolling window of recent samples
// - Subscriptions: abandoned after exhausting retries
// - Invalidations delivered downstream

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pool-level counters, owned by the manager task
#[derive(Debug)]
pub struct PoolMetrics {
    pub connections_opened: u64,
    pub failed_connections: u64,
    pub connections_torn_down: u64,
    pub invalidations_delivered: u64,
    pub abandoned_total: u64,
    latency_samples: VecDeque<Duration>,
    latency_window: usize,
}

impl PoolMetrics {
    pub fn new(latency_window: usize) -> Self {
        Self {
            connections_opened: 0,
            failed_connections: 0,
            connections_torn_down: 0,
            invalidations_delivered: 0,
            abandoned_total: 0,
            latency_samples: VecDeque::with_capacity(latency_window),
            latency_window: latency_window.max(1),
        }
    }

    pub fn connection_opened(&mut self, latency: Duration) {
        self.connections_opened += 1;
        if self.latency_samples.len() == self.latency_window {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency);
    }

    pub fn connection_failed(&mut self) {
        self.failed_connections += 1;
    }

    pub fn connection_torn_down(&mut self) {
        self.connections_torn_down += 1;
    }

    pub fn invalidation_delivered(&mut self) {
        self.invalidations_delivered += 1;
    }

    pub fn subscription_abandoned(&mut self) {
        self.abandoned_total += 1;
    }

    /// Rolling average over the retained samples
    pub fn average_latency(&self) -> Duration {
        let count = u32::try_from(self.latency_samples.len()).unwrap_or(u32::MAX);
        if count == 0 {
            Duration::ZERO
        } else {
            self.latency_samples.iter().sum::<Duration>() / count
        }
    }

}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Read-only snapshot returned by `RealtimeManager::stats()`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Open pooled channels
    pub active_connections: usize,
    /// Subscriptions waiting for admission, capacity or the breaker
    pub queued_subscriptions: usize,
    /// Connection failures (creation timeouts and channel errors)
    pub failed_connections: u64,
    /// Rolling average connection-creation latency in milliseconds
    pub average_response_time_ms: u64,
    /// Records in the registry, abandoned ones included
    pub subscription_count: usize,
    /// Subscriptions that exhausted their retry budget
    pub abandoned_subscriptions: usize,
    pub circuit_breaker_open: bool,
    /// Average latency above the warning threshold
    pub degraded: bool,
    pub recovery_state: String,
    pub reconnect_attempts: u32,
    pub last_health_check: Option<DateTime<Utc>>,
}
