// ABOUTME: Health checking for the realtime pool with a fixed sweep interval
// ABOUTME: Evicts stale subscriptions, reaps idle connections and watches creation latency

//! Health checking for the realtime pool.
//!
//! Every sweep (default 60s):
//! - Subscriptions idle past the stale threshold (default 10 minutes) are evicted
//! - Connections with no subscribers past the idle grace are torn down
//! - The rolling connection-creation latency is recomputed; above the warning
//!   threshold (default 2000ms) the pool is reported degraded
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    HealthChecker                        │
//! │                                                         │
//! │  ┌──────────────┐    ┌──────────────┐                   │
//! │  │ Sweep Timer  │───▶│ Stale Record │                   │
//! │  │ (interval)   │    │   Eviction   │                   │
//! │  └──────────────┘    └──────────────┘                   │
//! │          │                   │                          │
//! │          │                   ▼                          │
//! │          │           ┌──────────────┐                   │
//! │          │           │ Idle Channel │                   │
//! │          │           │   Teardown   │                   │
//! │          │           └──────────────┘                   │
//! │          ▼                                              │
//! │  ┌──────────────┐                                       │
//! │  │   Latency    │                                       │
//! │  │   Average    │                                       │
//! │  └──────────────┘                                       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The sweep itself runs inside the manager task, which owns the registry and
//! pool; this module holds the schedule and turns the sweep's findings into a
//! `HealthReport`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::deadline::{DeadlineQueue, TimerId};
use super::engine::Timer;
use super::metrics::PoolMetrics;

// === Health Status ===

/// Overall health of the realtime pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Everything connected, latency within bounds
    Healthy,

    /// Recoverable trouble: errored connections or slow channel creation
    Degraded {
        /// Resources whose connection is errored or closed with subscribers
        errored: Vec<String>,
        /// Latency above the warning threshold
        slow: bool,
    },

    /// Subscriptions abandoned after exhausting their retries
    Critical {
        /// Display form of the abandoned subscription keys
        abandoned: Vec<String>,
    },
}

/// Result of one sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Subscriptions removed for inactivity
    pub evicted: Vec<String>,
    /// Resources whose idle connection was torn down
    pub torn_down: Vec<String>,
    pub average_latency_ms: u64,
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
}

// === Health Checker ===

#[derive(Debug)]
pub struct HealthChecker {
    interval: Duration,
    stale_threshold: Duration,
    idle_grace: Duration,
    slow_latency_warning: Duration,
    sweep_timer: Option<TimerId>,
    last_check: Option<DateTime<Utc>>,
    degraded: bool,
}

impl HealthChecker {
    pub const fn new(
        interval: Duration,
        stale_threshold: Duration,
        idle_grace: Duration,
        slow_latency_warning: Duration,
    ) -> Self {
        Self {
            interval,
            stale_threshold,
            idle_grace,
            slow_latency_warning,
            sweep_timer: None,
            last_check: None,
            degraded: false,
        }
    }

    /// Arm the next periodic sweep
    pub fn schedule_next(&mut self, now: Instant, timers: &mut DeadlineQueue<Timer>) {
        if let Some(previous) = self.sweep_timer.take() {
            timers.cancel(previous);
        }
        self.sweep_timer = Some(timers.schedule(now + self.interval, Timer::HealthSweep));
        debug!(interval_ms = %self.interval.as_millis(), "Health sweep scheduled");
    }

    /// Build the report for a completed sweep and log the outcome
    pub fn finish_sweep(
        &mut self,
        evicted: Vec<String>,
        torn_down: Vec<String>,
        errored: Vec<String>,
        abandoned: Vec<String>,
        metrics: &PoolMetrics,
    ) -> HealthReport {
        let average = metrics.average_latency();
        self.degraded = average > self.slow_latency_warning;

        if self.degraded {
            warn!(
                average_ms = %average.as_millis(),
                threshold_ms = %self.slow_latency_warning.as_millis(),
                "Connection creation latency degraded"
            );
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted stale subscriptions");
        }
        if !torn_down.is_empty() {
            info!(count = torn_down.len(), resources = ?torn_down, "Tore down idle connections");
        }

        let status = Self::aggregate_health_status(errored, abandoned, self.degraded);
        match &status {
            HealthStatus::Healthy => debug!("Realtime pool healthy"),
            HealthStatus::Degraded { errored, slow } => {
                warn!(errored = ?errored, slow, "Realtime pool degraded");
            }
            HealthStatus::Critical { abandoned } => {
                error!(
                    abandoned_count = abandoned.len(),
                    abandoned = ?abandoned,
                    "Critical: subscriptions abandoned"
                );
            }
        }

        let checked_at = Utc::now();
        self.last_check = Some(checked_at);

        HealthReport {
            evicted,
            torn_down,
            average_latency_ms: u64::try_from(average.as_millis()).unwrap_or(u64::MAX),
            status,
            checked_at,
        }
    }

    /// Abandoned subscriptions dominate errored connections, which dominate
    /// slow latency.
    #[must_use]
    pub fn aggregate_health_status(
        errored: Vec<String>,
        abandoned: Vec<String>,
        slow: bool,
    ) -> HealthStatus {
        if !abandoned.is_empty() {
            HealthStatus::Critical { abandoned }
        } else if !errored.is_empty() || slow {
            HealthStatus::Degraded { errored, slow }
        } else {
            HealthStatus::Healthy
        }
    }

    pub const fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    pub const fn idle_grace(&self) -> Duration {
        self.idle_grace
    }

    pub const fn last_check(&self) -> Option<DateTime<Utc>> {
        self.last_check
    }

    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }
}
