// ABOUTME: Recovery controller - reconnection after connectivity loss with backoff
//
// Reacts to online/offline and visibility transitions and to circuit breaker
// state changes. Drives reconnect passes with exponential backoff and jitter,
// and rate-limits the user-facing notifications it emits.
//
// State machine:
//   Idle -> Recovering -> Idle     (every connection restored)
//   Idle -> Recovering -> Failed   (attempts exhausted)
//   Failed -> Recovering           (next online / visible event)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::circuit_breaker::BreakerTransition;
use super::deadline::{DeadlineQueue, TimerId};
use super::engine::Timer;
use super::transport::NotificationSink;
use super::types::NotificationLevel;

const MSG_OFFLINE: &str = "Connection lost. Live updates are paused.";
const MSG_RESTORED: &str = "Connection restored. Live updates resumed.";
const MSG_GAVE_UP: &str = "Unable to restore live updates. Refresh to try again.";

// === Exponential Backoff ===

/// Exponential backoff: `min(max, base * factor^attempt * jitter)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
}

impl ExponentialBackoff {
    /// # Arguments
    /// * `base` - Delay for attempt 0
    /// * `max` - Delay cap
    /// * `factor` - Growth per attempt (2.0 for retries, 1.5 for reconnects)
    #[must_use]
    pub const fn new(base: Duration, max: Duration, factor: f64) -> Self {
        Self { base, max, factor }
    }

    /// Delay for `attempt` without jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.scaled(attempt, 1.0)
    }

    /// Delay for `attempt` with jitter in `[0.9, 1.1)`; `unit` is a uniform
    /// sample in `[0, 1)`
    pub fn jittered_delay_for(&self, attempt: u32, unit: f64) -> Duration {
        self.scaled(attempt, unit.clamp(0.0, 1.0).mul_add(0.2, 0.9))
    }

    fn scaled(&self, attempt: u32, multiplier: f64) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent) * multiplier;
        let capped = secs.min(self.max.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max
        }
    }
}

// === Rate-limited Notifier ===

/// Forwards notifications to the sink at most once per cooldown window
pub struct RateLimitedNotifier {
    sink: Arc<dyn NotificationSink>,
    cooldown: Duration,
    last_sent: Option<Instant>,
    suppressed: u64,
}

impl fmt::Debug for RateLimitedNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedNotifier")
            .field("cooldown", &self.cooldown)
            .field("last_sent", &self.last_sent)
            .field("suppressed", &self.suppressed)
            .finish_non_exhaustive()
    }
}

impl RateLimitedNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>, cooldown: Duration) -> Self {
        Self {
            sink,
            cooldown,
            last_sent: None,
            suppressed: 0,
        }
    }

    /// Send unless another notification went out within the cooldown.
    /// Returns whether it was sent.
    pub fn notify(&mut self, message: &str, level: NotificationLevel, now: Instant) -> bool {
        if let Some(last) = self.last_sent {
            if now.saturating_duration_since(last) < self.cooldown {
                self.suppressed += 1;
                debug!(notification = %message, "Notification suppressed by cooldown");
                return false;
            }
        }
        self.last_sent = Some(now);
        self.sink.notify(message, level);
        true
    }

    pub const fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

// === Recovery Controller ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    Recovering,
    Failed,
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Recovering => "recovering",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct RecoveryController {
    state: RecoveryState,
    attempt: u32,
    max_attempts: u32,
    online: bool,
    hidden: bool,
    reconnect_timer: Option<TimerId>,
    backoff: ExponentialBackoff,
    notifier: RateLimitedNotifier,
}

impl RecoveryController {
    pub const fn new(
        backoff: ExponentialBackoff,
        max_attempts: u32,
        notifier: RateLimitedNotifier,
        online: bool,
    ) -> Self {
        Self {
            state: RecoveryState::Idle,
            attempt: 0,
            max_attempts,
            online,
            hidden: false,
            reconnect_timer: None,
            backoff,
            notifier,
        }
    }

    /// Network went away: stop reconnecting until it returns
    pub fn on_offline(&mut self, now: Instant, timers: &mut DeadlineQueue<Timer>) {
        if !self.online {
            return;
        }
        self.online = false;
        self.cancel_reconnect(timers);
        warn!("Network offline, suspending connection attempts");
        self.notifier.notify(MSG_OFFLINE, NotificationLevel::Error, now);
    }

    /// Network is back. Returns true when a reconnect pass should run now.
    pub fn on_online(&mut self, timers: &mut DeadlineQueue<Timer>) -> bool {
        self.online = true;
        self.begin_recovery(timers);
        true
    }

    pub fn on_hidden(&mut self) {
        self.hidden = true;
    }

    /// Tab became visible. Returns true when a reconnect pass should run now.
    pub fn on_visible(&mut self, timers: &mut DeadlineQueue<Timer>) -> bool {
        if !self.hidden {
            return false;
        }
        self.hidden = false;
        if !self.online {
            return false;
        }
        self.begin_recovery(timers);
        true
    }

    /// React to a breaker transition. Returns true when a reconnect pass
    /// should run now. Backend outages are logged, never surfaced to the user.
    pub fn on_breaker(&mut self, transition: BreakerTransition) -> bool {
        match transition {
            BreakerTransition::Opened { .. } => {
                warn!("Realtime backend unavailable, connections paused");
                false
            }
            BreakerTransition::HalfOpened => false,
            BreakerTransition::Closed => self.online,
        }
    }

    /// Reconnect timer fired. Returns true when a pass should run.
    pub fn on_reconnect_timer(&mut self) -> bool {
        self.reconnect_timer = None;
        self.online && self.state == RecoveryState::Recovering
    }

    /// Evaluate progress after a pass or a connection result.
    ///
    /// * `outstanding` - connections still errored, closed or parked
    /// * `connecting` - attempts still in flight
    /// * `unit` - uniform sample in `[0, 1)` for jitter
    pub fn evaluate(
        &mut self,
        outstanding: bool,
        connecting: bool,
        now: Instant,
        timers: &mut DeadlineQueue<Timer>,
        unit: f64,
    ) {
        if self.state != RecoveryState::Recovering {
            return;
        }
        if !outstanding && !connecting {
            info!(attempts = self.attempt, "Realtime connections restored");
            self.state = RecoveryState::Idle;
            self.attempt = 0;
            self.cancel_reconnect(timers);
            self.notifier
                .notify(MSG_RESTORED, NotificationLevel::Success, now);
            return;
        }
        if outstanding && !connecting && self.reconnect_timer.is_none() {
            self.schedule_retry(now, timers, unit);
        }
    }

    /// Schedule the next reconnect pass, or give up after `max_attempts`
    pub fn schedule_retry(&mut self, now: Instant, timers: &mut DeadlineQueue<Timer>, unit: f64) {
        if !self.online {
            return;
        }
        if self.attempt >= self.max_attempts {
            error!(attempts = self.attempt, "Giving up on realtime recovery");
            self.state = RecoveryState::Failed;
            self.cancel_reconnect(timers);
            self.notifier.notify(MSG_GAVE_UP, NotificationLevel::Error, now);
            return;
        }

        let delay = self.backoff.jittered_delay_for(self.attempt, unit);
        self.attempt += 1;
        self.reconnect_timer = Some(timers.schedule(now + delay, Timer::Reconnect));
        debug!(
            attempt = self.attempt,
            delay_ms = %delay.as_millis(),
            "Reconnect pass scheduled"
        );
    }

    fn begin_recovery(&mut self, timers: &mut DeadlineQueue<Timer>) {
        self.cancel_reconnect(timers);
        self.attempt = 0;
        self.state = RecoveryState::Recovering;
        info!("Starting realtime recovery");
    }

    fn cancel_reconnect(&mut self, timers: &mut DeadlineQueue<Timer>) {
        if let Some(timer) = self.reconnect_timer.take() {
            timers.cancel(timer);
        }
    }

    pub const fn state(&self) -> RecoveryState {
        self.state
    }

    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub const fn is_online(&self) -> bool {
        self.online
    }


}
