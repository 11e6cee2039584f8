// ABOUTME: Process-wide circuit breaker guarding connection attempts
//
// Stops opening channels while the backend is failing and lets a single probe
// through after the cooldown. One instance per manager: the failure signal is
// about backend health in general, not about one resource.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::SubscriptionError;

// === Circuit Breaker State Machine ===

/// Circuit breaker state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, attempts flow through
    Closed,

    /// Attempts blocked until the cooldown expires
    Open {
        /// When to transition to `HalfOpen`
        until: Instant,
    },

    /// Testing whether the backend recovered
    HalfOpen {
        /// Probe attempts remaining before the outcome is known
        test_requests_remaining: u32,
    },
}

impl CircuitState {
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// State change worth reacting to elsewhere (recovery, deferred queue)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Opened {
        /// When the cooldown ends
        until: Instant,
    },
    HalfOpened,
    Closed,
}

// === Circuit Breaker Implementation ===

/// Circuit breaker protecting the backend from retry storms
///
/// State transitions:
/// - Closed -> Open: after `failure_threshold` consecutive failures
/// - Open -> `HalfOpen`: once `reset_timeout` has elapsed
/// - `HalfOpen` -> Closed: on the next success
/// - `HalfOpen` -> Open: on the next failure
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,

    /// Number of consecutive failures
    failure_count: u32,

    last_failure_at: Option<Instant>,

    /// Failures required to open circuit
    failure_threshold: u32,

    /// Cooldown before attempting recovery
    reset_timeout: Duration,

    /// Probe attempts allowed in half-open state
    half_open_max_requests: u32,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    ///
    /// # Arguments
    /// * `failure_threshold` - Consecutive failures before opening (default 5)
    /// * `reset_timeout` - Cooldown before half-open (default 30s)
    /// * `half_open_max_requests` - Probe attempts in half-open (typically 1)
    #[must_use]
    pub const fn new(
        failure_threshold: u32,
        reset_timeout: Duration,
        half_open_max_requests: u32,
    ) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            failure_threshold,
            reset_timeout,
            half_open_max_requests,
        }
    }

    /// Move Open -> `HalfOpen` if the cooldown has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<BreakerTransition> {
        match self.state {
            CircuitState::Open { until } if now >= until => {
                self.state = CircuitState::HalfOpen {
                    test_requests_remaining: self.half_open_max_requests,
                };
                info!("Circuit breaker half-open, probing backend");
                Some(BreakerTransition::HalfOpened)
            }
            _ => None,
        }
    }

    /// Check whether a connection attempt may be made, consuming a probe slot
    /// when half-open.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), SubscriptionError> {
        self.poll(now);

        match &mut self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { until } => Err(SubscriptionError::CircuitOpen { until: *until }),
            CircuitState::HalfOpen {
                test_requests_remaining,
            } => {
                if *test_requests_remaining > 0 {
                    *test_requests_remaining -= 1;
                    Ok(())
                } else {
                    // Probe in flight, wait for its result
                    Err(SubscriptionError::CircuitOpen {
                        until: now + self.reset_timeout,
                    })
                }
            }
        }
    }

    /// Record a successful connection
    ///
    /// Resets the failure count and closes a half-open breaker
    pub fn record_success(&mut self) -> Option<BreakerTransition> {
        self.failure_count = 0;

        if matches!(self.state, CircuitState::HalfOpen { .. }) {
            self.state = CircuitState::Closed;
            info!("Circuit breaker closed after successful probe");
            return Some(BreakerTransition::Closed);
        }
        None
    }

    /// Record a failed connection or a mid-life channel error
    pub fn record_failure(&mut self, now: Instant) -> Option<BreakerTransition> {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);

        match self.state {
            CircuitState::Closed if self.failure_count >= self.failure_threshold => {
                let until = now + self.reset_timeout;
                self.state = CircuitState::Open { until };
                warn!(
                    failures = self.failure_count,
                    cooldown_ms = %self.reset_timeout.as_millis(),
                    "Circuit breaker opened"
                );
                Some(BreakerTransition::Opened { until })
            }
            CircuitState::HalfOpen { .. } => {
                // Failed during recovery, back to Open
                let until = now + self.reset_timeout;
                self.state = CircuitState::Open { until };
                warn!("Circuit breaker probe failed, reopening");
                Some(BreakerTransition::Opened { until })
            }
            _ => {
                debug!(failures = self.failure_count, "Connection failure recorded");
                None
            }
        }
    }

    /// Force reset to Closed (manual recovery)
    pub fn reset(&mut self) -> Option<BreakerTransition> {
        self.failure_count = 0;
        let was_closed = matches!(self.state, CircuitState::Closed);
        self.state = CircuitState::Closed;
        (!was_closed).then_some(BreakerTransition::Closed)
    }

    pub const fn state(&self) -> &CircuitState {
        &self.state
    }

    pub const fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub const fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub const fn last_failure_at(&self) -> Option<Instant> {
        self.last_failure_at
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30), 1)
    }
}
