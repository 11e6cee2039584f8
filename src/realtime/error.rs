// ABOUTME: Error taxonomy for realtime subscriptions
//
// None of these escape subscribe()/unsubscribe(). They are logged, feed the
// circuit breaker, and show up in stats.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Failures of a pooled connection or of a single subscription
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// Channel creation exceeded the connect timeout
    #[error("Connection to '{resource}' timed out after {elapsed:?}")]
    ConnectionTimeout {
        /// Resource the channel was opened for
        resource: String,
        /// How long the attempt waited
        elapsed: Duration,
    },

    /// Transport reported an error while opening or mid-life
    #[error("Channel error on '{resource}': {message}")]
    Channel {
        /// Resource of the failing channel
        resource: String,
        /// Transport-provided description
        message: String,
    },

    /// Circuit breaker refused the attempt; the request is queued, never surfaced
    #[error("Circuit breaker open until {until:?}")]
    CircuitOpen {
        /// When the breaker will probe again
        until: Instant,
    },

    /// Subscription abandoned after exhausting its retry budget
    #[error("Subscription '{key}' abandoned after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Display form of the subscription key
        key: String,
        /// Attempts consumed
        attempts: u32,
    },
}

/// Errors raised at the transport collaborator boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Opening the channel failed
    #[error("Failed to open channel: {0}")]
    Open(String),

    /// Channel was already closed
    #[error("Channel closed")]
    Closed,

    /// Backend cannot be reached at all
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Invalid manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Invalidation delays must satisfy high < medium < low
    #[error("Priority delays must be strictly increasing (high < medium < low)")]
    PriorityDelaysOutOfOrder,

    /// A numeric limit that must be positive was zero
    #[error("'{0}' must be greater than zero")]
    Zero(&'static str),

    /// A duration exceeded the supported maximum
    #[error("'{field}' must not exceed {max_ms}ms")]
    TooLong {
        field: &'static str,
        max_ms: u64,
    },
}
