// ABOUTME: Connection pool - one shared live channel per watched resource
// ABOUTME: Enforces the concurrency cap, tracks subscriber refcounts and connection lifecycle

//! Connection pool.
//!
//! The pool owns at most one `PooledConnection` per resource and fans it out to
//! every subscription watching that resource.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                   ConnectionPool                       │
//! │  connections: HashMap<String, PooledConnection>        │
//! │     - jobs   -> Open       (3 subscribers)             │
//! │     - tours  -> Connecting (1 subscriber)              │
//! │     - crew   -> Errored    (2 subscribers, retrying)   │
//! │     - venues -> Closed     (0 subscribers, idle grace) │
//! │                                                        │
//! │  Connecting + Open <= max_connections                  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are never torn down on the last unsubscribe. They record
//! `idle_since` and the health sweep reaps them after the grace period.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::circuit_breaker::CircuitBreaker;
use super::deadline::TimerId;
use super::error::SubscriptionError;
use super::types::ChannelId;

/// Lifecycle of a pooled channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Errored,
    Closed,
}

impl ConnectionState {
    /// Counts against the pool cap
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// Shared channel for one resource
#[derive(Debug)]
pub struct PooledConnection {
    pub resource: String,
    pub channel: Option<ChannelId>,
    pub subscriber_count: usize,
    pub state: ConnectionState,

    /// Bumped on every connection attempt; stale results are discarded
    pub generation: u64,

    pub connect_started_at: Option<Instant>,

    /// Set when `subscriber_count` drops to zero
    pub idle_since: Option<Instant>,

    /// Pending requeue after hitting the cap
    pub requeue_timer: Option<TimerId>,

    forwarder: Option<AbortHandle>,
}

impl PooledConnection {
    fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            channel: None,
            subscriber_count: 0,
            state: ConnectionState::Closed,
            generation: 0,
            connect_started_at: None,
            idle_since: None,
            requeue_timer: None,
            forwarder: None,
        }
    }

    /// Stop event forwarding and hand back the channel to close
    pub fn teardown(&mut self) -> Option<ChannelId> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.state = ConnectionState::Closed;
        self.channel.take()
    }
}

/// What `begin_connect` decided for a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectDecision {
    /// Already open or connecting; nothing to do
    Live,
    /// Caller must open a channel tagged with this generation
    Start { generation: u64 },
    /// Cap reached; requeue after a delay
    AtCapacity,
    /// Breaker refused; park until it recovers
    CircuitOpen(SubscriptionError),
    /// No subscribers left for this resource
    Unused,
}

/// Bounded set of live backend channels keyed by resource
#[derive(Debug)]
pub struct ConnectionPool {
    connections: HashMap<String, PooledConnection>,
    max_connections: usize,
    next_generation: u64,
}

impl ConnectionPool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
            next_generation: 1,
        }
    }

    /// Add a subscriber to `resource`, creating its entry if needed.
    /// Returns the new subscriber count.
    pub fn attach(&mut self, resource: &str) -> usize {
        let entry = self
            .connections
            .entry(resource.to_string())
            .or_insert_with(|| PooledConnection::new(resource));
        entry.subscriber_count += 1;
        entry.idle_since = None;
        entry.subscriber_count
    }

    /// Remove a subscriber. The entry stays until the health sweep reaps it.
    pub fn detach(&mut self, resource: &str, now: Instant) -> usize {
        let Some(entry) = self.connections.get_mut(resource) else {
            return 0;
        };
        entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
        if entry.subscriber_count == 0 {
            debug!(resource = %resource, "Connection has no subscribers, idle grace started");
            entry.idle_since = Some(now);
        }
        entry.subscriber_count
    }

    /// Number of open or connecting channels
    pub fn live_count(&self) -> usize {
        self.connections.values().filter(|c| c.state.is_live()).count()
    }

    pub fn open_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Open)
            .count()
    }

    /// Decide whether to open a channel for `resource`, gated by the cap and
    /// the circuit breaker.
    pub fn begin_connect(
        &mut self,
        resource: &str,
        breaker: &mut CircuitBreaker,
        now: Instant,
    ) -> ConnectDecision {
        let live = self.live_count();
        let Some(entry) = self.connections.get_mut(resource) else {
            return ConnectDecision::Unused;
        };

        if entry.state.is_live() {
            return ConnectDecision::Live;
        }
        if entry.subscriber_count == 0 {
            return ConnectDecision::Unused;
        }
        if live >= self.max_connections {
            return ConnectDecision::AtCapacity;
        }
        if let Err(err) = breaker.try_acquire(now) {
            return ConnectDecision::CircuitOpen(err);
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        entry.state = ConnectionState::Connecting;
        entry.generation = generation;
        entry.connect_started_at = Some(now);
        debug!(resource = %resource, generation, "Opening pooled connection");

        ConnectDecision::Start { generation }
    }

    /// Record a successful open. Returns the creation latency, or `None` when
    /// the result belongs to a superseded attempt.
    pub fn connect_succeeded(
        &mut self,
        resource: &str,
        generation: u64,
        channel: ChannelId,
        now: Instant,
    ) -> Option<Duration> {
        let entry = self.current_mut(resource, generation)?;
        if entry.state != ConnectionState::Connecting {
            return None;
        }

        entry.state = ConnectionState::Open;
        entry.channel = Some(channel);
        let latency = entry
            .connect_started_at
            .take()
            .map_or(Duration::ZERO, |started| now.saturating_duration_since(started));

        info!(
            resource = %resource,
            subscribers = entry.subscriber_count,
            latency_ms = %latency.as_millis(),
            "Pooled connection open"
        );
        Some(latency)
    }

    /// Record a failed open. Returns false for superseded attempts.
    pub fn connect_failed(&mut self, resource: &str, generation: u64) -> bool {
        let Some(entry) = self.current_mut(resource, generation) else {
            return false;
        };
        if entry.state != ConnectionState::Connecting {
            return false;
        }
        entry.state = ConnectionState::Errored;
        entry.connect_started_at = None;
        true
    }

    /// Transport reported an error on an open channel. Returns `Some` with
    /// the channel to close when the event belongs to the current generation.
    pub fn channel_failed(&mut self, resource: &str, generation: u64) -> Option<Option<ChannelId>> {
        let entry = self.current_mut(resource, generation)?;
        if entry.state != ConnectionState::Open {
            return None;
        }
        let channel = entry.teardown();
        entry.state = ConnectionState::Errored;
        Some(channel)
    }

    /// Channel ended on the transport side
    pub fn channel_closed(&mut self, resource: &str, generation: u64) -> bool {
        let Some(entry) = self.current_mut(resource, generation) else {
            return false;
        };
        if entry.state != ConnectionState::Open {
            return false;
        }
        entry.teardown();
        true
    }

    /// Remember the task forwarding this generation's events
    pub fn set_forwarder(&mut self, resource: &str, generation: u64, forwarder: AbortHandle) {
        match self.current_mut(resource, generation) {
            Some(entry) => entry.forwarder = Some(forwarder),
            None => forwarder.abort(),
        }
    }

    /// Resources whose channel is errored or closed but still have subscribers
    pub fn needs_reconnect(&self) -> Vec<String> {
        let mut resources: Vec<String> = self
            .connections
            .values()
            .filter(|c| {
                c.subscriber_count > 0
                    && matches!(c.state, ConnectionState::Errored | ConnectionState::Closed)
            })
            .map(|c| c.resource.clone())
            .collect();
        resources.sort();
        resources
    }

    pub fn any_connecting(&self) -> bool {
        self.connections
            .values()
            .any(|c| c.state == ConnectionState::Connecting)
    }

    /// Remove entries with no subscribers idle for at least `grace`
    pub fn reap_idle(&mut self, now: Instant, grace: Duration) -> Vec<PooledConnection> {
        let expired: Vec<String> = self
            .connections
            .values()
            .filter(|c| {
                c.subscriber_count == 0
                    && c.state != ConnectionState::Connecting
                    && c.idle_since
                        .is_some_and(|idle| now.saturating_duration_since(idle) >= grace)
            })
            .map(|c| c.resource.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|resource| self.connections.remove(&resource))
            .collect()
    }

    /// Remove every entry (shutdown)
    pub fn drain(&mut self) -> Vec<PooledConnection> {
        self.connections.drain().map(|(_, c)| c).collect()
    }

    pub fn get(&self, resource: &str) -> Option<&PooledConnection> {
        self.connections.get(resource)
    }

    pub fn get_mut(&mut self, resource: &str) -> Option<&mut PooledConnection> {
        self.connections.get_mut(resource)
    }

    pub fn state_of(&self, resource: &str) -> Option<ConnectionState> {
        self.connections.get(resource).map(|c| c.state)
    }

    fn current_mut(&mut self, resource: &str, generation: u64) -> Option<&mut PooledConnection> {
        self.connections
            .get_mut(resource)
            .filter(|entry| entry.generation == generation)
    }
}
