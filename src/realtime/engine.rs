// ABOUTME: Single-writer state machine behind the realtime manager
// ABOUTME: Owns registry, pool, breaker, schedulers and timers; runs as one tokio task

//! The manager's actor.
//!
//! Every mutable structure lives here and is touched only by the actor task,
//! so no locks are needed. Three inputs drive it:
//!
//! ```text
//!   RealtimeManager ──Command──▶ ┌────────────┐ ◀──Internal── connect tasks
//!                                │   Engine   │ ◀──Internal── channel forwarders
//!   DeadlineQueue<Timer> ──────▶ └────────────┘ ◀──Internal── reachability probe
//! ```
//!
//! Work that suspends (opening a channel, forwarding its events, probing the
//! network) runs in spawned tasks that report back through `Internal`
//! messages tagged with the connection generation they belong to.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::admission::AdmissionBatcher;
use super::circuit_breaker::{BreakerTransition, CircuitBreaker};
use super::config::ManagerConfig;
use super::deadline::{DeadlineQueue, TimerId};
use super::error::SubscriptionError;
use super::health::{HealthChecker, HealthReport};
use super::invalidation::InvalidationScheduler;
use super::metrics::{ConnectionStats, PoolMetrics};
use super::pool::{ConnectDecision, ConnectionPool, ConnectionState};
use super::recovery::{ExponentialBackoff, RateLimitedNotifier, RecoveryController};
use super::registry::{Registration, SubscriptionRegistry, SubscriptionState};
use super::transport::{Channel, InvalidationSink, NotificationSink, ReachabilityProbe, Transport};
use super::types::{
    ChannelEvent, ChannelId, ConnectivitySignal, InvalidationKey, Priority, SubscriptionKey,
};

/// Everything the manager schedules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    /// Admission debounce elapsed or next batch due
    AdmissionTick,
    /// Retry a connection refused by the pool cap
    PoolRequeue { resource: String },
    /// Per-subscription retry after a connection failure
    Retry(SubscriptionKey),
    /// Coalesced invalidation ready to fire
    Invalidate(InvalidationKey),
    HealthSweep,
    /// Breaker cooldown elapsed
    BreakerProbe,
    /// Next recovery pass
    Reconnect,
}

/// Requests from the façade
#[derive(Debug)]
pub(crate) enum Command {
    Subscribe {
        key: SubscriptionKey,
        priority: Priority,
    },
    Unsubscribe(SubscriptionKey),
    ForceRefresh,
    Connectivity(ConnectivitySignal),
    Stats(oneshot::Sender<ConnectionStats>),
    HealthCheck(oneshot::Sender<HealthReport>),
    Shutdown(oneshot::Sender<()>),
}

/// Results reported by tasks the engine spawned
#[derive(Debug)]
pub(crate) enum Internal {
    Connected {
        resource: String,
        generation: u64,
        result: Result<Channel, SubscriptionError>,
    },
    Event {
        resource: String,
        generation: u64,
        event: ChannelEvent,
    },
    StreamEnded {
        resource: String,
        generation: u64,
    },
    Probe(bool),
}

/// External capabilities injected into the engine
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub reachability: Arc<dyn ReachabilityProbe>,
    pub invalidation: Arc<dyn InvalidationSink>,
    pub notifications: Arc<dyn NotificationSink>,
}

pub(crate) struct Engine {
    config: ManagerConfig,
    registry: SubscriptionRegistry,
    pool: ConnectionPool,
    admission: AdmissionBatcher,
    breaker: CircuitBreaker,
    invalidations: InvalidationScheduler,
    health: HealthChecker,
    recovery: RecoveryController,
    metrics: PoolMetrics,
    timers: DeadlineQueue<Timer>,
    retry_backoff: ExponentialBackoff,

    /// Resources refused by the open breaker or held back while offline
    deferred: VecDeque<String>,
    breaker_timer: Option<TimerId>,

    transport: Arc<dyn Transport>,
    reachability: Arc<dyn ReachabilityProbe>,
    invalidation_sink: Arc<dyn InvalidationSink>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl Engine {
    pub fn new(
        config: ManagerConfig,
        collaborators: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let online = collaborators.reachability.is_online();

        let recovery = RecoveryController::new(
            ExponentialBackoff::new(
                config.reconnect_backoff_base,
                config.reconnect_backoff_max,
                config.reconnect_backoff_factor,
            ),
            config.max_reconnect_attempts,
            RateLimitedNotifier::new(collaborators.notifications, config.notification_cooldown),
            online,
        );

        let engine = Self {
            registry: SubscriptionRegistry::new(),
            pool: ConnectionPool::new(config.max_connections),
            admission: AdmissionBatcher::new(
                config.admission_debounce,
                config.admission_batch_size,
                config.admission_batch_delay,
            ),
            breaker: CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_reset,
                config.half_open_max_requests,
            ),
            invalidations: InvalidationScheduler::new(config.priority_delays()),
            health: HealthChecker::new(
                config.health_check_interval,
                config.stale_threshold,
                config.idle_grace,
                config.slow_latency_warning,
            ),
            recovery,
            metrics: PoolMetrics::new(config.latency_window),
            timers: DeadlineQueue::new(),
            retry_backoff: ExponentialBackoff::new(
                config.retry_backoff_base,
                config.retry_backoff_max,
                2.0,
            ),
            deferred: VecDeque::new(),
            breaker_timer: None,
            transport: collaborators.transport,
            reachability: collaborators.reachability,
            invalidation_sink: collaborators.invalidation,
            internal_tx,
            config,
        };
        (engine, internal_rx)
    }

    /// Actor loop. Returns after `Shutdown` or once every façade handle is gone.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        self.health.schedule_next(Instant::now(), &mut self.timers);
        info!(
            max_connections = self.config.max_connections,
            online = self.recovery.is_online(),
            "Realtime manager started"
        );

        loop {
            self.fire_due_timers();
            let deadline = self.timers.next_deadline();

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(message) = internal.recv() => {
                    self.handle_internal(message);
                    // Reports already queued belong to the same tick
                    while let Ok(message) = internal.try_recv() {
                        self.handle_internal(message);
                    }
                }
                () = sleep_until(deadline) => {}
            }
        }

        info!("Realtime manager stopped");
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        while let Some((id, timer)) = self.timers.pop_due(now) {
            self.handle_timer(id, timer, now);
        }
    }

    // === Commands ===

    pub fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Subscribe { key, priority } => self.subscribe(key, priority, now),
            Command::Unsubscribe(key) => self.unsubscribe(&key, now),
            Command::ForceRefresh => self.force_refresh(now),
            Command::Connectivity(signal) => self.connectivity(signal, now),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::HealthCheck(reply) => {
                let report = self.health_sweep(now);
                let _ = reply.send(report);
            }
            // Handled by the run loop
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn subscribe(&mut self, key: SubscriptionKey, priority: Priority, now: Instant) {
        if self.registry.register(key.clone(), priority, now) == Registration::Existing {
            debug!(key = %key, "Subscription already registered");
            return;
        }

        debug!(key = %key, priority = %priority, "Subscription registered");
        if priority == Priority::High {
            self.admit(&key, now);
        } else {
            self.admission.enqueue(key, now, &mut self.timers);
        }
    }

    fn unsubscribe(&mut self, key: &SubscriptionKey, now: Instant) {
        self.admission.remove(key);
        if self.release(key, now) {
            debug!(key = %key, "Unsubscribed");
        }
    }

    /// Remove a record and drop its reference on the pooled connection
    fn release(&mut self, key: &SubscriptionKey, now: Instant) -> bool {
        let Some(record) = self.registry.remove(key) else {
            return false;
        };
        if let Some(timer) = record.retry_timer {
            self.timers.cancel(timer);
        }
        if record.attached {
            self.pool.detach(record.resource(), now);
        }
        true
    }

    /// Attach an admitted record to its resource's connection
    fn admit(&mut self, key: &SubscriptionKey, now: Instant) {
        let Some(record) = self.registry.get_mut(key) else {
            return;
        };
        if record.attached || record.abandoned {
            return;
        }
        record.attached = true;

        let resource = key.resource.clone();
        let subscribers = self.pool.attach(&resource);
        if self.pool.state_of(&resource) == Some(ConnectionState::Open) {
            record.state = SubscriptionState::Active;
            record.last_activity_at = now;
        }
        debug!(resource = %resource, subscribers, "Subscription admitted");

        self.ensure_connected(&resource, now);
    }

    fn force_refresh(&mut self, now: Instant) {
        info!("Forced refresh requested");

        if let Some(timer) = self.breaker_timer.take() {
            self.timers.cancel(timer);
        }
        if let Some(transition) = self.breaker.reset() {
            self.on_breaker_transition(transition, now);
        }

        let mut revived = Vec::new();
        for record in self.registry.records_mut() {
            record.retry_count = 0;
            if let Some(timer) = record.retry_timer.take() {
                self.timers.cancel(timer);
            }
            if record.abandoned {
                record.abandoned = false;
                record.state = SubscriptionState::Pending;
                revived.push(record.key.clone());
            }
        }
        for key in &revived {
            self.admit(key, now);
        }

        let mut keys: BTreeSet<InvalidationKey> =
            self.invalidations.drain(&mut self.timers).into_iter().collect();
        keys.extend(self.registry.records().map(|r| r.invalidation_key().clone()));
        for key in &keys {
            self.deliver_invalidation(key);
        }

        let mut targets: Vec<String> = self.deferred.drain(..).collect();
        for resource in self.pool.needs_reconnect() {
            if !targets.contains(&resource) {
                targets.push(resource);
            }
        }
        for resource in &targets {
            self.ensure_connected(resource, now);
        }

        info!(
            invalidated = keys.len(),
            revived = revived.len(),
            reconnecting = targets.len(),
            "Forced refresh complete"
        );
    }

    fn connectivity(&mut self, signal: ConnectivitySignal, now: Instant) {
        debug!(signal = ?signal, "Connectivity signal");
        let run_pass = match signal {
            ConnectivitySignal::Offline => {
                self.recovery.on_offline(now, &mut self.timers);
                false
            }
            ConnectivitySignal::Online => self.recovery.on_online(&mut self.timers),
            ConnectivitySignal::Hidden => {
                self.recovery.on_hidden();
                false
            }
            ConnectivitySignal::Visible => self.recovery.on_visible(&mut self.timers),
        };
        if run_pass {
            self.reconnect_pass(now);
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        let average = self.metrics.average_latency();
        let queued_subscriptions = self
            .registry
            .records()
            .filter(|r| {
                r.state == SubscriptionState::Pending
                    && !r.abandoned
                    && self.pool.state_of(r.resource()) != Some(ConnectionState::Connecting)
            })
            .count();

        ConnectionStats {
            active_connections: self.pool.open_count(),
            queued_subscriptions,
            failed_connections: self.metrics.failed_connections,
            average_response_time_ms: u64::try_from(average.as_millis()).unwrap_or(u64::MAX),
            subscription_count: self.registry.len(),
            abandoned_subscriptions: self.registry.abandoned_count(),
            circuit_breaker_open: self.breaker.is_open(),
            degraded: self.health.is_degraded(),
            recovery_state: self.recovery.state().to_string(),
            reconnect_attempts: self.recovery.attempt(),
            last_health_check: self.health.last_check(),
        }
    }

    // === Connections ===

    /// Open `resource`'s channel if it has subscribers and nothing blocks it.
    /// Returns false when there was nothing to do (already live or unused).
    fn ensure_connected(&mut self, resource: &str, now: Instant) -> bool {
        if !self.recovery.is_online() {
            debug!(resource = %resource, "Offline, deferring connection");
            self.defer(resource);
            return true;
        }

        match self.pool.begin_connect(resource, &mut self.breaker, now) {
            ConnectDecision::Start { generation } => self.spawn_connect(resource, generation),
            ConnectDecision::AtCapacity => self.requeue(resource, now),
            ConnectDecision::CircuitOpen(err) => {
                debug!(resource = %resource, error = %err, "Connection deferred");
                self.defer(resource);
            }
            ConnectDecision::Live | ConnectDecision::Unused => return false,
        }
        true
    }

    fn defer(&mut self, resource: &str) {
        if !self.deferred.iter().any(|r| r == resource) {
            self.deferred.push_back(resource.to_string());
        }
    }

    fn requeue(&mut self, resource: &str, now: Instant) {
        let at = now + self.config.requeue_delay;
        let Some(entry) = self.pool.get_mut(resource) else {
            return;
        };
        if entry.requeue_timer.is_some() {
            return;
        }
        entry.requeue_timer = Some(self.timers.schedule(
            at,
            Timer::PoolRequeue {
                resource: resource.to_string(),
            },
        ));
        debug!(resource = %resource, "Pool at capacity, requeued");
    }

    fn spawn_connect(&self, resource: &str, generation: u64) {
        let transport = Arc::clone(&self.transport);
        let tx = self.internal_tx.clone();
        let timeout = self.config.connect_timeout;
        let resource = resource.to_string();

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.open_channel(&resource)).await
            {
                Ok(Ok(channel)) => Ok(channel),
                Ok(Err(err)) => Err(SubscriptionError::Channel {
                    resource: resource.clone(),
                    message: err.to_string(),
                }),
                Err(_) => Err(SubscriptionError::ConnectionTimeout {
                    resource: resource.clone(),
                    elapsed: timeout,
                }),
            };

            let message = Internal::Connected {
                resource,
                generation,
                result,
            };
            // Manager gone: release the channel instead of leaking it
            if let Err(mpsc::error::SendError(Internal::Connected {
                result: Ok(channel),
                ..
            })) = tx.send(message)
            {
                let _ = transport.close_channel(channel.id).await;
            }
        });
    }

    fn spawn_forwarder(
        &mut self,
        resource: &str,
        generation: u64,
        mut events: BoxStream<'static, ChannelEvent>,
    ) {
        let tx = self.internal_tx.clone();
        let name = resource.to_string();

        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let message = Internal::Event {
                    resource: name.clone(),
                    generation,
                    event,
                };
                if tx.send(message).is_err() {
                    return;
                }
            }
            let _ = tx.send(Internal::StreamEnded {
                resource: name,
                generation,
            });
        });

        self.pool
            .set_forwarder(resource, generation, handle.abort_handle());
    }

    fn close_channel(&self, channel: ChannelId) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(err) = transport.close_channel(channel).await {
                debug!(channel = %channel, error = %err, "Channel close failed");
            }
        });
    }

    /// Feed a connection failure to the breaker and schedule retries for the
    /// resource's subscribers
    fn connection_failed(&mut self, resource: &str, now: Instant) {
        self.metrics.connection_failed();
        if let Some(transition) = self.breaker.record_failure(now) {
            self.on_breaker_transition(transition, now);
        }

        for key in self.registry.attached_for_resource(resource) {
            let Some(record) = self.registry.get_mut(&key) else {
                continue;
            };
            record.retry_count += 1;
            record.state = SubscriptionState::Pending;
            if let Some(timer) = record.retry_timer.take() {
                self.timers.cancel(timer);
            }

            if record.retry_count >= self.config.max_retries {
                let attempts = record.retry_count;
                self.abandon(&key, attempts, now);
                continue;
            }

            let delay = self.retry_backoff.delay_for(record.retry_count - 1);
            record.retry_timer = Some(self.timers.schedule(now + delay, Timer::Retry(key.clone())));
            debug!(
                key = %key,
                attempt = record.retry_count,
                delay_ms = %delay.as_millis(),
                "Subscription retry scheduled"
            );
        }
    }

    fn abandon(&mut self, key: &SubscriptionKey, attempts: u32, now: Instant) {
        let Some(record) = self.registry.get_mut(key) else {
            return;
        };
        record.abandoned = true;
        if record.attached {
            record.attached = false;
            self.pool.detach(&key.resource, now);
        }
        self.metrics.subscription_abandoned();

        let err = SubscriptionError::MaxRetriesExceeded {
            key: key.to_string(),
            attempts,
        };
        warn!(key = %key, error = %err, "Subscription abandoned");
    }

    fn on_breaker_transition(&mut self, transition: BreakerTransition, now: Instant) {
        match transition {
            BreakerTransition::Opened { until } => {
                if let Some(timer) = self.breaker_timer.take() {
                    self.timers.cancel(timer);
                }
                self.breaker_timer = Some(self.timers.schedule(until, Timer::BreakerProbe));
            }
            BreakerTransition::HalfOpened => {}
            BreakerTransition::Closed => {
                if let Some(timer) = self.breaker_timer.take() {
                    self.timers.cancel(timer);
                }
            }
        }

        if self.recovery.on_breaker(transition) {
            self.drain_deferred(now);
        }
    }

    fn drain_deferred(&mut self, now: Instant) {
        let parked: Vec<String> = self.deferred.drain(..).collect();
        for resource in &parked {
            self.ensure_connected(resource, now);
        }
    }

    /// Hand the half-open trial slot to the first parked resource that still
    /// needs a channel. Unsubscribed or already live entries are skipped.
    fn release_one_deferred(&mut self, now: Instant) {
        while let Some(resource) = self.deferred.pop_front() {
            if self.ensure_connected(&resource, now) {
                break;
            }
        }
    }

    /// Reconnect everything that lost its channel and still has subscribers
    fn reconnect_pass(&mut self, now: Instant) {
        let mut targets: Vec<String> = self.deferred.drain(..).collect();
        for resource in self.pool.needs_reconnect() {
            if !targets.contains(&resource) {
                targets.push(resource);
            }
        }
        info!(
            attempt = self.recovery.attempt(),
            resources = targets.len(),
            "Reconnect pass"
        );
        for resource in &targets {
            self.ensure_connected(resource, now);
        }
        self.evaluate_recovery(now);
    }

    fn evaluate_recovery(&mut self, now: Instant) {
        // Abandoned subscriptions count until a forced refresh revives them
        let outstanding = !self.deferred.is_empty()
            || !self.pool.needs_reconnect().is_empty()
            || self.registry.abandoned_count() > 0;
        let connecting = self.pool.any_connecting();
        self.recovery.evaluate(
            outstanding,
            connecting,
            now,
            &mut self.timers,
            rand::random::<f64>(),
        );
    }

    // === Internal messages ===

    pub fn handle_internal(&mut self, message: Internal) {
        let now = Instant::now();
        match message {
            Internal::Connected {
                resource,
                generation,
                result,
            } => self.on_connected(&resource, generation, result, now),
            Internal::Event {
                resource,
                generation,
                event,
            } => self.on_channel_event(&resource, generation, event, now),
            Internal::StreamEnded {
                resource,
                generation,
            } => self.on_channel_closed(&resource, generation, now),
            Internal::Probe(online) => {
                if online {
                    self.reconnect_pass(now);
                } else {
                    debug!("Reachability probe failed");
                    self.recovery
                        .schedule_retry(now, &mut self.timers, rand::random::<f64>());
                }
            }
        }
    }

    fn on_connected(
        &mut self,
        resource: &str,
        generation: u64,
        result: Result<Channel, SubscriptionError>,
        now: Instant,
    ) {
        match result {
            Ok(channel) => {
                let Some(latency) =
                    self.pool
                        .connect_succeeded(resource, generation, channel.id, now)
                else {
                    debug!(resource = %resource, generation, "Discarding superseded channel");
                    self.close_channel(channel.id);
                    return;
                };

                self.metrics.connection_opened(latency);
                if let Some(transition) = self.breaker.record_success() {
                    self.on_breaker_transition(transition, now);
                }
                self.registry.activate_resource(resource, now);
                self.spawn_forwarder(resource, generation, channel.events);
            }
            Err(err) => {
                if !self.pool.connect_failed(resource, generation) {
                    return;
                }
                warn!(resource = %resource, error = %err, "Connection attempt failed");
                self.connection_failed(resource, now);
            }
        }
        self.evaluate_recovery(now);
    }

    fn on_channel_event(
        &mut self,
        resource: &str,
        generation: u64,
        event: ChannelEvent,
        now: Instant,
    ) {
        let current = self.pool.get(resource).is_some_and(|c| {
            c.generation == generation && c.state == ConnectionState::Open
        });
        if !current {
            return;
        }

        match event {
            ChannelEvent::Subscribed => {
                debug!(resource = %resource, "Channel subscribed");
            }
            ChannelEvent::Change(change) => {
                let targets = self.registry.touch_resource(resource, now);
                debug!(
                    resource = %resource,
                    kind = ?change.kind,
                    keys = targets.len(),
                    "Change received"
                );
                for (key, priority) in targets {
                    self.invalidations
                        .schedule(key, priority, now, &mut self.timers);
                }
            }
            ChannelEvent::Error(message) => {
                let Some(channel) = self.pool.channel_failed(resource, generation) else {
                    return;
                };
                if let Some(id) = channel {
                    self.close_channel(id);
                }
                let err = SubscriptionError::Channel {
                    resource: resource.to_string(),
                    message,
                };
                warn!(resource = %resource, error = %err, "Channel failed");
                self.connection_failed(resource, now);
                self.evaluate_recovery(now);
            }
            ChannelEvent::Closed => self.on_channel_closed(resource, generation, now),
        }
    }

    fn on_channel_closed(&mut self, resource: &str, generation: u64, now: Instant) {
        if !self.pool.channel_closed(resource, generation) {
            return;
        }
        info!(resource = %resource, "Channel closed by transport");
        if self
            .pool
            .get(resource)
            .is_some_and(|c| c.subscriber_count > 0)
        {
            self.requeue(resource, now);
        }
    }

    // === Timers ===

    fn handle_timer(&mut self, id: TimerId, timer: Timer, now: Instant) {
        match timer {
            Timer::AdmissionTick => {
                let batch = self.admission.next_batch(now, &mut self.timers);
                debug!(admitted = batch.len(), remaining = self.admission.len(), "Admission batch");
                for key in &batch {
                    self.admit(key, now);
                }
            }
            Timer::PoolRequeue { resource } => {
                if let Some(entry) = self.pool.get_mut(&resource) {
                    entry.requeue_timer = None;
                }
                self.ensure_connected(&resource, now);
            }
            Timer::Retry(key) => {
                let Some(record) = self.registry.get_mut(&key) else {
                    return;
                };
                record.retry_timer = None;
                if record.abandoned || !record.attached {
                    return;
                }
                debug!(key = %key, attempt = record.retry_count, "Retrying subscription");
                self.ensure_connected(&key.resource, now);
            }
            Timer::Invalidate(key) => {
                if self.invalidations.fire(&key, id) {
                    self.deliver_invalidation(&key);
                }
            }
            Timer::HealthSweep => {
                self.health_sweep(now);
                self.health.schedule_next(now, &mut self.timers);
            }
            Timer::BreakerProbe => {
                self.breaker_timer = None;
                if let Some(transition) = self.breaker.poll(now) {
                    self.on_breaker_transition(transition, now);
                }
                if !self.breaker.is_open() {
                    self.release_one_deferred(now);
                }
            }
            Timer::Reconnect => {
                if !self.recovery.on_reconnect_timer() {
                    return;
                }
                if self.reachability.is_online() {
                    self.reconnect_pass(now);
                } else {
                    self.spawn_probe();
                }
            }
        }
    }

    fn spawn_probe(&self) {
        let reachability = Arc::clone(&self.reachability);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let online = reachability.probe().await;
            let _ = tx.send(Internal::Probe(online));
        });
    }

    fn deliver_invalidation(&mut self, key: &InvalidationKey) {
        debug!(key = %key, "Invalidating");
        self.invalidation_sink.invalidate(key);
        self.metrics.invalidation_delivered();
    }

    // === Health ===

    fn health_sweep(&mut self, now: Instant) -> HealthReport {
        let stale = self
            .registry
            .mark_stale(now, self.health.stale_threshold());
        let mut evicted = Vec::with_capacity(stale.len());
        for key in &stale {
            self.admission.remove(key);
            if self.release(key, now) {
                debug!(key = %key, "Evicted stale subscription");
                evicted.push(key.to_string());
            }
        }

        let mut torn_down = Vec::new();
        for mut connection in self.pool.reap_idle(now, self.health.idle_grace()) {
            if let Some(timer) = connection.requeue_timer.take() {
                self.timers.cancel(timer);
            }
            if let Some(channel) = connection.teardown() {
                self.close_channel(channel);
            }
            self.deferred.retain(|r| r != &connection.resource);
            self.metrics.connection_torn_down();
            torn_down.push(connection.resource);
        }

        let errored = self.pool.needs_reconnect();
        let mut abandoned: Vec<String> = self
            .registry
            .records()
            .filter(|r| r.abandoned)
            .map(|r| r.key.to_string())
            .collect();
        abandoned.sort();

        self.health
            .finish_sweep(evicted, torn_down, errored, abandoned, &self.metrics)
    }

    // === Shutdown ===

    async fn shutdown(&mut self) {
        self.timers.clear();
        self.admission.clear(&mut self.timers);
        self.deferred.clear();

        let channels: Vec<ChannelId> = self
            .pool
            .drain()
            .into_iter()
            .filter_map(|mut connection| connection.teardown())
            .collect();

        for channel in &channels {
            if let Err(err) = self.transport.close_channel(*channel).await {
                debug!(channel = %channel, error = %err, "Channel close failed during shutdown");
            }
        }
        info!(closed = channels.len(), "Realtime manager shut down");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
