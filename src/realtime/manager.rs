// ABOUTME: RealtimeManager façade - the only surface feature code touches
//
// Holds a command sender to the engine task. subscribe/unsubscribe never
// block and never fail; stats, health checks and shutdown await a reply.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::ManagerConfig;
use super::engine::{Collaborators, Command, Engine};
use super::error::ConfigError;
use super::health::HealthReport;
use super::metrics::ConnectionStats;
use super::transport::{
    AlwaysOnline, InvalidationSink, LogNotifications, NoopInvalidation, NotificationSink,
    ReachabilityProbe, Transport,
};
use super::types::{ConnectivitySignal, InvalidationKey, Priority, SubscriptionKey};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle returned by `subscribe`. Handles for the same
/// (resource, invalidation key) compare equal.
#[derive(Clone)]
pub struct Subscription {
    key: SubscriptionKey,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub const fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Drop this interest. The shared connection stays until the health
    /// sweep reaps it.
    pub fn unsubscribe(&self) {
        let _ = self.commands.send(Command::Unsubscribe(self.key.clone()));
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Subscription {}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).finish()
    }
}

/// Builder wiring collaborators into a manager
pub struct RealtimeManagerBuilder {
    config: ManagerConfig,
    transport: Arc<dyn Transport>,
    reachability: Arc<dyn ReachabilityProbe>,
    invalidation: Arc<dyn InvalidationSink>,
    notifications: Arc<dyn NotificationSink>,
}

impl RealtimeManagerBuilder {
    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn invalidation_sink(mut self, sink: impl InvalidationSink) -> Self {
        self.invalidation = Arc::new(sink);
        self
    }

    #[must_use]
    pub fn notification_sink(mut self, sink: impl NotificationSink) -> Self {
        self.notifications = Arc::new(sink);
        self
    }

    #[must_use]
    pub fn reachability(mut self, probe: impl ReachabilityProbe) -> Self {
        self.reachability = Arc::new(probe);
        self
    }

    /// Validate the configuration and spawn the engine task. Must be called
    /// inside a tokio runtime.
    pub fn start(self) -> Result<RealtimeManager, ConfigError> {
        self.config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (engine, internal_rx) = Engine::new(
            self.config,
            Collaborators {
                transport: self.transport,
                reachability: self.reachability,
                invalidation: self.invalidation,
                notifications: self.notifications,
            },
        );
        let task = tokio::spawn(engine.run(command_rx, internal_rx));

        Ok(RealtimeManager {
            commands,
            task: Some(task),
        })
    }
}

/// Pooled realtime subscriptions with coalesced cache invalidation
pub struct RealtimeManager {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for RealtimeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("running", &!self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

impl RealtimeManager {
    /// Start configuring a manager on top of `transport`
    pub fn builder(transport: impl Transport) -> RealtimeManagerBuilder {
        RealtimeManagerBuilder {
            config: ManagerConfig::default(),
            transport: Arc::new(transport),
            reachability: Arc::new(AlwaysOnline),
            invalidation: Arc::new(NoopInvalidation),
            notifications: Arc::new(LogNotifications),
        }
    }

    /// Register interest in changes to `resource`, refreshing `invalidation`
    /// when they arrive. Subscribing twice with the same pair returns an
    /// equal handle and does no extra backend work.
    pub fn subscribe(
        &self,
        resource: impl Into<String>,
        invalidation: impl Into<InvalidationKey>,
        priority: Priority,
    ) -> Subscription {
        let key = SubscriptionKey::new(resource, invalidation);
        if self
            .commands
            .send(Command::Subscribe {
                key: key.clone(),
                priority,
            })
            .is_err()
        {
            debug!(key = %key, "Subscribe after shutdown ignored");
        }
        Subscription {
            key,
            commands: self.commands.clone(),
        }
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    /// Invalidate everything now, reset the circuit breaker and retry
    /// abandoned subscriptions
    pub fn force_refresh(&self) {
        let _ = self.commands.send(Command::ForceRefresh);
    }

    pub fn connectivity(&self, signal: ConnectivitySignal) {
        let _ = self.commands.send(Command::Connectivity(signal));
    }

    pub fn set_online(&self, online: bool) {
        self.connectivity(if online {
            ConnectivitySignal::Online
        } else {
            ConnectivitySignal::Offline
        });
    }

    pub fn set_visible(&self, visible: bool) {
        self.connectivity(if visible {
            ConnectivitySignal::Visible
        } else {
            ConnectivitySignal::Hidden
        });
    }

    /// Snapshot of pool state. Empty stats once the manager has stopped.
    pub async fn stats(&self) -> ConnectionStats {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stats(reply)).is_err() {
            return ConnectionStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Run a health sweep now instead of waiting for the interval
    pub async fn health_check(&self) -> Option<HealthReport> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::HealthCheck(reply)).ok()?;
        rx.await.ok()
    }

    /// Close every channel and stop the engine task
    pub async fn shutdown(mut self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(reply)).is_ok()
            && tokio::time::timeout(SHUTDOWN_TIMEOUT, rx).await.is_err()
        {
            warn!(timeout_ms = %SHUTDOWN_TIMEOUT.as_millis(), "Realtime manager shutdown timed out");
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                warn!("Realtime manager task did not stop in time");
            }
        }
    }
}
