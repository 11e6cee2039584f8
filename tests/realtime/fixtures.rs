// ABOUTME: Shared fixtures for realtime manager integration tests
//
// Provides:
// - Fixture: manager wired to the in-memory transport and recording sinks
// - settle(): let spawned tasks and zero-delay timers run
// - advance(): move paused time forward

use std::time::Duration;

use realtime_pool::realtime::{
    ManagerConfig, ManualReachability, MemoryTransport, RealtimeManager, RecordingInvalidation,
    RecordingNotifications,
};

/// Manager plus handles on every collaborator it talks to
pub struct Fixture {
    pub manager: RealtimeManager,
    pub transport: MemoryTransport,
    pub invalidations: RecordingInvalidation,
    pub notifications: RecordingNotifications,
    pub reachability: ManualReachability,
}

impl Fixture {
    /// Start a manager with the given configuration
    pub fn new(config: ManagerConfig) -> Self {
        let transport = MemoryTransport::new();
        let invalidations = RecordingInvalidation::new();
        let notifications = RecordingNotifications::new();
        let reachability = ManualReachability::new(true);

        let manager = RealtimeManager::builder(transport.clone())
            .config(config)
            .invalidation_sink(invalidations.clone())
            .notification_sink(notifications.clone())
            .reachability(reachability.clone())
            .start()
            .expect("fixture config is valid");

        Self {
            manager,
            transport,
            invalidations,
            notifications,
            reachability,
        }
    }

    /// Flip both the reachability probe and the manager's connectivity signal
    pub fn go_offline(&self) {
        self.reachability.set_online(false);
        self.manager.set_online(false);
    }

    pub fn go_online(&self) {
        self.reachability.set_online(true);
        self.manager.set_online(true);
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

/// Let the engine and spawned tasks catch up without crossing any timer
pub async fn settle() {
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Advance paused time by `duration`
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
