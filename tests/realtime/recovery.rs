// ABOUTME: Recovery controller tests - visibility, backoff exhaustion and notification rate limits

use std::time::Duration;

use realtime_pool::realtime::{ManagerConfig, NotificationLevel, OpenBehavior, Priority};

use super::fixtures::{advance, settle, Fixture};

/// Isolate recovery from the per-subscription retry budget and the breaker
fn recovery_config() -> ManagerConfig {
    ManagerConfig {
        max_retries: 1_000,
        circuit_breaker_threshold: 1_000,
        max_reconnect_attempts: 2,
        notification_cooldown: Duration::ZERO,
        ..ManagerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_visible_after_hidden_reconnects_immediately() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    settle().await;

    f.manager.set_visible(false);
    f.transport.fail_channel("jobs", "tab suspended");
    settle().await;
    assert_eq!(f.manager.stats().await.active_connections, 0);

    // Well before the 1s per-subscription retry
    f.manager.set_visible(true);
    settle().await;

    assert_eq!(f.transport.open_calls_for("jobs"), 2);
    assert_eq!(f.manager.stats().await.active_connections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_visible_without_hidden_is_ignored() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    settle().await;
    f.transport.fail_channel("jobs", "socket reset");
    settle().await;

    f.manager.set_visible(true);
    settle().await;

    assert_eq!(f.transport.open_calls_for("jobs"), 1);
    assert_eq!(f.manager.stats().await.recovery_state, "idle");
}

#[tokio::test(start_paused = true)]
async fn test_recovery_gives_up_after_max_attempts() {
    let f = Fixture::new(recovery_config());
    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    settle().await;

    f.transport.set_default_behavior(OpenBehavior::Fail);
    f.go_offline();
    f.transport.fail_channel("jobs", "network unreachable");
    settle().await;
    f.go_online();

    advance(Duration::from_secs(30)).await;

    let stats = f.manager.stats().await;
    assert_eq!(stats.recovery_state, "failed");
    assert_eq!(stats.reconnect_attempts, 2);

    let (message, level) = f.notifications.messages().last().cloned().unwrap();
    assert_eq!(level, NotificationLevel::Error);
    assert!(message.contains("Unable to restore"));

    // The next online event starts over and succeeds
    f.transport.set_default_behavior(OpenBehavior::Succeed);
    f.go_online();
    settle().await;

    let stats = f.manager.stats().await;
    assert_eq!(stats.recovery_state, "idle");
    assert_eq!(stats.reconnect_attempts, 0);
    assert_eq!(stats.active_connections, 1);
    assert_eq!(
        f.notifications.messages().last().map(|(_, level)| *level),
        Some(NotificationLevel::Success)
    );
}

#[tokio::test(start_paused = true)]
async fn test_flapping_connectivity_is_rate_limited() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    settle().await;

    for _ in 0..5 {
        f.go_offline();
        settle().await;
        f.go_online();
        settle().await;
        advance(Duration::from_secs(1)).await;
    }
    assert_eq!(f.notifications.len(), 1);

    advance(Duration::from_secs(15)).await;
    f.go_offline();
    settle().await;
    assert_eq!(f.notifications.len(), 2);
}
