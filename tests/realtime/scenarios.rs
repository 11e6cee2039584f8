// ABOUTME: End-to-end scenarios for the realtime manager under paused time
// Dedup, breaker opening, offline/online recovery and retry exhaustion

use std::time::Duration;

use pretty_assertions::assert_eq;
use realtime_pool::realtime::{
    ConfigError, ManagerConfig, MemoryTransport, NotificationLevel, OpenBehavior, Priority,
    RealtimeManager,
};

use super::fixtures::{advance, settle, Fixture};

#[tokio::test(start_paused = true)]
async fn test_duplicate_subscribe_opens_one_channel() {
    let f = Fixture::default();

    let first = f.manager.subscribe("jobs", "jobs-list", Priority::High);
    let second = f.manager.subscribe("jobs", "jobs-list", Priority::High);
    assert_eq!(first, second, "Duplicate subscribe should return an equal handle");

    settle().await;
    let stats = f.manager.stats().await;

    assert_eq!(stats.subscription_count, 1);
    assert_eq!(stats.active_connections, 1);
    assert_eq!(f.transport.open_calls_for("jobs"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_many_keys_share_one_resource_channel() {
    let f = Fixture::default();

    for view in ["jobs-list", "jobs-board", "jobs-calendar"] {
        f.manager.subscribe("jobs", view, Priority::High);
    }
    settle().await;

    let stats = f.manager.stats().await;
    assert_eq!(stats.subscription_count, 3);
    assert_eq!(stats.active_connections, 1);
    assert_eq!(f.transport.open_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_open_breaker_and_queue_new_subscriptions() {
    let f = Fixture::default();
    f.transport.set_default_behavior(OpenBehavior::Hang);

    for resource in ["a", "b", "c", "d", "e"] {
        f.manager
            .subscribe(resource, format!("{resource}-list"), Priority::High);
    }
    settle().await;
    assert_eq!(f.transport.open_calls(), 5);

    // Every open hangs past the 10s connect timeout
    advance(Duration::from_millis(10_050)).await;
    let stats = f.manager.stats().await;
    assert!(stats.circuit_breaker_open, "Five timeouts should open the breaker");
    assert_eq!(stats.failed_connections, 5);

    f.manager.subscribe("f", "f-list", Priority::High);
    advance(Duration::from_secs(5)).await;

    let stats = f.manager.stats().await;
    assert_eq!(f.transport.open_calls(), 5, "Open breaker must not reach the transport");
    assert_eq!(stats.queued_subscriptions, 6);
    assert_eq!(stats.subscription_count, 6);

    assert!(
        f.notifications.is_empty(),
        "Backend outages are logged, not shown to the user"
    );
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_leaves_offline_notification_available() {
    let f = Fixture::default();
    f.transport.set_default_behavior(OpenBehavior::Hang);
    for resource in ["a", "b", "c", "d", "e"] {
        f.manager
            .subscribe(resource, format!("{resource}-list"), Priority::High);
    }
    advance(Duration::from_millis(10_050)).await;
    assert!(f.manager.stats().await.circuit_breaker_open);

    f.go_offline();
    settle().await;

    assert_eq!(
        f.notifications.messages(),
        vec![(
            "Connection lost. Live updates are paused.".to_string(),
            NotificationLevel::Error
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_breaker_probes_after_cooldown_and_closes() {
    let f = Fixture::default();
    f.transport.script([OpenBehavior::Hang; 5]);

    for resource in ["a", "b", "c", "d", "e"] {
        f.manager
            .subscribe(resource, format!("{resource}-list"), Priority::High);
    }
    advance(Duration::from_millis(10_050)).await;
    assert!(f.manager.stats().await.circuit_breaker_open);

    // Cooldown is 30s; the half-open probe succeeds and the rest follow
    advance(Duration::from_secs(31)).await;
    settle().await;

    let stats = f.manager.stats().await;
    assert!(!stats.circuit_breaker_open);
    assert_eq!(stats.active_connections, 5);
    assert_eq!(stats.queued_subscriptions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_trial_skips_unsubscribed_resources() {
    let f = Fixture::default();
    f.transport.script([OpenBehavior::Hang; 5]);

    let first = f.manager.subscribe("a", "a-list", Priority::High);
    for resource in ["b", "c", "d", "e"] {
        f.manager
            .subscribe(resource, format!("{resource}-list"), Priority::High);
    }
    advance(Duration::from_millis(10_050)).await;
    assert!(f.manager.stats().await.circuit_breaker_open);

    // Retries land on the open breaker and park in order; then the head leaves
    advance(Duration::from_secs(3)).await;
    first.unsubscribe();
    settle().await;

    advance(Duration::from_secs(30)).await;
    settle().await;

    let stats = f.manager.stats().await;
    assert!(!stats.circuit_breaker_open);
    assert_eq!(stats.active_connections, 4);
    assert_eq!(stats.queued_subscriptions, 0);
    assert_eq!(f.transport.open_calls_for("a"), 1);
    for resource in ["b", "c", "d", "e"] {
        assert_eq!(f.transport.open_calls_for(resource), 2, "{resource} should reconnect");
    }
}

#[tokio::test(start_paused = true)]
async fn test_offline_then_online_reconnects_with_one_notification() {
    let f = Fixture::default();
    let _jobs = f.manager.subscribe("jobs", "jobs-list", Priority::High);
    settle().await;
    assert_eq!(f.manager.stats().await.active_connections, 1);

    f.go_offline();
    settle().await;
    f.transport.fail_channel("jobs", "socket reset");
    settle().await;
    assert_eq!(f.manager.stats().await.active_connections, 0);

    advance(Duration::from_millis(500)).await;
    f.go_online();
    settle().await;

    let stats = f.manager.stats().await;
    assert_eq!(stats.active_connections, 1);
    assert_eq!(stats.reconnect_attempts, 0);
    assert_eq!(stats.recovery_state, "idle");
    assert_eq!(f.transport.open_calls_for("jobs"), 2);

    // Offline toast went out; the restore toast falls inside the cooldown
    assert_eq!(f.notifications.len(), 1);
    assert_eq!(f.notifications.messages()[0].1, NotificationLevel::Error);
}

#[tokio::test(start_paused = true)]
async fn test_offline_suppresses_connection_attempts() {
    let f = Fixture::default();
    f.go_offline();
    settle().await;

    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    advance(Duration::from_secs(5)).await;
    assert_eq!(f.transport.open_calls(), 0);
    assert_eq!(f.manager.stats().await.queued_subscriptions, 1);

    f.go_online();
    settle().await;
    assert_eq!(f.transport.open_calls(), 1);
    assert_eq!(f.manager.stats().await.active_connections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhaustion_abandons_until_force_refresh() {
    let f = Fixture::default();
    f.transport.script([OpenBehavior::Fail; 3]);

    let _jobs = f.manager.subscribe("jobs", "jobs-list", Priority::Medium);

    // Admission at 100ms, retries after 1s and 2s
    advance(Duration::from_secs(10)).await;
    let stats = f.manager.stats().await;
    assert_eq!(f.transport.open_calls_for("jobs"), 3);
    assert_eq!(stats.failed_connections, 3);
    assert_eq!(stats.abandoned_subscriptions, 1);
    assert_eq!(stats.subscription_count, 1, "Abandoned records stay registered");
    assert_eq!(stats.queued_subscriptions, 0);

    advance(Duration::from_secs(90)).await;
    assert_eq!(f.transport.open_calls_for("jobs"), 3, "No automatic retry once abandoned");

    f.manager.force_refresh();
    settle().await;

    let stats = f.manager.stats().await;
    assert_eq!(f.transport.open_calls_for("jobs"), 4);
    assert_eq!(stats.abandoned_subscriptions, 0);
    assert_eq!(stats.active_connections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_channel_errors_exhaust_retry_budget() {
    let f = Fixture::default();
    let _jobs = f.manager.subscribe("jobs", "jobs-list", Priority::High);
    settle().await;
    assert_eq!(f.manager.stats().await.active_connections, 1);

    // Each reconnect succeeds, yet the budget only resets on a change event
    f.transport.fail_channel("jobs", "socket reset");
    advance(Duration::from_millis(1_500)).await;
    assert_eq!(f.transport.open_calls_for("jobs"), 2);
    assert_eq!(f.manager.stats().await.active_connections, 1);

    f.transport.fail_channel("jobs", "socket reset");
    advance(Duration::from_millis(2_500)).await;
    assert_eq!(f.transport.open_calls_for("jobs"), 3);

    f.transport.fail_channel("jobs", "socket reset");
    advance(Duration::from_secs(60)).await;

    let stats = f.manager.stats().await;
    assert_eq!(stats.abandoned_subscriptions, 1);
    assert_eq!(stats.failed_connections, 3);
    assert_eq!(f.transport.open_calls_for("jobs"), 3, "Abandoned records stop reconnecting");
}

#[tokio::test(start_paused = true)]
async fn test_remote_close_requeues_without_counting_failure() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    settle().await;

    assert_eq!(f.transport.close_remote("jobs"), 1);
    settle().await;
    assert_eq!(f.manager.stats().await.active_connections, 0);

    advance(Duration::from_millis(1_100)).await;

    let stats = f.manager.stats().await;
    assert_eq!(f.transport.open_calls_for("jobs"), 2);
    assert_eq!(stats.active_connections, 1);
    assert_eq!(stats.failed_connections, 0);
    assert!(!stats.circuit_breaker_open);
}

#[tokio::test(start_paused = true)]
async fn test_pool_cap_queues_excess_resources() {
    let f = Fixture::default();
    f.transport.set_default_behavior(OpenBehavior::Hang);

    for n in 0..7 {
        f.manager
            .subscribe(format!("table-{n}"), "list", Priority::High);
    }
    settle().await;
    assert_eq!(f.transport.open_calls(), 5);

    advance(Duration::from_secs(3)).await;
    assert_eq!(f.transport.open_calls(), 5, "Cap holds while requeues tick");
    assert_eq!(f.manager.stats().await.queued_subscriptions, 2);
}

#[tokio::test(start_paused = true)]
async fn test_queued_resource_connects_once_capacity_frees() {
    let config = ManagerConfig {
        max_connections: 2,
        ..ManagerConfig::default()
    };
    let f = Fixture::new(config);

    let first = f.manager.subscribe("a", "a-list", Priority::High);
    f.manager.subscribe("b", "b-list", Priority::High);
    f.manager.subscribe("c", "c-list", Priority::High);
    settle().await;
    assert_eq!(f.transport.open_calls_for("c"), 0);

    // Released connections are reaped by the sweep after the idle grace
    first.unsubscribe();
    advance(Duration::from_secs(61)).await;
    settle().await;

    let stats = f.manager.stats().await;
    assert_eq!(f.transport.open_calls_for("c"), 1);
    assert_eq!(stats.active_connections, 2);
    assert_eq!(stats.subscription_count, 2);
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let zero_cap = ManagerConfig {
        max_connections: 0,
        ..ManagerConfig::default()
    };
    let err = RealtimeManager::builder(MemoryTransport::new())
        .config(zero_cap)
        .start()
        .err();
    assert_eq!(err, Some(ConfigError::Zero("max_connections")));

    let misordered = ManagerConfig {
        high_priority_delay: Duration::from_millis(500),
        ..ManagerConfig::default()
    };
    let err = RealtimeManager::builder(MemoryTransport::new())
        .config(misordered)
        .start()
        .err();
    assert_eq!(err, Some(ConfigError::PriorityDelaysOutOfOrder));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_open_channels() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    f.manager.subscribe("tours", "tours-list", Priority::High);
    settle().await;
    assert_eq!(f.transport.open_channels(), 2);

    let transport = f.transport.clone();
    f.manager.shutdown().await;

    assert_eq!(transport.open_channels(), 0);
}
