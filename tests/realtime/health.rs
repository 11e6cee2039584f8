// ABOUTME: Health sweep tests - stale eviction, idle teardown and latency degradation

use std::time::Duration;

use pretty_assertions::assert_eq;
use realtime_pool::realtime::{ChangeEvent, ChangeKind, HealthStatus, OpenBehavior, Priority};
use serde_json::json;

use super::fixtures::{advance, settle, Fixture};

const MINUTE: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn test_stale_subscription_evicted_then_connection_reaped() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::Medium);
    advance(Duration::from_millis(200)).await;
    assert_eq!(f.manager.stats().await.subscription_count, 1);

    // Still inside the 10 minute threshold at the 10 minute sweep
    advance(10 * MINUTE).await;
    assert_eq!(f.manager.stats().await.subscription_count, 1);

    advance(MINUTE).await;
    let stats = f.manager.stats().await;
    assert_eq!(stats.subscription_count, 0);
    assert_eq!(stats.active_connections, 1, "Teardown waits for the idle grace");
    assert!(stats.last_health_check.is_some());

    advance(2 * MINUTE).await;
    settle().await;
    assert_eq!(f.manager.stats().await.active_connections, 0);
    assert_eq!(f.transport.open_channels(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_activity_keeps_subscription_alive() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::Medium);
    advance(Duration::from_millis(200)).await;

    for n in 0..4 {
        advance(5 * MINUTE).await;
        f.transport
            .emit("jobs", ChangeEvent::new(ChangeKind::Insert, json!({ "id": n })));
        settle().await;
    }

    let stats = f.manager.stats().await;
    assert_eq!(stats.subscription_count, 1);
    assert_eq!(stats.active_connections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_within_grace_reuses_channel() {
    let f = Fixture::default();
    let jobs = f.manager.subscribe("jobs", "jobs-list", Priority::High);
    settle().await;

    jobs.unsubscribe();
    settle().await;
    assert_eq!(
        f.manager.stats().await.active_connections,
        1,
        "Last unsubscribe does not tear down synchronously"
    );

    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    advance(3 * MINUTE).await;

    assert_eq!(f.transport.open_calls(), 1);
    assert_eq!(f.manager.stats().await.active_connections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_health_check_reports_healthy_pool() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    settle().await;

    let report = f.manager.health_check().await.unwrap();
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.evicted.is_empty());
    assert!(report.torn_down.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_connections_flag_degraded() {
    let f = Fixture::default();
    f.transport.set_latency(Duration::from_millis(2500));
    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    advance(Duration::from_secs(3)).await;

    let report = f.manager.health_check().await.unwrap();
    assert_eq!(report.average_latency_ms, 2500);
    assert!(matches!(report.status, HealthStatus::Degraded { slow: true, .. }));

    let stats = f.manager.stats().await;
    assert!(stats.degraded);
    assert_eq!(stats.average_response_time_ms, 2500);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_subscription_reports_critical() {
    let f = Fixture::default();
    f.transport.script([OpenBehavior::Fail; 3]);
    f.manager.subscribe("jobs", "jobs-list", Priority::High);
    advance(Duration::from_secs(5)).await;

    let report = f.manager.health_check().await.unwrap();
    assert_eq!(
        report.status,
        HealthStatus::Critical {
            abandoned: vec!["jobs::jobs-list".to_string()]
        }
    );
}
