// ABOUTME: Admission batching tests - debounce, bounded batches and high-priority bypass

use std::time::Duration;

use realtime_pool::realtime::{ManagerConfig, Priority};

use super::fixtures::{advance, settle, Fixture};

fn roomy_pool() -> ManagerConfig {
    ManagerConfig {
        max_connections: 10,
        ..ManagerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_burst_is_admitted_in_batches_of_three() {
    let f = Fixture::new(roomy_pool());
    for n in 0..7 {
        f.manager.subscribe(format!("table-{n}"), "list", Priority::Medium);
    }

    advance(Duration::from_millis(90)).await;
    assert_eq!(f.transport.open_calls(), 0, "Debounce collects the burst first");

    advance(Duration::from_millis(20)).await;
    assert_eq!(f.transport.open_calls(), 3);

    advance(Duration::from_millis(500)).await;
    assert_eq!(f.transport.open_calls(), 6);

    advance(Duration::from_millis(500)).await;
    assert_eq!(f.transport.open_calls(), 7);
    assert_eq!(f.manager.stats().await.queued_subscriptions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_restarts_on_each_arrival() {
    let f = Fixture::new(roomy_pool());

    f.manager.subscribe("jobs", "jobs-list", Priority::Low);
    advance(Duration::from_millis(60)).await;
    f.manager.subscribe("tours", "tours-list", Priority::Low);
    advance(Duration::from_millis(60)).await;
    assert_eq!(f.transport.open_calls(), 0);

    advance(Duration::from_millis(50)).await;
    assert_eq!(f.transport.open_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_bypasses_queue() {
    let f = Fixture::new(roomy_pool());
    f.manager.subscribe("jobs", "jobs-list", Priority::Medium);
    f.manager.subscribe("alerts", "alerts-feed", Priority::High);
    settle().await;

    assert_eq!(f.transport.open_calls_for("alerts"), 1);
    assert_eq!(f.transport.open_calls_for("jobs"), 0);

    let stats = f.manager.stats().await;
    assert_eq!(stats.active_connections, 1);
    assert_eq!(stats.queued_subscriptions, 1);
}
