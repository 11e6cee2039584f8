// ABOUTME: Invalidation coalescing and priority delay tests

use std::time::Duration;

use realtime_pool::realtime::{ChangeEvent, ChangeKind, InvalidationKey, Priority};
use serde_json::json;
use tokio::time::Instant;

use super::fixtures::{advance, settle, Fixture};

fn change(n: u64) -> ChangeEvent {
    ChangeEvent::new(ChangeKind::Update, json!({ "id": n }))
}

#[tokio::test(start_paused = true)]
async fn test_burst_produces_one_invalidation_after_last_event() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::Medium);
    advance(Duration::from_millis(200)).await;
    assert_eq!(f.manager.stats().await.active_connections, 1);

    let first = Instant::now();
    for n in 0..10 {
        f.transport.emit("jobs", change(n));
        advance(Duration::from_millis(20)).await;
    }
    let last = Instant::now() - Duration::from_millis(20);
    assert!(f.invalidations.is_empty(), "Nothing fires while the burst continues");

    advance(Duration::from_millis(150)).await;

    let key = InvalidationKey::from("jobs-list");
    assert_eq!(f.invalidations.count_for(&key), 1);
    let (_, fired_at) = f.invalidations.calls()[0].clone();
    assert!(fired_at >= last + Duration::from_millis(100));
    assert!(fired_at > first + Duration::from_millis(100), "Timed from the last event");
}

#[tokio::test(start_paused = true)]
async fn test_priority_delays_are_ordered() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "urgent", Priority::High);
    f.manager.subscribe("jobs", "normal", Priority::Medium);
    f.manager.subscribe("jobs", "background", Priority::Low);
    advance(Duration::from_millis(200)).await;

    let emitted_at = Instant::now();
    f.transport.emit("jobs", change(1));
    advance(Duration::from_millis(400)).await;

    let calls = f.invalidations.calls();
    assert_eq!(calls.len(), 3);
    let order: Vec<String> = calls.iter().map(|(key, _)| key.to_string()).collect();
    assert_eq!(order, vec!["urgent", "normal", "background"]);

    let delay = |name: &str| {
        calls
            .iter()
            .find(|(key, _)| key.to_string() == name)
            .map(|(_, at)| *at - emitted_at)
            .unwrap()
    };
    assert_eq!(delay("urgent"), Duration::ZERO);
    assert_eq!(delay("normal"), Duration::from_millis(100));
    assert_eq!(delay("background"), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_keys_coalesce_independently() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::Medium);
    f.manager.subscribe("tours", "tours-list", Priority::Medium);
    advance(Duration::from_millis(200)).await;

    for n in 0..5 {
        f.transport.emit("jobs", change(n));
        f.transport.emit("tours", change(n));
    }
    advance(Duration::from_millis(150)).await;

    assert_eq!(f.invalidations.count_for(&"jobs-list".into()), 1);
    assert_eq!(f.invalidations.count_for(&"tours-list".into()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_composite_key_is_invalidated_as_one() {
    let f = Fixture::default();
    f.manager
        .subscribe("jobs", ["jobs", "month", "2024-06"], Priority::High);
    settle().await;

    f.transport.emit("jobs", change(1));
    settle().await;

    let key = InvalidationKey::from(["jobs", "month", "2024-06"]);
    assert_eq!(f.invalidations.count_for(&key), 1);
    assert_eq!(key.to_string(), "jobs:month:2024-06");
}

#[tokio::test(start_paused = true)]
async fn test_force_refresh_invalidates_everything_once() {
    let f = Fixture::default();
    f.manager.subscribe("jobs", "jobs-list", Priority::Low);
    f.manager.subscribe("tours", "tours-list", Priority::High);
    advance(Duration::from_millis(200)).await;

    // Pending low-priority refresh is replaced by the immediate one
    f.transport.emit("jobs", change(1));
    settle().await;
    assert!(f.invalidations.is_empty());

    f.manager.force_refresh();
    advance(Duration::from_millis(500)).await;

    assert_eq!(f.invalidations.count_for(&"jobs-list".into()), 1);
    assert_eq!(f.invalidations.count_for(&"tours-list".into()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_key_receives_nothing() {
    let f = Fixture::default();
    let list = f.manager.subscribe("jobs", "jobs-list", Priority::High);
    f.manager.subscribe("jobs", "jobs-board", Priority::High);
    settle().await;

    list.unsubscribe();
    settle().await;
    f.transport.emit("jobs", change(1));
    settle().await;

    assert_eq!(f.invalidations.count_for(&"jobs-list".into()), 0);
    assert_eq!(f.invalidations.count_for(&"jobs-board".into()), 1);
}
