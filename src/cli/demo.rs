// ABOUTME: CLI demo command - simulated workload against the in-memory transport
//
// Mounts a set of features that subscribe to a handful of resources, fires
// bursts of change events at them and optionally flaps connectivity, then
// reports what the manager did.

use std::time::Duration;

use anyhow::Result;
use realtime_pool::realtime::{
    ChangeEvent, ChangeKind, ManualReachability, MemoryTransport, NotificationLevel, OpenBehavior,
    RecordingInvalidation, RecordingNotifications,
};
use realtime_pool::{ConnectionStats, ManagerConfig, Priority, RealtimeManager};
use serde::Serialize;
use tokio::time::sleep;
use tracing::info;

use super::{DemoArgs, OutputFormat};

const RESOURCES: [&str; 7] = [
    "jobs",
    "tours",
    "equipment",
    "payroll",
    "staff",
    "venues",
    "documents",
];

/// Outcome of a demo run
#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub stats: ConnectionStats,
    pub events_emitted: usize,
    pub invalidations: usize,
    pub open_calls: usize,
    pub notifications: Vec<(String, NotificationLevel)>,
}

/// Execute the demo command
pub async fn execute(args: DemoArgs, config: ManagerConfig, format: OutputFormat) -> Result<()> {
    let report = run(&args, config).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => output_text(&report),
    }
    Ok(())
}

/// Drive the workload and collect the report
pub async fn run(args: &DemoArgs, config: ManagerConfig) -> Result<DemoReport> {
    let transport = MemoryTransport::new();
    transport.set_latency(Duration::from_millis(args.latency_ms));
    transport.script(std::iter::repeat(OpenBehavior::Fail).take(args.fail_first));

    let invalidations = RecordingInvalidation::new();
    let notifications = RecordingNotifications::new();
    let reachability = ManualReachability::new(true);

    let settle = admission_window(&config, args.features) + Duration::from_millis(args.latency_ms);
    let manager = RealtimeManager::builder(transport.clone())
        .config(config)
        .invalidation_sink(invalidations.clone())
        .notification_sink(notifications.clone())
        .reachability(reachability.clone())
        .start()?;

    let mut subscriptions = Vec::with_capacity(args.features);
    for feature in 0..args.features {
        let resource = RESOURCES[feature % RESOURCES.len()];
        let priority = match feature % 3 {
            0 => Priority::High,
            1 => Priority::Medium,
            _ => Priority::Low,
        };
        let view = format!("view-{feature}");
        subscriptions.push(manager.subscribe(resource, [resource, view.as_str()], priority));
    }
    info!(features = args.features, "Features mounted");
    sleep(settle).await;

    let watched = args.features.min(RESOURCES.len());
    let mut events_emitted = 0;
    for burst in 0..args.bursts {
        for resource in &RESOURCES[..watched] {
            for seq in 0..args.burst_size {
                let payload = serde_json::json!({ "burst": burst, "seq": seq });
                events_emitted += transport.emit(resource, ChangeEvent::new(ChangeKind::Update, payload));
            }
        }
        sleep(Duration::from_millis(400)).await;

        if args.flap && watched > 0 {
            info!(burst, "Flapping connectivity");
            reachability.set_online(false);
            manager.set_online(false);
            transport.fail_channel(RESOURCES[0], "network unreachable");
            sleep(Duration::from_millis(300)).await;
            reachability.set_online(true);
            manager.set_online(true);
            sleep(Duration::from_millis(args.latency_ms + 200)).await;
        }
    }

    let stats = manager.stats().await;
    let report = DemoReport {
        stats,
        events_emitted,
        invalidations: invalidations.len(),
        open_calls: transport.open_calls(),
        notifications: notifications.messages(),
    };

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    manager.shutdown().await;
    Ok(report)
}

/// Time for every feature to pass admission
fn admission_window(config: &ManagerConfig, features: usize) -> Duration {
    let batches = u32::try_from(features.div_ceil(config.admission_batch_size.max(1)))
        .unwrap_or(u32::MAX);
    config.admission_debounce + config.admission_batch_delay * batches
}

fn output_text(report: &DemoReport) {
    let stats = &report.stats;
    println!("Realtime pool demo");
    println!("{}", "-".repeat(40));
    println!("{:<28} {}", "Subscriptions", stats.subscription_count);
    println!("{:<28} {}", "Active connections", stats.active_connections);
    println!("{:<28} {}", "Queued subscriptions", stats.queued_subscriptions);
    println!("{:<28} {}", "Failed connections", stats.failed_connections);
    println!("{:<28} {}", "Abandoned subscriptions", stats.abandoned_subscriptions);
    println!("{:<28} {}ms", "Avg connect latency", stats.average_response_time_ms);
    println!("{:<28} {}", "Circuit breaker open", stats.circuit_breaker_open);
    println!("{:<28} {}", "Recovery state", stats.recovery_state);
    println!("{:<28} {}", "Channel opens", report.open_calls);
    println!("{:<28} {}", "Change events", report.events_emitted);
    println!("{:<28} {}", "Invalidations", report.invalidations);

    if !report.notifications.is_empty() {
        println!();
        println!("Notifications:");
        for (message, level) in &report.notifications {
            println!("  [{level:?}] {message}");
        }
    }
}
