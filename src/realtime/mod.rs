// ABOUTME: Realtime subscription manager - pooled change-notification channels
// ABOUTME: with admission batching, circuit breaking, coalesced invalidation and recovery

//! Realtime change-notification subscriptions.
//!
//! Many features ask to be told when a resource changes; this module
//! multiplexes them onto a bounded pool of shared backend channels and turns
//! bursts of change events into rate-limited cache invalidations.
//!
//! ```text
//! subscribe ─▶ Registry ─▶ AdmissionBatcher ─▶ ConnectionPool ─▶ Transport
//!                                                  │   ▲
//!                                    CircuitBreaker ┘   │ change events
//!                                                       ▼
//!                            InvalidationSink ◀─ InvalidationScheduler
//!
//! HealthChecker and RecoveryController run on timers and connectivity signals.
//! ```

pub mod admission;
pub mod circuit_breaker;
pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod health;
pub mod invalidation;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod pool;
pub mod recovery;
pub mod registry;
pub mod transport;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::ManagerConfig;
pub use error::{ConfigError, SubscriptionError, TransportError};
pub use health::{HealthReport, HealthStatus};
pub use manager::{RealtimeManager, RealtimeManagerBuilder, Subscription};
pub use memory::{
    ManualReachability, MemoryTransport, OpenBehavior, RecordingInvalidation,
    RecordingNotifications,
};
pub use metrics::ConnectionStats;
pub use recovery::RecoveryState;
pub use transport::{
    AlwaysOnline, Channel, InvalidationSink, LogNotifications, NoopInvalidation,
    NotificationSink, ReachabilityProbe, Transport,
};
pub use types::{
    ChangeEvent, ChangeKind, ChannelEvent, ChannelId, ConnectivitySignal, InvalidationKey,
    NotificationLevel, Priority, SubscriptionKey,
};
