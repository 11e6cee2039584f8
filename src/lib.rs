// ABOUTME: Library crate for realtime-pool exposing the subscription manager for embedding and tests

#![allow(missing_docs)]

pub mod realtime;

pub use realtime::{
    ConnectionStats, ManagerConfig, Priority, RealtimeManager, Subscription, SubscriptionKey,
};
