// ABOUTME: Collaborator interfaces consumed by the realtime manager
//
// The backend transport, reachability probe, cache-invalidation sink and
// user notification sink are owned elsewhere; the manager only sees these traits.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tracing::{error, info};

use super::error::TransportError;
use super::types::{ChannelEvent, ChannelId, InvalidationKey, NotificationLevel};

/// A freshly opened channel: its id plus the stream of lifecycle and change
/// events, delivered in transport order. The stream ends when the channel closes.
pub struct Channel {
    pub id: ChannelId,
    pub events: BoxStream<'static, ChannelEvent>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Backend notification transport ("open a channel for a resource, receive
/// change events, close it")
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a channel watching `resource`. May never resolve; the caller
    /// bounds it with a timeout.
    async fn open_channel(&self, resource: &str) -> Result<Channel, TransportError>;

    async fn close_channel(&self, channel: ChannelId) -> Result<(), TransportError>;
}

/// Network reachability
#[async_trait]
pub trait ReachabilityProbe: Send + Sync + 'static {
    /// Cheap synchronous answer, no network call
    fn is_online(&self) -> bool;

    /// Network probe used as a fallback when `is_online` says no
    async fn probe(&self) -> bool {
        self.is_online()
    }
}

/// Receives cache refresh requests. Assumed idempotent and cheap.
pub trait InvalidationSink: Send + Sync + 'static {
    fn invalidate(&self, key: &InvalidationKey);
}

/// User-facing connectivity toasts
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, message: &str, level: NotificationLevel);
}

/// Probe for hosts without reachability information
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl ReachabilityProbe for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Notification sink that only writes to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifications;

impl NotificationSink for LogNotifications {
    fn notify(&self, message: &str, level: NotificationLevel) {
        match level {
            NotificationLevel::Error => error!(notification = %message, "Realtime notification"),
            NotificationLevel::Success | NotificationLevel::Info => {
                info!(notification = %message, "Realtime notification");
            }
        }
    }
}

/// Invalidation sink that drops every request
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInvalidation;

impl InvalidationSink for NoopInvalidation {
    fn invalidate(&self, _key: &InvalidationKey) {}
}
