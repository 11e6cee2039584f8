// ABOUTME: In-memory collaborators for the demo binary and tests
//
// MemoryTransport opens channels backed by unbounded mpsc queues and can be
// scripted to fail or hang; the recording sinks capture what the manager sent.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::error::TransportError;
use super::transport::{Channel, InvalidationSink, NotificationSink, ReachabilityProbe, Transport};
use super::types::{ChangeEvent, ChannelEvent, ChannelId, InvalidationKey, NotificationLevel};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// === Memory Transport ===

/// How the next `open_channel` call behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Open normally and send `Subscribed`
    Succeed,
    /// Return a transport error
    Fail,
    /// Never resolve (exercises the connect timeout)
    Hang,
}

#[derive(Debug)]
struct TransportState {
    channels: HashMap<ChannelId, (String, mpsc::UnboundedSender<ChannelEvent>)>,
    open_calls: Vec<String>,
    close_calls: usize,
    scripted: VecDeque<OpenBehavior>,
    default_behavior: OpenBehavior,
    latency: Duration,
}

/// Transport double keeping every channel in memory
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<TransportState>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                channels: HashMap::new(),
                open_calls: Vec::new(),
                close_calls: 0,
                scripted: VecDeque::new(),
                default_behavior: OpenBehavior::Succeed,
                latency: Duration::ZERO,
            })),
        }
    }

    /// Queue behaviors for the next opens, in order
    pub fn script(&self, behaviors: impl IntoIterator<Item = OpenBehavior>) {
        lock(&self.state).scripted.extend(behaviors);
    }

    /// Behavior once the script is exhausted
    pub fn set_default_behavior(&self, behavior: OpenBehavior) {
        lock(&self.state).default_behavior = behavior;
    }

    /// Simulated time to open a channel
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    /// Total `open_channel` calls so far
    pub fn open_calls(&self) -> usize {
        lock(&self.state).open_calls.len()
    }

    pub fn open_calls_for(&self, resource: &str) -> usize {
        lock(&self.state)
            .open_calls
            .iter()
            .filter(|r| r.as_str() == resource)
            .count()
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }

    /// Channels currently open
    pub fn open_channels(&self) -> usize {
        lock(&self.state).channels.len()
    }

    /// Deliver a change event to every channel watching `resource`.
    /// Returns how many channels received it.
    pub fn emit(&self, resource: &str, event: ChangeEvent) -> usize {
        self.send(resource, &ChannelEvent::Change(event))
    }

    /// Report a mid-life transport error on `resource`'s channels
    pub fn fail_channel(&self, resource: &str, message: &str) -> usize {
        self.send(resource, &ChannelEvent::Error(message.to_string()))
    }

    /// End `resource`'s channels from the backend side
    pub fn close_remote(&self, resource: &str) -> usize {
        let mut state = lock(&self.state);
        let before = state.channels.len();
        state.channels.retain(|_, (r, _)| r != resource);
        before - state.channels.len()
    }

    fn send(&self, resource: &str, event: &ChannelEvent) -> usize {
        lock(&self.state)
            .channels
            .values()
            .filter(|(r, _)| r == resource)
            .filter(|(_, tx)| tx.send(event.clone()).is_ok())
            .count()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_channel(&self, resource: &str) -> Result<Channel, TransportError> {
        let (behavior, latency) = {
            let mut state = lock(&self.state);
            state.open_calls.push(resource.to_string());
            let behavior = state
                .scripted
                .pop_front()
                .unwrap_or(state.default_behavior);
            (behavior, state.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match behavior {
            OpenBehavior::Succeed => {
                let (tx, rx) = mpsc::unbounded_channel();
                let id = ChannelId::new();
                let _ = tx.send(ChannelEvent::Subscribed);
                lock(&self.state)
                    .channels
                    .insert(id, (resource.to_string(), tx));
                debug!(resource = %resource, channel = %id, "Memory channel opened");
                Ok(Channel {
                    id,
                    events: UnboundedReceiverStream::new(rx).boxed(),
                })
            }
            OpenBehavior::Fail => Err(TransportError::Open(format!(
                "scripted failure for '{resource}'"
            ))),
            OpenBehavior::Hang => std::future::pending().await,
        }
    }

    async fn close_channel(&self, channel: ChannelId) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.close_calls += 1;
        state
            .channels
            .remove(&channel)
            .map(|_| ())
            .ok_or(TransportError::Closed)
    }
}

// === Recording Sinks ===

/// Captures every invalidation with the instant it was delivered
#[derive(Debug, Clone, Default)]
pub struct RecordingInvalidation {
    calls: Arc<Mutex<Vec<(InvalidationKey, Instant)>>>,
}

impl RecordingInvalidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(InvalidationKey, Instant)> {
        lock(&self.calls).clone()
    }

    pub fn count_for(&self, key: &InvalidationKey) -> usize {
        lock(&self.calls).iter().filter(|(k, _)| k == key).count()
    }

    pub fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.calls).is_empty()
    }
}

impl InvalidationSink for RecordingInvalidation {
    fn invalidate(&self, key: &InvalidationKey) {
        lock(&self.calls).push((key.clone(), Instant::now()));
    }
}

/// Captures user-facing notifications
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifications {
    messages: Arc<Mutex<Vec<(String, NotificationLevel)>>>,
}

impl RecordingNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, NotificationLevel)> {
        lock(&self.messages).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.messages).is_empty()
    }
}

impl NotificationSink for RecordingNotifications {
    fn notify(&self, message: &str, level: NotificationLevel) {
        lock(&self.messages).push((message.to_string(), level));
    }
}

/// Reachability the test or demo flips by hand
#[derive(Debug, Clone)]
pub struct ManualReachability {
    online: Arc<AtomicBool>,
}

impl ManualReachability {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for ManualReachability {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ReachabilityProbe for ManualReachability {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
