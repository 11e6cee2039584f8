// ABOUTME: Shared value types for realtime subscriptions
//
// Priorities, invalidation keys, subscription identity, channel ids and the
// events a pooled channel delivers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// === Priority ===

/// How quickly a subscription is admitted and how long its invalidations wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Bypasses the admission queue, invalidates on the next tick
    High,
    /// Default tier
    #[default]
    Medium,
    /// Background data, longest coalescing window
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(name)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

// === Invalidation Key ===

/// Identifies the downstream cache entry to refresh.
///
/// Either a single key or a composite path such as `["jobs", "list", "42"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvalidationKey(Vec<String>);

impl InvalidationKey {
    /// Build a composite key from its segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The key's segments in order
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for InvalidationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(":"))
    }
}

impl From<&str> for InvalidationKey {
    fn from(key: &str) -> Self {
        Self(vec![key.to_string()])
    }
}

impl From<String> for InvalidationKey {
    fn from(key: String) -> Self {
        Self(vec![key])
    }
}

impl From<Vec<String>> for InvalidationKey {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl<const N: usize> From<[&str; N]> for InvalidationKey {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

// === Subscription Key ===

/// Dedup identity of a logical subscription: `(resource, invalidation key)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Backend resource (table) being watched
    pub resource: String,
    /// Cache entry refreshed when the resource changes
    pub invalidation: InvalidationKey,
}

impl SubscriptionKey {
    pub fn new(resource: impl Into<String>, invalidation: impl Into<InvalidationKey>) -> Self {
        Self {
            resource: resource.into(),
            invalidation: invalidation.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.resource, self.invalidation)
    }
}

// === Channel Id ===

/// Opaque identifier of a live transport channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    /// Generate a new unique channel ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// === Events ===

/// Kind of row-level change reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change notification for a watched resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }
}

/// Everything a pooled channel can report after it has been opened
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Backend confirmed the subscription
    Subscribed,
    /// A row changed
    Change(ChangeEvent),
    /// Transport failure mid-life
    Error(String),
    /// Channel ended
    Closed,
}

/// Connectivity and visibility transitions forwarded by the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySignal {
    Online,
    Offline,
    Visible,
    Hidden,
}

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}
