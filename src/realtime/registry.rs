// ABOUTME: Subscription registry - bookkeeping of logical subscriptions
//
// One record per (resource, invalidation key). Pure bookkeeping: no timers,
// no network. Records reference their connection by resource name only.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::deadline::TimerId;
use super::types::{InvalidationKey, Priority, SubscriptionKey};

/// Lifecycle state of a subscription record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Waiting for admission or for its connection
    Pending,
    /// Connection open, events flowing
    Active,
    /// Inactive past the stale threshold, about to be evicted
    Stale,
}

/// One logical subscriber intent
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub key: SubscriptionKey,
    pub priority: Priority,
    pub last_activity_at: Instant,
    pub retry_count: u32,
    pub state: SubscriptionState,

    /// Retry budget exhausted; no automatic retries until a forced refresh
    pub abandoned: bool,

    /// Counted in its pooled connection's `subscriber_count`
    pub attached: bool,

    /// Pending retry timer, if any
    pub retry_timer: Option<TimerId>,
}

impl SubscriptionRecord {
    fn new(key: SubscriptionKey, priority: Priority, now: Instant) -> Self {
        Self {
            key,
            priority,
            last_activity_at: now,
            retry_count: 0,
            state: SubscriptionState::Pending,
            abandoned: false,
            attached: false,
            retry_timer: None,
        }
    }

    pub fn resource(&self) -> &str {
        &self.key.resource
    }

    pub const fn invalidation_key(&self) -> &InvalidationKey {
        &self.key.invalidation
    }
}

/// Outcome of registering a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New record created in `Pending` state
    Created,
    /// A record for this key already existed; nothing changed
    Existing,
}

/// All live subscription records
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    records: HashMap<SubscriptionKey, SubscriptionRecord>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`. Idempotent per key.
    pub fn register(&mut self, key: SubscriptionKey, priority: Priority, now: Instant) -> Registration {
        if self.records.contains_key(&key) {
            return Registration::Existing;
        }
        self.records
            .insert(key.clone(), SubscriptionRecord::new(key, priority, now));
        Registration::Created
    }

    pub fn remove(&mut self, key: &SubscriptionKey) -> Option<SubscriptionRecord> {
        self.records.remove(key)
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<&SubscriptionRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &SubscriptionKey) -> Option<&mut SubscriptionRecord> {
        self.records.get_mut(key)
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.records.contains_key(key)
    }

    /// Records watching `resource` that are attached to its connection
    pub fn attached_for_resource(&self, resource: &str) -> Vec<SubscriptionKey> {
        self.records
            .values()
            .filter(|r| r.attached && r.resource() == resource)
            .map(|r| r.key.clone())
            .collect()
    }

    /// Refresh activity for every live record of `resource` after a change
    /// event. Returns the (invalidation key, priority) pairs to schedule.
    pub fn touch_resource(&mut self, resource: &str, now: Instant) -> Vec<(InvalidationKey, Priority)> {
        self.records
            .values_mut()
            .filter(|r| !r.abandoned && r.resource() == resource)
            .map(|record| {
                record.last_activity_at = now;
                record.state = SubscriptionState::Active;
                record.retry_count = 0;
                (record.key.invalidation.clone(), record.priority)
            })
            .collect()
    }

    /// Mark every attached record of `resource` active without consuming
    /// their retry budget
    pub fn activate_resource(&mut self, resource: &str, now: Instant) {
        for record in self
            .records
            .values_mut()
            .filter(|r| r.attached && r.resource() == resource)
        {
            record.state = SubscriptionState::Active;
            record.last_activity_at = now;
        }
    }

    /// Flag records with no activity for longer than `threshold` as stale and
    /// return their keys
    pub fn mark_stale(&mut self, now: Instant, threshold: Duration) -> Vec<SubscriptionKey> {
        self.records
            .values_mut()
            .filter(|r| now.saturating_duration_since(r.last_activity_at) > threshold)
            .map(|record| {
                record.state = SubscriptionState::Stale;
                record.key.clone()
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.records.keys().cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &SubscriptionRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut SubscriptionRecord> {
        self.records.values_mut()
    }

    pub fn abandoned_count(&self) -> usize {
        self.records.values().filter(|r| r.abandoned).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
