// ABOUTME: Deadline queue holding every pending timer of the realtime manager
//
// Debounce, backoff and sweep timers are entries keyed by their deadline. The
// actor sleeps until the earliest one, so paused tokio time drives them all.

use std::collections::BTreeMap;
use tokio::time::Instant;

/// Handle for a scheduled entry, used to cancel or identify it when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId {
    at: Instant,
    seq: u64,
}

impl TimerId {
    /// When this timer is due
    pub const fn deadline(&self) -> Instant {
        self.at
    }
}

/// Ordered set of tasks due at given instants.
///
/// Entries with equal deadlines fire in scheduling order.
#[derive(Debug)]
pub struct DeadlineQueue<T> {
    entries: BTreeMap<TimerId, T>,
    next_seq: u64,
}

impl<T> Default for DeadlineQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeadlineQueue<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `task` to become due at `at`
    pub fn schedule(&mut self, at: Instant, task: T) -> TimerId {
        let id = TimerId {
            at,
            seq: self.next_seq,
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        self.entries.insert(id, task);
        id
    }

    /// Remove a pending entry. Returns `None` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.entries.remove(&id)
    }

    /// Whether `id` is still pending
    pub fn contains(&self, id: TimerId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(TimerId::deadline)
    }

    /// Pop the earliest entry if it is due at `now`.
    ///
    /// Popping one at a time lets a handler schedule follow-up work that is
    /// itself already due.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, T)> {
        let first = *self.entries.keys().next()?;
        if first.at > now {
            return None;
        }
        self.entries.remove(&first).map(|task| (first, task))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every pending entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
