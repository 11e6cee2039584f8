// ABOUTME: Admission batcher - debounces and rate-limits new subscriptions
//
// Requests collect in a FIFO for a short debounce window, then drain in
// bounded batches with a pause between batches so a page mounting twenty
// features does not hit the backend with twenty channel opens at once.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use super::deadline::{DeadlineQueue, TimerId};
use super::engine::Timer;
use super::types::SubscriptionKey;

#[derive(Debug)]
pub struct AdmissionBatcher {
    queue: VecDeque<SubscriptionKey>,
    queued: HashSet<SubscriptionKey>,
    debounce: Duration,
    batch_size: usize,
    batch_delay: Duration,
    tick: Option<TimerId>,

    /// Between batches of one burst; new arrivals join without resetting the timer
    draining: bool,
}

impl AdmissionBatcher {
    pub fn new(debounce: Duration, batch_size: usize, batch_delay: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            debounce,
            batch_size: batch_size.max(1),
            batch_delay,
            tick: None,
            draining: false,
        }
    }

    /// Queue a subscription for admission. Returns false if it was already queued.
    pub fn enqueue(
        &mut self,
        key: SubscriptionKey,
        now: Instant,
        timers: &mut DeadlineQueue<Timer>,
    ) -> bool {
        if !self.queued.insert(key.clone()) {
            return false;
        }
        self.queue.push_back(key);

        if !self.draining {
            if let Some(previous) = self.tick.take() {
                timers.cancel(previous);
            }
            self.tick = Some(timers.schedule(now + self.debounce, Timer::AdmissionTick));
        }
        true
    }

    /// Drop a queued request (unsubscribed before admission)
    pub fn remove(&mut self, key: &SubscriptionKey) -> bool {
        if !self.queued.remove(key) {
            return false;
        }
        self.queue.retain(|queued| queued != key);
        true
    }

    /// Take the next batch when the tick fires, scheduling the following one
    /// if more requests remain.
    pub fn next_batch(&mut self, now: Instant, timers: &mut DeadlineQueue<Timer>) -> Vec<SubscriptionKey> {
        self.tick = None;

        let take = self.batch_size.min(self.queue.len());
        let batch: Vec<SubscriptionKey> = self.queue.drain(..take).collect();
        for key in &batch {
            self.queued.remove(key);
        }

        if self.queue.is_empty() {
            self.draining = false;
        } else {
            self.draining = true;
            self.tick = Some(timers.schedule(now + self.batch_delay, Timer::AdmissionTick));
        }
        batch
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.queued.contains(key)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every queued request and the pending tick
    pub fn clear(&mut self, timers: &mut DeadlineQueue<Timer>) {
        if let Some(tick) = self.tick.take() {
            timers.cancel(tick);
        }
        self.queue.clear();
        self.queued.clear();
        self.draining = false;
    }
}
