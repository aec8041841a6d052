//! Negative-result filter
//!
//! Remembers queries whose search found nothing so that repeating them
//! returns immediately. Membership is exact (no false positives): a query
//! is only short-circuited after it was actually searched and came back
//! empty. Entries expire after a TTL, so symbols added later are picked up,
//! and the set is bounded; at capacity the oldest entry is dropped.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct NegativeFilter {
    entries: HashMap<String, Instant>,
    capacity: usize,
    ttl: Duration,
}

impl NegativeFilter {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Whether `key` is known to produce no results. Expired keys are
    /// dropped on the way.
    pub fn contains(&mut self, key: &str, now: Instant) -> bool {
        match self.entries.get(key) {
            Some(recorded) if now.duration_since(*recorded) <= self.ttl => true,
            Some(_) => {
                self.entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Record an empty search for `key`
    pub fn record(&mut self, key: &str, now: Instant) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, recorded)| **recorded)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key.to_string(), now);
    }

    /// Forget `key`, e.g. after it produced results
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
