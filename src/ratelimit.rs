//! In-memory sliding-window rate limiter
//!
//! Keyed by caller (address + endpoint suffix). Good enough for a
//! single-node deployment; entries age out as their window slides past.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Default)]
pub struct RateLimiter {
    events: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt under `key` and report whether it is allowed:
    /// at most `limit` attempts within the trailing `per_seconds` window.
    pub fn allow(&self, key: &str, limit: usize, per_seconds: i64) -> bool {
        let now = Utc::now();
        let threshold = now - Duration::seconds(per_seconds);

        let mut events = self.events.lock();
        let queue = events.entry(key.to_string()).or_default();
        while queue.front().is_some_and(|t| *t < threshold) {
            queue.pop_front();
        }
        if queue.len() >= limit {
            return false;
        }
        queue.push_back(now);
        true
    }
}
