//! Event Dedup Cache
//!
//! Suppresses duplicate ingestion triggers for the same file inside a TTL
//! window. Camera firmware and upload bridges often deliver the same motion
//! event several times in a burst; only the first trigger passes.
//!
//! Internals: an arrival-ordered queue of `(identifier, seen_at)` plus a map
//! from identifier to its latest timestamp. Stale entries are popped from
//! the queue front on every call, so memory is bounded by the number of
//! distinct identifiers seen within one TTL window.
//!
//! The check-and-insert runs under one `std::sync::Mutex` critical section
//! with no await inside, so concurrent triggers for the same identifier are
//! serialized through the gate.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default suppression window
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

#[derive(Default)]
struct CacheInner {
    order: VecDeque<(String, Instant)>,
    latest: HashMap<String, Instant>,
}

impl CacheInner {
    /// Pop entries older than `ttl` from the front of the queue
    fn purge(&mut self, now: Instant, ttl: Duration) {
        while let Some((_, seen_at)) = self.order.front() {
            if now.saturating_duration_since(*seen_at) <= ttl {
                break;
            }
            let Some((identifier, seen_at)) = self.order.pop_front() else {
                break;
            };
            // Only drop the map record if nothing newer replaced it
            if self
                .latest
                .get(&identifier)
                .is_some_and(|latest| *latest <= seen_at)
            {
                self.latest.remove(&identifier);
            }
        }
    }
}

/// Process-wide trigger gate, held in application state
pub struct DedupCache {
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Gate check using the configured TTL and the current instant
    pub fn check(&self, identifier: &str) -> bool {
        self.should_process(identifier, Instant::now(), self.ttl)
    }

    /// First call for `identifier` within `ttl` returns `true` and records it;
    /// later calls inside the window return `false`.
    ///
    /// An empty identifier always passes (no reliable dedup key).
    pub fn should_process(&self, identifier: &str, now: Instant, ttl: Duration) -> bool {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return true;
        }

        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        inner.purge(now, ttl);

        if let Some(seen_at) = inner.latest.get(identifier) {
            if now.saturating_duration_since(*seen_at) <= ttl {
                tracing::debug!(identifier, "Duplicate trigger suppressed");
                return false;
            }
        }

        inner.order.push_back((identifier.to_string(), now));
        inner.latest.insert(identifier.to_string(), now);
        true
    }

    /// Distinct identifiers currently tracked
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.latest.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().latest.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
