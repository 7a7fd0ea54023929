//! Cached pattern scans over recent container logs.
//!
//! Log retrieval is the most expensive probe, so each scan result is kept
//! per container for a TTL. The cache lives in the owning handler; it is not
//! safe to share one handler between concurrent supervisors of the same
//! container.

use crate::clock::{seconds_between, Clock};
use crate::docker::ContainerRuntime;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Number of trailing log lines inspected by every scan.
pub const LOG_TAIL_LINES: usize = 200;

#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entries: HashMap<String, (DateTime<Utc>, T)>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Cached value for `key` if it was stored less than one TTL ago.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<T> {
        let (checked_at, value) = self.entries.get(key)?;
        if seconds_between(*checked_at, now) < self.ttl.as_secs_f64() {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn insert(&mut self, key: &str, value: T, now: DateTime<Utc>) {
        self.entries.insert(key.to_string(), (now, value));
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// Scan the last [`LOG_TAIL_LINES`] lines of `container`'s logs with
/// `matcher`, consulting and refreshing `cache`.
///
/// A failed log read counts as "no match" and is cached like any other
/// result.
pub async fn scan_logs<F>(
    runtime: &dyn ContainerRuntime,
    clock: &dyn Clock,
    cache: &mut TtlCache<bool>,
    container: &str,
    matcher: F,
) -> bool
where
    F: Fn(&str) -> bool,
{
    let now = clock.now();
    if let Some(hit) = cache.get(container, now) {
        return hit;
    }

    let detected = match runtime.logs(container, LOG_TAIL_LINES).await {
        Ok(text) => !text.is_empty() && matcher(&text),
        Err(e) => {
            tracing::debug!("Unable to read logs for {}: {}", container, e);
            false
        }
    };
    cache.insert(container, detected, now);
    detected
}
