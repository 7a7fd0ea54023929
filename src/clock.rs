//! Time source for the supervisor.
//!
//! Every grace period, TTL and deadline is measured against a [`Clock`] so
//! the reconciliation loop can be driven deterministically under test.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time and real tokio sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Seconds elapsed from `earlier` to `later`, clamped at zero.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later.signed_duration_since(earlier);
    let secs = delta.num_microseconds().map_or_else(
        || delta.num_seconds() as f64,
        |micros| micros as f64 / 1_000_000.0,
    );
    secs.max(0.0)
}
