//! Throttled container restarts.

use crate::clock::{seconds_between, Clock};
use crate::docker::ContainerRuntime;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Restarts a container at most once per throttle window, regardless of
/// which repair asked for it.
pub struct Restarter {
    runtime: Arc<dyn ContainerRuntime>,
    clock: Arc<dyn Clock>,
    throttle: Duration,
    last_restart: Option<DateTime<Utc>>,
    restarts: u32,
}

impl Restarter {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, clock: Arc<dyn Clock>, throttle: Duration) -> Self {
        Restarter {
            runtime,
            clock,
            throttle,
            last_restart: None,
            restarts: 0,
        }
    }

    /// Restart `container` unless another restart happened within the
    /// throttle window. Returns whether a restart was issued successfully.
    pub async fn restart(&mut self, container: &str, reason: &str) -> bool {
        let now = self.clock.now();
        if let Some(last) = self.last_restart {
            let elapsed = seconds_between(last, now);
            if elapsed < self.throttle.as_secs_f64() {
                tracing::info!(
                    "Skipping restart of {} ({}); last restart {:.0}s ago",
                    container,
                    reason,
                    elapsed
                );
                return false;
            }
        }

        tracing::info!("Restarting {} to {}", container, reason);
        match self.runtime.restart(container).await {
            Ok(()) => {
                self.last_restart = Some(now);
                self.restarts += 1;
                true
            }
            Err(e) => {
                tracing::warn!("Failed to restart {} to {}: {}", container, reason, e);
                false
            }
        }
    }

    /// Successful restarts issued so far.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}
