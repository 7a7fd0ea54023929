//! Point-in-time container introspection.
//!
//! Nothing here is cached: every call re-queries the runtime. Empty or
//! garbled runtime output is a normal condition while a container boots,
//! so every accessor degrades to `None` / empty instead of failing.

use crate::clock::{seconds_between, Clock};
use crate::docker::ContainerRuntime;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

const STATUS_TEMPLATE: &str = "{{.State.Status}}";
const HEALTH_TEMPLATE: &str = "{{if .State.Health}}{{.State.Health.Status}}{{end}}";
const STARTED_AT_TEMPLATE: &str = "{{.State.StartedAt}}";
const RESTART_COUNT_TEMPLATE: &str = "{{.RestartCount}}";
const HEALTH_LOG_TEMPLATE: &str = "{{json .State.Health.Log}}";
const ENV_TEMPLATE: &str = "{{json .Config.Env}}";
const IMAGE_TEMPLATE: &str = "{{.Config.Image}}";

/// Runtime-reported process status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Absent,
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
}

impl ContainerStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => Some(ContainerStatus::Created),
            "running" => Some(ContainerStatus::Running),
            "restarting" => Some(ContainerStatus::Restarting),
            "paused" => Some(ContainerStatus::Paused),
            "exited" | "removing" => Some(ContainerStatus::Exited),
            "dead" => Some(ContainerStatus::Dead),
            _ => None,
        }
    }

    /// Statuses whose health state is worth acting on.
    pub fn is_live(self) -> bool {
        matches!(self, ContainerStatus::Running | ContainerStatus::Restarting)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Absent => "absent",
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Health check classification; `None` when the image defines no check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("starting") => HealthState::Starting,
            Some("healthy") => HealthState::Healthy,
            Some("unhealthy") => HealthState::Unhealthy,
            _ => HealthState::None,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::None => "none",
            HealthState::Starting => "starting",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// One probe of a container, valid for a single reconciliation tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerObservation {
    pub status: ContainerStatus,
    pub health: HealthState,
    pub uptime_seconds: Option<f64>,
    pub restart_count: Option<u32>,
}

impl ContainerObservation {
    pub fn absent() -> Self {
        ContainerObservation {
            status: ContainerStatus::Absent,
            health: HealthState::None,
            uptime_seconds: None,
            restart_count: None,
        }
    }
}

/// One entry of the runtime's health-check history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthLogEntry {
    #[serde(rename = "Output", default)]
    pub output: String,
    #[serde(rename = "ExitCode", default)]
    pub exit_code: i64,
}

fn timestamp_regex() -> &'static Regex {
    static TIMESTAMP_REGEX: OnceLock<Regex> = OnceLock::new();
    TIMESTAMP_REGEX.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})(?:\.(\d+))?(Z|[+-]\d{2}:\d{2})?$")
            .expect("static regex pattern is valid")
    })
}

/// Normalize a runtime timestamp to exactly microsecond precision with an
/// explicit offset.
///
/// Fractions are truncated or zero-padded to six digits; a missing offset or
/// `Z` becomes `+00:00`. Returns `None` for anything that is not an RFC 3339
/// style timestamp.
///
/// ```
/// use vertica_supervisor::probe::normalize_docker_timestamp;
///
/// assert_eq!(
///     normalize_docker_timestamp("2024-01-01T05:30:09.987654321+05:30").as_deref(),
///     Some("2024-01-01T05:30:09.987654+05:30"),
/// );
/// ```
pub fn normalize_docker_timestamp(value: &str) -> Option<String> {
    let caps = timestamp_regex().captures(value.trim())?;
    let base = caps.get(1)?.as_str();
    let fraction = caps.get(2).map_or("", |m| m.as_str());
    let offset = match caps.get(3).map(|m| m.as_str()) {
        None | Some("Z") => "+00:00",
        Some(tz) => tz,
    };

    let mut micros: String = fraction.chars().take(6).collect();
    while micros.len() < 6 {
        micros.push('0');
    }
    Some(format!("{}.{}{}", base, micros, offset))
}

/// Seconds between `started_at` and `now`, never negative.
///
/// The runtime's zero timestamp (`0001-01-01T00:00:00Z`) means the
/// container has not started yet and yields `0.0`.
pub fn uptime_from(started_at: &str, now: DateTime<Utc>) -> Option<f64> {
    let normalized = normalize_docker_timestamp(started_at)?;
    if normalized.starts_with("0001-01-01T00:00:00.000000") {
        return Some(0.0);
    }
    let started = DateTime::parse_from_rfc3339(&normalized).ok()?;
    Some(seconds_between(started.with_timezone(&Utc), now))
}

/// Parse `{{json .State.Health.Log}}` output, skipping malformed entries.
pub fn parse_health_log(raw: &str) -> Vec<HealthLogEntry> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return Vec::new();
    }
    let values: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(values) => values,
        Err(_) => return Vec::new(),
    };
    values
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect()
}

/// Parse `{{json .Config.Env}}` output (`["KEY=value", ...]`).
pub fn parse_container_env(raw: &str) -> HashMap<String, String> {
    let entries: Vec<String> = serde_json::from_str(raw.trim()).unwrap_or_default();
    entries
        .into_iter()
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Introspection queries against one runtime.
#[derive(Clone)]
pub struct RuntimeProbe {
    runtime: Arc<dyn ContainerRuntime>,
    clock: Arc<dyn Clock>,
}

impl RuntimeProbe {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, clock: Arc<dyn Clock>) -> Self {
        RuntimeProbe { runtime, clock }
    }

    async fn inspect(&self, container: &str, template: &str) -> Option<String> {
        match self.runtime.inspect(container, template).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("inspect {} failed for {}: {}", template, container, e);
                None
            }
        }
    }

    /// Full observation: status, health, uptime and restart count.
    pub async fn status(&self, container: &str) -> ContainerObservation {
        let status = match self.inspect(container, STATUS_TEMPLATE).await {
            Some(raw) => match ContainerStatus::parse(&raw) {
                Some(status) => status,
                None => {
                    tracing::debug!("Unrecognised status '{}' for {}", raw, container);
                    return ContainerObservation::absent();
                }
            },
            None => return ContainerObservation::absent(),
        };

        let health = HealthState::parse(self.inspect(container, HEALTH_TEMPLATE).await.as_deref());
        ContainerObservation {
            status,
            health,
            uptime_seconds: self.uptime_seconds(container).await,
            restart_count: self.restart_count(container).await,
        }
    }

    pub async fn uptime_seconds(&self, container: &str) -> Option<f64> {
        let started_at = self.inspect(container, STARTED_AT_TEMPLATE).await?;
        uptime_from(&started_at, self.clock.now())
    }

    pub async fn restart_count(&self, container: &str) -> Option<u32> {
        self.inspect(container, RESTART_COUNT_TEMPLATE)
            .await?
            .trim()
            .parse()
            .ok()
    }

    pub async fn health_log(&self, container: &str) -> Vec<HealthLogEntry> {
        self.inspect(container, HEALTH_LOG_TEMPLATE)
            .await
            .map(|raw| parse_health_log(&raw))
            .unwrap_or_default()
    }

    pub async fn container_env(&self, container: &str) -> HashMap<String, String> {
        self.inspect(container, ENV_TEMPLATE)
            .await
            .map(|raw| parse_container_env(&raw))
            .unwrap_or_default()
    }

    pub async fn image_of(&self, container: &str) -> Option<String> {
        self.inspect(container, IMAGE_TEMPLATE).await
    }
}

/// Logs each health-check entry once as the history grows.
#[derive(Debug, Default)]
pub struct HealthLogTracker {
    seen: usize,
}

impl HealthLogTracker {
    /// Entries not reported before. A shrinking history (the runtime keeps
    /// a bounded window) resets the cursor.
    pub fn new_entries<'a>(&mut self, entries: &'a [HealthLogEntry]) -> &'a [HealthLogEntry] {
        if entries.len() < self.seen {
            self.seen = 0;
        }
        let fresh = &entries[self.seen..];
        self.seen = entries.len();
        fresh
    }
}
