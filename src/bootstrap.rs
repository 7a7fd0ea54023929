//! First-time database creation.
//!
//! The health check runs the client tool against the configured database;
//! until that database exists it reports "Database <name> is not defined".

use crate::docker::ContainerRuntime;
use crate::log_scan::LOG_TAIL_LINES;
use crate::probe::{HealthLogEntry, RuntimeProbe};
use std::sync::Arc;

/// Host and database arrive as `$1`/`$2`; the password only through the
/// exec environment.
const CREATE_DB_SCRIPT: &str = r#"exec /opt/vertica/bin/admintools -t create_db -s "$1" -d "$2" -p "$VSUP_DB_PASSWORD""#;
const DEFAULT_CREATE_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    HealthLog,
    ContainerLog,
}

/// Evidence that the configured database was never created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDatabaseSignal {
    pub database: String,
    pub source: SignalSource,
    /// The line that matched.
    pub evidence: String,
}

impl MissingDatabaseSignal {
    pub fn from_text(text: &str, database: &str, source: SignalSource) -> Option<Self> {
        let token = format!("database {}", database).to_lowercase();
        text.lines()
            .find(|line| {
                let lowered = line.to_lowercase();
                lowered.contains(&token) && lowered.contains("not defined")
            })
            .map(|line| MissingDatabaseSignal {
                database: database.to_string(),
                source,
                evidence: line.trim().to_string(),
            })
    }

    pub fn from_health_log(entries: &[HealthLogEntry], database: &str) -> Option<Self> {
        entries
            .iter()
            .find_map(|entry| Self::from_text(&entry.output, database, SignalSource::HealthLog))
    }
}

/// Whether recent health-check output reports `database` as undefined.
pub fn detect_missing_database(entries: &[HealthLogEntry], database: &str) -> bool {
    MissingDatabaseSignal::from_health_log(entries, database).is_some()
}

pub struct DatabaseBootstrapper {
    runtime: Arc<dyn ContainerRuntime>,
    probe: RuntimeProbe,
    admin_os_user: String,
    fallback_password: Option<String>,
}

impl DatabaseBootstrapper {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        probe: RuntimeProbe,
        admin_os_user: impl Into<String>,
        fallback_password: Option<String>,
    ) -> Self {
        DatabaseBootstrapper {
            runtime,
            probe,
            admin_os_user: admin_os_user.into(),
            fallback_password,
        }
    }

    /// Health history first, recent container logs as a fallback.
    pub async fn missing_database_signal(
        &self,
        container: &str,
        database: &str,
        health_log: &[HealthLogEntry],
    ) -> Option<MissingDatabaseSignal> {
        if let Some(signal) = MissingDatabaseSignal::from_health_log(health_log, database) {
            return Some(signal);
        }
        match self.runtime.logs(container, LOG_TAIL_LINES).await {
            Ok(text) => MissingDatabaseSignal::from_text(&text, database, SignalSource::ContainerLog),
            Err(e) => {
                tracing::debug!("Unable to read logs of {}: {}", container, e);
                None
            }
        }
    }

    /// Run `admintools -t create_db` inside the container, as the admin OS
    /// user and then as root. The password comes from the container's
    /// `VERTICA_DB_PASSWORD`, else the configured bootstrap password.
    /// Failures are logged and reported as `false`.
    pub async fn attempt_creation(&self, container: &str, database: &str) -> bool {
        let env = self.probe.container_env(container).await;
        let password = env
            .get("VERTICA_DB_PASSWORD")
            .cloned()
            .or_else(|| self.fallback_password.clone())
            .unwrap_or_default();
        let host = env
            .get("VERTICA_DB_HOST")
            .or_else(|| env.get("VERTICA_HOST"))
            .filter(|h| !h.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_CREATE_HOST.to_string());

        tracing::info!(
            "Invoking admintools to create database '{}' inside container {}",
            database,
            container
        );
        let command = ["sh", "-c", CREATE_DB_SCRIPT, "create_db", &host, database];
        let env = [("VSUP_DB_PASSWORD", password.as_str())];

        for user in [self.admin_os_user.as_str(), "0"] {
            match self
                .runtime
                .exec_with_env(container, Some(user), &env, &command)
                .await
            {
                Ok(out) if out.success() => {
                    tracing::info!("Created database '{}' inside {}", database, container);
                    return true;
                }
                Ok(out) if out.combined().to_lowercase().contains("already exists") => {
                    tracing::info!("Database '{}' already exists inside {}", database, container);
                    return true;
                }
                Ok(out) => tracing::warn!(
                    "admintools create_db as user {} exited with {:?}: {}",
                    user,
                    out.exit_code,
                    out.combined()
                ),
                Err(e) => tracing::warn!("admintools create_db as user {} failed: {}", user, e),
            }
        }
        false
    }
}
