// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use crate::docker::DockerError;
use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(vsup::config::error),
        help("Check vsup.yaml and the DB_*/VERTICA_* environment overrides")
    )]
    Config(String),

    #[error("Docker error: {0}")]
    #[diagnostic(
        code(vsup::docker::error),
        help("Check that Docker is running with `docker ps`")
    )]
    Docker(#[from] DockerError),

    #[error("Timed out waiting for container readiness after {}s", .0.as_secs())]
    #[diagnostic(
        code(vsup::supervisor::timeout),
        help("Inspect `docker logs` for the container or raise timings.overall_timeout")
    )]
    Timeout(Duration),

    #[error("Container '{container}' stuck in starting state for {elapsed_secs:.0}s")]
    #[diagnostic(
        code(vsup::supervisor::stuck_starting),
        help("The health check never settled even after a restart. Check `docker logs {container}`")
    )]
    StuckStarting { container: String, elapsed_secs: f64 },

    #[error("Container '{container}' remained unhealthy after {restarts} restart(s), {recreates} recreate(s) and a data reset")]
    #[diagnostic(
        code(vsup::supervisor::remained_unhealthy),
        help("Check `docker logs {container}` for the failing health check")
    )]
    RemainedUnhealthy {
        container: String,
        restarts: u32,
        recreates: u32,
    },

    #[error("Failed to remove stale container '{container}': {reason}")]
    #[diagnostic(
        code(vsup::compose::removal),
        help("Remove it manually with `docker rm -f {container}`")
    )]
    ContainerRemoval { container: String, reason: String },

    #[error("Registry authentication failed for {registry}: {reason}")]
    #[diagnostic(
        code(vsup::compose::registry_auth),
        help("Check AWS credentials with `aws sts get-caller-identity`")
    )]
    RegistryAuth { registry: String, reason: String },

    #[error("Docker Compose error: {0}")]
    #[diagnostic(
        code(vsup::compose::error),
        help("Verify Docker is running with `docker ps` and check the compose file syntax")
    )]
    Compose(String),

    /// A `compose up` that may succeed on a later tick.
    #[error("Docker Compose failed: {0}")]
    #[diagnostic(code(vsup::compose::failed))]
    ComposeFailed(String),

    #[error("Unable to connect to Vertica ({label}) at {host}:{port} as {user}: {reason}")]
    #[diagnostic(code(vsup::connection::failed))]
    ConnectionFailed {
        label: String,
        host: String,
        port: u16,
        user: String,
        reason: String,
    },

    #[error("Port {host}:{port} did not become reachable within {timeout_secs}s: {reason}")]
    #[diagnostic(code(vsup::connection::port_unreachable))]
    PortUnreachable {
        host: String,
        port: u16,
        timeout_secs: u64,
        reason: String,
    },

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Database client failures.
///
/// Connection failures are retried by the verifier; query failures are not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),
}

impl DbError {
    pub fn is_connection(&self) -> bool {
        matches!(self, DbError::Connection(_))
    }
}

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::Timeout(_) => Some(
                "The container never reported healthy. Check `docker ps` and `docker logs` for the container.".to_string(),
            ),
            Error::StuckStarting { container, .. } => Some(format!(
                "Inspect the health history with: docker inspect --format '{{{{json .State.Health}}}}' {}",
                container
            )),
            Error::ContainerRemoval { container, .. } => Some(format!(
                "Remove the stale container manually: docker rm -f {}",
                container
            )),
            Error::RegistryAuth { .. } => Some(
                "Private registry images need AWS credentials able to call `aws ecr get-login-password`.".to_string(),
            ),
            Error::Compose(msg) | Error::ComposeFailed(msg)
                if msg.contains("No compose file") || msg.contains("not yet available") =>
            {
                Some("Set compose_files in vsup.yaml or pass --compose-file".to_string())
            }
            Error::Compose(_) | Error::ComposeFailed(_) => {
                Some("Check the compose file with: docker compose config".to_string())
            }
            Error::RemainedUnhealthy { .. } => Some(
                "Inspect the health history with `docker inspect`, or run `vsup reset-data --yes` and start over".to_string(),
            ),
            Error::ConnectionFailed { host, port, .. } => Some(format!(
                "Check that {}:{} is reachable and that the credentials in DBADMIN_*/ADMIN_* are correct",
                host, port
            )),
            Error::PortUnreachable { .. } => Some(
                "Check the published port in the compose file and any firewall in between".to_string(),
            ),
            Error::Config(_) => Some("Validate vsup.yaml against the documented fields".to_string()),
            Error::Docker(DockerError::Spawn { .. }) => {
                Some("Is the docker CLI installed and on PATH?".to_string())
            }
            Error::Docker(_) => Some("Check that Docker is running: docker ps".to_string()),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }

    /// Whether the supervisor loop must stop instead of retrying next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::StuckStarting { .. }
                | Error::RemainedUnhealthy { .. }
                | Error::ContainerRemoval { .. }
                | Error::RegistryAuth { .. }
                | Error::Compose(_)
                | Error::ConnectionFailed { .. }
                | Error::PortUnreachable { .. }
                | Error::Config(_)
        )
    }
}
