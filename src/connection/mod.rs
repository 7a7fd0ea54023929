//! Client connections to the database.
//!
//! The database client is a seam ([`DatabaseClient`]); the verifier adds
//! bounded retries, a deadline-aware attempt budget and transport security
//! resolution on top of it.

pub mod admin_user;
pub mod vsql;

pub use admin_user::{AdminUserOutcome, AdminUserProvisioner};
pub use vsql::VsqlClient;

use crate::clock::{seconds_between, Clock};
use crate::config::Credentials;
use crate::error::{DbError, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BOOTSTRAP_USER: &str = "dbadmin";

const PORT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Transport security negotiated with the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    Disable,
    /// Opportunistic TLS.
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl TlsMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TlsMode::Disable => "disable",
            TlsMode::Prefer => "prefer",
            TlsMode::Require => "require",
            TlsMode::VerifyCa => "verify-ca",
            TlsMode::VerifyFull => "verify-full",
        }
    }

    /// Override from configuration or environment, falling back to
    /// [`TlsMode::Prefer`] on absent or unknown values.
    pub fn resolve(override_mode: Option<&str>) -> Self {
        match override_mode.map(str::trim).filter(|m| !m.is_empty()) {
            None => TlsMode::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("Unknown TLS mode '{}'; using 'prefer'", raw);
                TlsMode::default()
            }),
        }
    }
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "disable" => Ok(TlsMode::Disable),
            "prefer" => Ok(TlsMode::Prefer),
            "require" => Ok(TlsMode::Require),
            "verify-ca" => Ok(TlsMode::VerifyCa),
            "verify-full" => Ok(TlsMode::VerifyFull),
            other => Err(format!("unknown TLS mode '{}'", other)),
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub tls_mode: TlsMode,
    pub timeout: Duration,
}

/// An open session.
#[async_trait]
pub trait DbSession: Send {
    /// First row of the result, columns as text.
    async fn query_one(&mut self, sql: &str) -> std::result::Result<Option<Vec<String>>, DbError>;

    async fn execute(&mut self, sql: &str) -> std::result::Result<(), DbError>;
}

#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> std::result::Result<Box<dyn DbSession>, DbError>;
}

/// `"name"` with embedded quotes doubled.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `'value'` with embedded quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Bootstrap credentials: the container's `VERTICA_DB_USER`/
/// `VERTICA_DB_PASSWORD`, then the configured pair, then `dbadmin` with an
/// empty password.
pub fn bootstrap_credentials(
    container_env: &HashMap<String, String>,
    configured: &Credentials,
) -> (String, String) {
    let user = match container_env.get("VERTICA_DB_USER") {
        Some(user) if !user.trim().is_empty() => user.clone(),
        Some(_) => DEFAULT_BOOTSTRAP_USER.to_string(),
        None => configured
            .bootstrap_user
            .clone()
            .unwrap_or_else(|| DEFAULT_BOOTSTRAP_USER.to_string()),
    };
    let password = container_env
        .get("VERTICA_DB_PASSWORD")
        .cloned()
        .or_else(|| configured.bootstrap_password.clone())
        .unwrap_or_default();
    (user, password)
}

/// Retry policy for one [`ConnectionVerifier::connect`] call.
#[derive(Debug, Clone, Copy)]
pub struct ConnectAttempt {
    pub attempts: u32,
    pub delay: Duration,
    /// Exhaustion is an error instead of `Ok(false)`.
    pub fatal: bool,
    pub deadline: Option<DateTime<Utc>>,
}

pub struct ConnectionVerifier {
    client: Arc<dyn DatabaseClient>,
    clock: Arc<dyn Clock>,
    port: u16,
    database: String,
    tls_mode: TlsMode,
    connect_timeout: Duration,
}

impl ConnectionVerifier {
    pub fn new(
        client: Arc<dyn DatabaseClient>,
        clock: Arc<dyn Clock>,
        port: u16,
        database: impl Into<String>,
        tls_mode: TlsMode,
        connect_timeout: Duration,
    ) -> Self {
        ConnectionVerifier {
            client,
            clock,
            port,
            database: database.into(),
            tls_mode,
            connect_timeout,
        }
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.tls_mode
    }

    pub fn params(&self, host: &str, user: &str, password: &str) -> ConnectParams {
        ConnectParams {
            host: host.to_string(),
            port: self.port,
            user: user.to_string(),
            password: password.to_string(),
            database: self.database.clone(),
            tls_mode: self.tls_mode,
            timeout: self.connect_timeout,
        }
    }

    /// Attempts that fit before `deadline`, at least one while any time
    /// remains.
    pub fn attempt_budget(
        &self,
        attempts: u32,
        delay: Duration,
        deadline: Option<DateTime<Utc>>,
    ) -> u32 {
        let Some(deadline) = deadline else {
            return attempts;
        };
        let remaining = seconds_between(self.clock.now(), deadline);
        if remaining <= 0.0 {
            return 0;
        }
        let per_attempt = delay.max(self.connect_timeout).as_secs_f64();
        if per_attempt <= 0.0 {
            return attempts;
        }
        let allowed = (remaining / per_attempt).floor() as u32 + 1;
        attempts.min(allowed).max(1)
    }

    async fn verify_once(&self, params: &ConnectParams) -> std::result::Result<(), DbError> {
        let mut session = self.client.connect(params).await?;
        match session.query_one("SELECT 1").await? {
            Some(row) if row.first().map(|v| v.trim()) == Some("1") => Ok(()),
            other => Err(DbError::Query(format!(
                "unexpected response to SELECT 1: {:?}",
                other
            ))),
        }
    }

    /// Connect and run `SELECT 1`, retrying connection failures.
    ///
    /// Returns `Ok(false)` on exhaustion unless the attempt is fatal.
    pub async fn connect(
        &self,
        label: &str,
        host: &str,
        user: &str,
        password: &str,
        attempt: ConnectAttempt,
    ) -> Result<bool> {
        let params = self.params(host, user, password);
        let budget = self.attempt_budget(attempt.attempts, attempt.delay, attempt.deadline);
        let mut last_error = String::from("no time left before the deadline");

        tracing::info!(
            "Connecting to Vertica ({}) at {}:{} as {} (tlsmode={}, up to {} attempts)",
            label,
            host,
            self.port,
            user,
            self.tls_mode,
            budget
        );
        for n in 1..=budget {
            match self.verify_once(&params).await {
                Ok(()) => {
                    tracing::info!(
                        "Connected to Vertica ({}) at {}:{} as {}",
                        label,
                        host,
                        self.port,
                        user
                    );
                    return Ok(true);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if !e.is_connection() {
                        tracing::warn!("Vertica ({}) rejected the verification query: {}", label, e);
                        break;
                    }
                    tracing::info!(
                        "Connection attempt {}/{} to Vertica ({}) failed: {}",
                        n,
                        budget,
                        label,
                        e
                    );
                }
            }
            if n < budget {
                self.sleep_until(attempt.delay, attempt.deadline).await;
            }
        }

        if attempt.fatal {
            return Err(Error::ConnectionFailed {
                label: label.to_string(),
                host: host.to_string(),
                port: self.port,
                user: user.to_string(),
                reason: last_error,
            });
        }
        tracing::warn!(
            "Skipping Vertica ({}) at {}:{}: {}",
            label,
            host,
            self.port,
            last_error
        );
        Ok(false)
    }

    async fn sleep_until(&self, delay: Duration, deadline: Option<DateTime<Utc>>) {
        if delay.is_zero() {
            return;
        }
        let delay = match deadline {
            None => delay,
            Some(deadline) => {
                let remaining = seconds_between(self.clock.now(), deadline);
                if remaining <= 0.0 {
                    return;
                }
                delay.min(Duration::from_secs_f64(remaining))
            }
        };
        self.clock.sleep(delay).await;
    }
}

/// Wait until a TCP connection to `host:port` succeeds.
pub async fn wait_for_port(
    clock: &dyn Clock,
    host: &str,
    port: u16,
    timeout: Duration,
    connect_timeout: Duration,
) -> Result<()> {
    let started = clock.now();
    loop {
        let attempt =
            tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect((host, port)))
                .await;
        let last_error = match attempt {
            Ok(Ok(_)) => {
                tracing::info!("Port {}:{} is reachable", host, port);
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("connect timed out after {}s", connect_timeout.as_secs()),
        };

        let elapsed = seconds_between(started, clock.now());
        let remaining = timeout.as_secs_f64() - elapsed;
        if remaining <= 0.0 {
            return Err(Error::PortUnreachable {
                host: host.to_string(),
                port,
                timeout_secs: timeout.as_secs(),
                reason: last_error,
            });
        }
        tracing::debug!(
            "Port {}:{} not reachable yet ({}); {:.0}s remaining",
            host,
            port,
            last_error,
            remaining
        );
        clock
            .sleep(PORT_RETRY_INTERVAL.min(Duration::from_secs_f64(remaining)))
            .await;
    }
}
