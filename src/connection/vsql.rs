//! [`DatabaseClient`] over the vendor `vsql` tool inside the container.
//!
//! There is no persistent connection: every statement is one `vsql`
//! invocation carrying the session's parameters. Parameters and the
//! statement itself are handed over as environment variables, so neither
//! the password nor SQL naming one reaches a command line.

use super::{ConnectParams, DatabaseClient, DbSession};
use crate::docker::ContainerRuntime;
use crate::error::DbError;
use async_trait::async_trait;
use std::sync::Arc;

/// `vsql` reads `VSQL_PASSWORD` itself; the rest is expanded by the shell.
const VSQL_SCRIPT: &str = r#"exec /opt/vertica/bin/vsql -h "$VSQL_HOST" -p "$VSQL_PORT" -U "$VSQL_USER" -d "$VSQL_DATABASE" -m "$VSUP_TLSMODE" -At -c "$VSUP_STATEMENT""#;

/// Output fragments that mean the server could not be reached or refused
/// the login, as opposed to a failed statement.
const CONNECTION_MARKERS: [&str; 7] = [
    "could not connect",
    "connection refused",
    "timeout expired",
    "no route to host",
    "could not translate host name",
    "authentication failed",
    "server closed the connection",
];

pub fn is_connection_failure(output: &str) -> bool {
    let lowered = output.to_lowercase();
    CONNECTION_MARKERS.iter().any(|m| lowered.contains(m))
}

pub struct VsqlClient {
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
}

impl VsqlClient {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, container: impl Into<String>) -> Self {
        VsqlClient {
            runtime,
            container: container.into(),
        }
    }
}

#[async_trait]
impl DatabaseClient for VsqlClient {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DbSession>, DbError> {
        let mut session = VsqlSession {
            runtime: self.runtime.clone(),
            container: self.container.clone(),
            params: params.clone(),
        };
        session.run("SELECT 1").await?;
        Ok(Box::new(session))
    }
}

pub struct VsqlSession {
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
    params: ConnectParams,
}

impl VsqlSession {
    async fn run(&mut self, sql: &str) -> Result<String, DbError> {
        let p = &self.params;
        let port = p.port.to_string();
        let env = [
            ("VSQL_HOST", p.host.as_str()),
            ("VSQL_PORT", port.as_str()),
            ("VSQL_USER", p.user.as_str()),
            ("VSQL_PASSWORD", p.password.as_str()),
            ("VSQL_DATABASE", p.database.as_str()),
            ("VSUP_TLSMODE", p.tls_mode.as_str()),
            ("VSUP_STATEMENT", sql),
        ];
        let out = self
            .runtime
            .exec_with_env(&self.container, None, &env, &["sh", "-c", VSQL_SCRIPT])
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        if out.success() {
            return Ok(out.stdout);
        }
        let message = out.combined();
        if is_connection_failure(&message) {
            Err(DbError::Connection(message))
        } else {
            Err(DbError::Query(message))
        }
    }
}

#[async_trait]
impl DbSession for VsqlSession {
    async fn query_one(&mut self, sql: &str) -> Result<Option<Vec<String>>, DbError> {
        let stdout = self.run(sql).await?;
        Ok(stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.split('|').map(str::to_string).collect()))
    }

    async fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        self.run(sql).await.map(|_| ())
    }
}
