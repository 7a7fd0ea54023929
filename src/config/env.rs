//! Environment overrides applied on top of the file configuration.

use super::SupervisorConfig;
use crate::error::{Error, Result};

/// First non-empty value among `keys`.
fn first_set<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

impl SupervisorConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// Passwords are taken verbatim, so an explicitly empty password still
    /// overrides the file value.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = first_set(&lookup, &["DB_HOST", "VERTICA_HOST"]) {
            self.host = host;
        }
        if let Some(port) = first_set(&lookup, &["DB_PORT", "VERTICA_PORT"]) {
            self.port = port.parse().map_err(|_| {
                Error::Config(format!("DB_PORT/VERTICA_PORT must be a port number, got '{}'", port))
            })?;
        }
        if let Some(mode) = first_set(&lookup, &["VERTICA_TLSMODE", "DB_TLSMODE"]) {
            self.tls_mode = Some(mode);
        }
        if let Some(database) = first_set(&lookup, &["VERTICA_DB_NAME"]) {
            self.database = database;
        }

        let creds = &mut self.credentials;
        if let Some(user) = first_set(&lookup, &["ADMIN_USER"]) {
            creds.admin_user = Some(user);
        }
        if let Some(password) = lookup("ADMIN_PASSWORD") {
            creds.admin_password = Some(password);
        }
        if let Some(user) = first_set(&lookup, &["DBADMIN_USER"]) {
            creds.bootstrap_user = Some(user);
        }
        if let Some(password) = lookup("DBADMIN_PASSWORD") {
            creds.bootstrap_password = Some(password);
        }
        Ok(())
    }
}
