//! Provisioning the primary admin account on top of the bootstrap one.

use super::{quote_identifier, quote_literal, ConnectParams, DatabaseClient};
use crate::error::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminUserOutcome {
    /// Target and bootstrap are the same account.
    SameAsBootstrap,
    Created,
    PasswordRotated,
}

pub struct AdminUserProvisioner {
    client: Arc<dyn DatabaseClient>,
    template: ConnectParams,
}

impl AdminUserProvisioner {
    /// `template` supplies host, port, database and transport settings; its
    /// credentials are replaced by the bootstrap pair.
    pub fn new(client: Arc<dyn DatabaseClient>, template: ConnectParams) -> Self {
        AdminUserProvisioner { client, template }
    }

    /// Create `target_user` with full database and schema privileges, or
    /// rotate its password when it already exists.
    pub async fn ensure_primary_admin_user(
        &self,
        bootstrap_user: &str,
        bootstrap_password: &str,
        target_user: &str,
        target_password: &str,
    ) -> Result<AdminUserOutcome> {
        if target_user == bootstrap_user {
            return Ok(AdminUserOutcome::SameAsBootstrap);
        }

        tracing::info!(
            "Ensuring primary admin user '{}' exists with the expected credentials",
            target_user
        );
        let params = ConnectParams {
            user: bootstrap_user.to_string(),
            password: bootstrap_password.to_string(),
            ..self.template.clone()
        };
        let mut session = self.client.connect(&params).await?;

        let user = quote_identifier(target_user);
        let password = quote_literal(target_password);
        let exists = session
            .query_one(&format!(
                "SELECT 1 FROM users WHERE user_name = {}",
                quote_literal(target_user)
            ))
            .await?
            .is_some();

        if exists {
            tracing::info!("Primary admin user '{}' already exists; rotating password", target_user);
            session
                .execute(&format!("ALTER USER {} IDENTIFIED BY {}", user, password))
                .await?;
            return Ok(AdminUserOutcome::PasswordRotated);
        }

        tracing::info!("Creating primary admin user '{}'", target_user);
        session
            .execute(&format!("CREATE USER {} IDENTIFIED BY {}", user, password))
            .await?;
        let database = quote_identifier(&self.template.database);
        for grant in [
            format!("GRANT CONNECT ON DATABASE {} TO {}", database, user),
            format!("GRANT ALL PRIVILEGES ON DATABASE {} TO {}", database, user),
            format!("GRANT USAGE ON SCHEMA PUBLIC TO {}", user),
            format!("GRANT ALL PRIVILEGES ON SCHEMA PUBLIC TO {}", user),
        ] {
            session.execute(&grant).await?;
        }
        Ok(AdminUserOutcome::Created)
    }
}
