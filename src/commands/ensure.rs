use super::verifier;
use crate::output::Console;
use vertica_supervisor::connection::{
    bootstrap_credentials, wait_for_port, AdminUserOutcome, AdminUserProvisioner, ConnectAttempt,
};
use vertica_supervisor::Supervisor;

const PUBLIC_HOST_ATTEMPTS: u32 = 3;

/// Ready container, reachable port, working bootstrap login, provisioned
/// primary admin, then an optional best-effort check of the public host.
pub async fn run_ensure(
    supervisor: &mut Supervisor,
    public_host: Option<String>,
    out: &Console,
) -> anyhow::Result<()> {
    let report = supervisor.ensure_ready().await?;
    let config = supervisor.config().clone();
    let timings = &config.timings;
    let clock = supervisor.clock();

    wait_for_port(
        clock.as_ref(),
        &config.host,
        config.port,
        timings.port_wait,
        timings.connect_timeout,
    )
    .await?;

    let env = supervisor.probe().container_env(&config.container).await;
    let (bootstrap_user, bootstrap_password) = bootstrap_credentials(&env, &config.credentials);
    tracing::info!("Using bootstrap admin user '{}'", bootstrap_user);

    let (client, verifier) = verifier(supervisor);
    let retry = ConnectAttempt {
        attempts: timings.connect_attempts,
        delay: timings.connect_delay,
        fatal: true,
        deadline: None,
    };
    verifier
        .connect("bootstrap", &config.host, &bootstrap_user, &bootstrap_password, retry)
        .await?;

    let mut login = (bootstrap_user.clone(), bootstrap_password.clone());
    if let Some(admin_user) = config.credentials.admin_user.clone() {
        let admin_password = config.credentials.admin_password.clone().unwrap_or_default();
        let provisioner = AdminUserProvisioner::new(
            client,
            verifier.params(&config.host, &bootstrap_user, &bootstrap_password),
        );
        let outcome = provisioner
            .ensure_primary_admin_user(&bootstrap_user, &bootstrap_password, &admin_user, &admin_password)
            .await?;
        if outcome != AdminUserOutcome::SameAsBootstrap {
            verifier
                .connect("primary admin", &config.host, &admin_user, &admin_password, retry)
                .await?;
        }
        login = (admin_user, admin_password);
    }

    if let Some(public_host) = public_host.or_else(|| config.public_host.clone()) {
        let best_effort = ConnectAttempt {
            attempts: PUBLIC_HOST_ATTEMPTS,
            fatal: false,
            ..retry
        };
        if !verifier
            .connect("public endpoint", &public_host, &login.0, &login.1, best_effort)
            .await?
        {
            out.warn(&format!(
                "Public endpoint {}:{} is not reachable; continuing",
                public_host, config.port
            ));
        }
    }

    out.actions(&report.actions);
    out.done(&format!(
        "{} is ready ({}:{}, database {}) after {:.0}s",
        config.container, config.host, config.port, config.database, report.elapsed_secs
    ));
    Ok(())
}
