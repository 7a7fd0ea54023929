use super::verifier;
use crate::output::Console;
use vertica_supervisor::connection::{bootstrap_credentials, ConnectAttempt};
use vertica_supervisor::Supervisor;

pub async fn run_connect(
    supervisor: &Supervisor,
    host: Option<String>,
    out: &Console,
) -> anyhow::Result<()> {
    let config = supervisor.config();
    let host = host.unwrap_or_else(|| config.host.clone());
    let env = supervisor.probe().container_env(&config.container).await;
    let (user, password) = bootstrap_credentials(&env, &config.credentials);

    let (_, verifier) = verifier(supervisor);
    verifier
        .connect(
            "bootstrap",
            &host,
            &user,
            &password,
            ConnectAttempt {
                attempts: config.timings.connect_attempts,
                delay: config.timings.connect_delay,
                fatal: true,
                deadline: None,
            },
        )
        .await?;
    out.done(&format!(
        "Connected to {}:{} as {} (tlsmode={})",
        host,
        config.port,
        user,
        verifier.tls_mode()
    ));
    Ok(())
}
