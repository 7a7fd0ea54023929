//! Named recovery primitives, each one action against the container.

use crate::output::Console;
use vertica_supervisor::Supervisor;

pub async fn run_sanitize(supervisor: &mut Supervisor, out: &Console) -> anyhow::Result<()> {
    let report = supervisor.sanitize().await;
    if report.actions.is_empty() {
        out.line("No configuration repairs needed");
    }
    out.actions(&report.actions);
    Ok(())
}

pub async fn run_accept_eula(supervisor: &mut Supervisor, out: &Console) -> anyhow::Result<()> {
    if supervisor.accept_eula().await? {
        out.done("Recorded EULA acceptance");
    } else {
        out.warn("Could not record EULA acceptance inside the container");
    }
    Ok(())
}

pub async fn run_create_db(supervisor: &mut Supervisor, out: &Console) -> anyhow::Result<()> {
    let database = supervisor.config().database.clone();
    if supervisor.create_database().await {
        out.done(&format!("Database {} created", database));
        Ok(())
    } else {
        anyhow::bail!("admintools failed to create database {}", database)
    }
}

pub async fn run_compose_up(
    supervisor: &mut Supervisor,
    force_recreate: bool,
    out: &Console,
) -> anyhow::Result<()> {
    supervisor.compose_up(force_recreate).await?;
    out.done(&format!("{} is up", supervisor.config().container));
    Ok(())
}

pub fn run_reset_data(supervisor: &mut Supervisor, yes: bool, out: &Console) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("reset-data removes database files; pass --yes to confirm");
    }
    if supervisor.reset_data_directories() {
        out.done("Removed data directories; the next start bootstraps from scratch");
    } else {
        out.line("Nothing to remove");
    }
    Ok(())
}
