mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use output::Console;
use std::sync::Arc;
use vertica_supervisor::connection::VsqlClient;
use vertica_supervisor::{
    AwsCliCredentials, DockerClient, Error as VsupError, Parser as ConfigParser, Supervisor,
    SystemClock,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(vsup_error) = e.downcast_ref::<VsupError>() {
            eprintln!("Error: {}", vsup_error);
            if let Some(suggestion) = vsup_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let mut config = ConfigParser::new().resolve(cli.config.as_deref())?;
    if let Some(compose_file) = cli.compose_file.clone() {
        config.compose_files = vec![compose_file];
    }
    if let Some(container) = cli.container.clone() {
        config.container = container;
    }

    let runtime = Arc::new(DockerClient::new(
        config.timings.command_timeout,
        config.timings.compose_timeout,
    ));
    let database = Arc::new(VsqlClient::new(runtime.clone(), config.container.clone()));
    let mut supervisor = Supervisor::new(
        config,
        runtime,
        Arc::new(SystemClock),
        Arc::new(AwsCliCredentials::default()),
    )
    .with_database_client(database);

    let console = Console::new(cli.quiet);
    let out = &console;
    match cli.command.unwrap_or_default() {
        Commands::Ensure { public_host } => commands::run_ensure(&mut supervisor, public_host, out).await,
        Commands::Status { json } => commands::run_status(&supervisor, json, out).await,
        Commands::Sanitize => commands::run_sanitize(&mut supervisor, out).await,
        Commands::AcceptEula => commands::run_accept_eula(&mut supervisor, out).await,
        Commands::CreateDb => commands::run_create_db(&mut supervisor, out).await,
        Commands::ComposeUp { force_recreate } => {
            commands::run_compose_up(&mut supervisor, force_recreate, out).await
        }
        Commands::Connect { host } => commands::run_connect(&supervisor, host, out).await,
        Commands::ResetData { yes } => commands::run_reset_data(&mut supervisor, yes, out),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
