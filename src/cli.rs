use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vsup")]
#[command(about = "Vertica supervisor - bring a local Vertica container to ready and repair known failure modes")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to vsup.yaml in this or a parent directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Compose file to use instead of the configured candidates
    #[arg(long, global = true)]
    pub compose_file: Option<PathBuf>,

    /// Container name (overrides the config file)
    #[arg(long, global = true)]
    pub container: Option<String>,

    /// Suppress user-facing output; only the exit code reports the result
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Wait for the container to be healthy, then verify connections (default)
    Ensure {
        /// Also try a non-fatal connection to this externally advertised host
        #[arg(long)]
        public_host: Option<String>,
    },
    /// Show the container's current status and health
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one configuration sanitization pass
    Sanitize,
    /// Record EULA acceptance in the container and the compose file
    AcceptEula,
    /// Create the configured database inside the container
    CreateDb,
    /// Bring the container up with compose
    ComposeUp {
        /// Recreate the container even if its configuration is unchanged
        #[arg(long)]
        force_recreate: bool,
    },
    /// Verify a database connection with the bootstrap credentials
    Connect {
        /// Host to connect to (defaults to the configured host)
        #[arg(long)]
        host: Option<String>,
    },
    /// Remove host data directories so the next start bootstraps from scratch
    ResetData {
        /// Confirm removal
        #[arg(long)]
        yes: bool,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Ensure { public_host: None }
    }
}
