//! # Vertica Supervisor
//!
//! Drives a single local Vertica container from "just started" to
//! "accepting connections", repairing a fixed set of known failure modes on
//! the way:
//!
//! - **Unacknowledged EULA prompt**: detected in container logs, accepted
//!   in-container and pre-accepted in the compose file
//! - **Missing or corrupted `admintools.conf`**: seeded from the image's own
//!   template (or a built-in default) after a grace period
//! - **Confusing config symlinks and duplicate-source copies**: replaced
//!   with real directories
//! - **Stale container holding the name**: force-removed once, then retried
//! - **Database never created**: created with `admintools -t create_db`
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vertica_supervisor::{
//!     AwsCliCredentials, DockerClient, Parser, Supervisor, SystemClock,
//! };
//!
//! # async fn example() -> Result<(), vertica_supervisor::Error> {
//! let config = Parser::new().resolve(None)?;
//! let runtime = Arc::new(DockerClient::new(
//!     config.timings.command_timeout,
//!     config.timings.compose_timeout,
//! ));
//! let mut supervisor = Supervisor::new(
//!     config,
//!     runtime,
//!     Arc::new(SystemClock),
//!     Arc::new(AwsCliCredentials::default()),
//! );
//! let report = supervisor.ensure_ready().await?;
//! println!("ready after {} ticks", report.ticks);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! The supervisor is a single-task polling loop. All repair state lives in
//! the [`Supervisor`] value; two supervisors must not manage the same
//! container name at once.

pub mod bootstrap;
pub mod clock;
pub mod compose;
pub mod config;
pub mod connection;
pub mod docker;
pub mod error;
pub mod eula;
pub mod log_scan;
pub mod probe;
pub mod restart;
pub mod sanitizer;
pub mod supervisor;

pub use clock::{Clock, SystemClock};
pub use compose::{AwsCliCredentials, ComposeOrchestrator, RegistryAuthenticator, RegistryCredentials};
pub use config::{Parser, SupervisorConfig};
pub use docker::{ContainerRuntime, DockerClient};
pub use error::{DbError, Error, Result};
pub use probe::{ContainerObservation, ContainerStatus, HealthState, RuntimeProbe};
pub use supervisor::{Supervisor, SupervisorReport, SupervisorState};
