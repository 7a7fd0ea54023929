//! Container runtime seam.
//!
//! Everything the supervisor does to a container goes through the
//! [`ContainerRuntime`] trait. [`DockerClient`] is the production
//! implementation over the `docker` CLI; tests provide in-memory fakes.

pub mod client;
pub mod error;

pub use client::DockerClient;
pub use error::DockerError;

use async_trait::async_trait;
use std::path::Path;

/// Captured result of a finished container command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr joined with a newline, trailing whitespace trimmed.
    pub fn combined(&self) -> String {
        let mut parts = Vec::with_capacity(2);
        if !self.stdout.trim().is_empty() {
            parts.push(self.stdout.trim_end());
        }
        if !self.stderr.trim().is_empty() {
            parts.push(self.stderr.trim_end());
        }
        parts.join("\n")
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Capability interface over the container runtime.
///
/// Calls are point-in-time and blocking from the caller's perspective; each
/// implementation enforces its own per-call timeout.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Evaluate a `--format` template against a container.
    ///
    /// Returns `Ok(None)` when the container does not exist, the template
    /// renders empty, or renders `<no value>`.
    async fn inspect(&self, container: &str, template: &str) -> Result<Option<String>, DockerError>;

    /// Last `tail` lines of combined stdout/stderr container logs.
    async fn logs(&self, container: &str, tail: usize) -> Result<String, DockerError>;

    /// Run a command inside a running container, optionally as `user`.
    ///
    /// A non-zero exit is reported through [`CommandOutput::exit_code`], not
    /// as an error.
    async fn exec(
        &self,
        container: &str,
        user: Option<&str>,
        command: &[&str],
    ) -> Result<CommandOutput, DockerError> {
        self.exec_with_env(container, user, &[], command).await
    }

    /// [`ContainerRuntime::exec`] with extra environment variables for the
    /// command. Values must never appear in logged or reported command lines;
    /// secrets travel this way instead of as arguments.
    async fn exec_with_env(
        &self,
        container: &str,
        user: Option<&str>,
        env: &[(&str, &str)],
        command: &[&str],
    ) -> Result<CommandOutput, DockerError>;

    /// Copy a host file to `destination` inside the container.
    async fn copy_into(
        &self,
        container: &str,
        source: &Path,
        destination: &str,
    ) -> Result<(), DockerError>;

    async fn start(&self, container: &str) -> Result<(), DockerError>;

    async fn restart(&self, container: &str) -> Result<(), DockerError>;

    /// Force-remove a container. Succeeds when the container does not exist.
    async fn remove_force(&self, container: &str) -> Result<(), DockerError>;

    /// `compose -f <file> up -d`, optionally with `--force-recreate`.
    async fn compose_up(&self, compose_file: &Path, force_recreate: bool)
        -> Result<(), DockerError>;

    /// Run a throwaway container (`run --rm`) with an overridden entrypoint.
    async fn run_ephemeral(
        &self,
        image: &str,
        entrypoint: &str,
        args: &[&str],
    ) -> Result<CommandOutput, DockerError>;

    /// `login --username <user> --password-stdin <registry>`.
    async fn login(&self, registry: &str, username: &str, password: &str)
        -> Result<(), DockerError>;
}

/// Output of `inspect` after the runtime's own "nothing here" markers are
/// stripped.
pub fn inspect_value(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() || value == "<no value>" {
        return None;
    }
    Some(value.to_string())
}
