//! Centralized Docker CLI client.
//!
//! All Docker CLI interactions go through `DockerClient`, which provides
//! consistent timeout handling, error mapping to [`DockerError`], and a single
//! point where `Command::new("docker")` is constructed.

use super::{inspect_value, CommandOutput, ContainerRuntime, DockerError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

/// Docker Compose command type (v1 or v2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComposeCommand {
    V2, // docker compose
    V1, // docker-compose
}

impl ComposeCommand {
    /// Get command and args for running compose
    fn command_and_args(&self) -> (&'static str, Vec<&'static str>) {
        match self {
            ComposeCommand::V2 => ("docker", vec!["compose"]),
            ComposeCommand::V1 => ("docker-compose", vec![]),
        }
    }
}

/// Centralized client for Docker CLI operations.
///
/// Wraps all `docker` subprocess invocations with consistent timeout handling
/// and structured [`DockerError`] returns.
#[derive(Debug)]
pub struct DockerClient {
    command_timeout: Duration,
    compose_timeout: Duration,
    compose_command: OnceCell<ComposeCommand>,
}

impl DockerClient {
    pub fn new(command_timeout: Duration, compose_timeout: Duration) -> Self {
        DockerClient {
            command_timeout,
            compose_timeout,
            compose_command: OnceCell::new(),
        }
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Run a program with a timeout, returning captured output.
    ///
    /// `env` is set on the child process only; the logged and reported
    /// command line is built from `args` alone.
    async fn run_program(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<CommandOutput, DockerError> {
        let cmd_str = format!("{} {}", program, args.join(" "));
        tracing::debug!("$ {}", cmd_str);

        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(program)
                .args(args)
                .envs(env.iter().copied())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => Ok(CommandOutput::from(output)),
            Ok(Err(e)) => Err(DockerError::spawn(cmd_str, e)),
            Err(_) => Err(DockerError::timed_out(cmd_str, timeout)),
        }
    }

    /// Run a docker command with the default timeout, returning raw output.
    async fn run(&self, args: &[&str]) -> Result<CommandOutput, DockerError> {
        self.run_program("docker", args, &[], self.command_timeout).await
    }

    /// Run a docker command, returning output only if exit 0.
    async fn run_success(&self, args: &[&str]) -> Result<CommandOutput, DockerError> {
        let output = self.run(args).await?;
        if output.success() {
            Ok(output)
        } else {
            let cmd_str = format!("docker {}", args.join(" "));
            Err(DockerError::from_output(cmd_str, &output))
        }
    }

    /// Detect which docker compose command is available (cached).
    async fn compose_command(&self) -> Result<ComposeCommand, DockerError> {
        self.compose_command
            .get_or_try_init(|| async {
                let probe = Duration::from_secs(10);
                if let Ok(output) = self.run_program("docker", &["compose", "version"], &[], probe).await
                {
                    if output.success() {
                        return Ok(ComposeCommand::V2);
                    }
                }
                if let Ok(output) = self.run_program("docker-compose", &["--version"], &[], probe).await
                {
                    if output.success() {
                        return Ok(ComposeCommand::V1);
                    }
                }
                Err(DockerError::refused(
                    "docker compose version",
                    "Neither 'docker compose' (v2) nor 'docker-compose' (v1) is available",
                    None,
                ))
            })
            .await
            .copied()
    }
}

/// `docker exec` arguments. Each variable is passed by name only so the CLI
/// forwards the value from its own environment.
fn exec_args<'a>(
    container: &'a str,
    user: Option<&'a str>,
    env: &[(&'a str, &'a str)],
    command: &[&'a str],
) -> Vec<&'a str> {
    let mut args = vec!["exec"];
    if let Some(user) = user {
        args.push("--user");
        args.push(user);
    }
    for &(name, _) in env {
        args.push("--env");
        args.push(name);
    }
    args.push(container);
    args.extend_from_slice(command);
    args
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(120), Duration::from_secs(300))
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    // ========================================================================
    // Inspection
    // ========================================================================

    async fn inspect(&self, container: &str, template: &str) -> Result<Option<String>, DockerError> {
        let output = self.run(&["inspect", "--format", template, container]).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(inspect_value(&output.stdout))
    }

    async fn logs(&self, container: &str, tail: usize) -> Result<String, DockerError> {
        let tail_str = tail.to_string();
        let output = self.run(&["logs", "--tail", &tail_str, container]).await?;
        if !output.success() {
            if output.stderr.contains("No such container") {
                return Err(DockerError::NoSuchContainer(container.to_string()));
            }
            return Err(DockerError::from_output("docker logs", &output));
        }
        Ok(output.combined())
    }

    // ========================================================================
    // Exec / Copy
    // ========================================================================

    async fn exec_with_env(
        &self,
        container: &str,
        user: Option<&str>,
        env: &[(&str, &str)],
        command: &[&str],
    ) -> Result<CommandOutput, DockerError> {
        let args = exec_args(container, user, env, command);
        self.run_program("docker", &args, env, self.command_timeout)
            .await
    }

    async fn copy_into(
        &self,
        container: &str,
        source: &Path,
        destination: &str,
    ) -> Result<(), DockerError> {
        let source = source.to_string_lossy();
        let target = format!("{}:{}", container, destination);
        self.run_success(&["cp", &source, &target]).await?;
        Ok(())
    }

    // ========================================================================
    // Container lifecycle
    // ========================================================================

    async fn start(&self, container: &str) -> Result<(), DockerError> {
        self.run_success(&["start", container]).await?;
        Ok(())
    }

    async fn restart(&self, container: &str) -> Result<(), DockerError> {
        self.run_success(&["restart", container]).await?;
        Ok(())
    }

    async fn remove_force(&self, container: &str) -> Result<(), DockerError> {
        let output = self.run(&["rm", "-f", container]).await?;
        if output.success() || output.stderr.contains("No such container") {
            return Ok(());
        }
        Err(DockerError::from_output("docker rm -f", &output))
    }

    async fn compose_up(
        &self,
        compose_file: &Path,
        force_recreate: bool,
    ) -> Result<(), DockerError> {
        let compose = self.compose_command().await?;
        let (program, base_args) = compose.command_and_args();
        let file = compose_file.to_string_lossy();

        let mut args = base_args;
        args.extend_from_slice(&["-f", &file, "up", "-d"]);
        if force_recreate {
            args.push("--force-recreate");
        }

        let output = self
            .run_program(program, &args, &[], self.compose_timeout)
            .await?;
        if output.success() {
            return Ok(());
        }
        let cmd_str = format!("{} {}", program, args.join(" "));
        Err(DockerError::from_output(cmd_str, &output))
    }

    async fn run_ephemeral(
        &self,
        image: &str,
        entrypoint: &str,
        args: &[&str],
    ) -> Result<CommandOutput, DockerError> {
        let mut full_args = vec!["run", "--rm", "--entrypoint", entrypoint, image];
        full_args.extend_from_slice(args);
        self.run_program("docker", &full_args, &[], self.compose_timeout)
            .await
    }

    async fn login(
        &self,
        registry: &str,
        username: &str,
        password: &str,
    ) -> Result<(), DockerError> {
        let cmd_str = format!(
            "docker login --username {} --password-stdin {}",
            username, registry
        );
        tracing::debug!("$ {}", cmd_str);

        let mut child = tokio::process::Command::new("docker")
            .args(["login", "--username", username, "--password-stdin", registry])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DockerError::spawn(&cmd_str, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(password.as_bytes())
                .await
                .map_err(|e| DockerError::spawn(&cmd_str, e))?;
        }

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| DockerError::timed_out(&cmd_str, self.command_timeout))?
            .map_err(|e| DockerError::spawn(&cmd_str, e))?;

        let output = CommandOutput::from(output);
        if output.success() {
            Ok(())
        } else {
            Err(DockerError::from_output(cmd_str, &output))
        }
    }
}
