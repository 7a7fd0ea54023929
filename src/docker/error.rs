use super::CommandOutput;
use std::time::Duration;
use thiserror::Error;

/// A `docker` or `docker compose` invocation that did not succeed.
///
/// `diagnostics` keeps what the CLI printed so callers can match on daemon
/// messages such as a name conflict.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("'{command}' did not finish within {}s", .after.as_secs())]
    TimedOut { command: String, after: Duration },

    #[error("'{command}' failed ({}): {diagnostics}", exit_label(.code))]
    Refused {
        command: String,
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("could not run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no such container: {0}")]
    NoSuchContainer(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "killed by a signal".to_string(),
    }
}

impl DockerError {
    pub fn timed_out(command: impl Into<String>, after: Duration) -> Self {
        DockerError::TimedOut {
            command: command.into(),
            after,
        }
    }

    /// A non-zero exit. Some compose versions print conflicts on stdout, so
    /// stdout stands in when stderr is empty.
    pub fn from_output(command: impl Into<String>, output: &CommandOutput) -> Self {
        let stream = if output.stderr.trim().is_empty() {
            &output.stdout
        } else {
            &output.stderr
        };
        DockerError::refused(command, stream.trim(), output.exit_code)
    }

    pub fn refused(
        command: impl Into<String>,
        diagnostics: impl Into<String>,
        code: Option<i32>,
    ) -> Self {
        DockerError::Refused {
            command: command.into(),
            code,
            diagnostics: diagnostics.into(),
        }
    }

    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        DockerError::Spawn {
            command: command.into(),
            source,
        }
    }

    /// What the CLI printed for a refused command; empty otherwise.
    pub fn diagnostics(&self) -> &str {
        match self {
            DockerError::Refused { diagnostics, .. } => diagnostics,
            _ => "",
        }
    }
}
