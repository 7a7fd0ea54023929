//! In-memory fakes for the runtime, clock, registry and database seams.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vertica_supervisor::compose::registry::{RegistryCredentials, RegistryTarget};
use vertica_supervisor::connection::{ConnectParams, DatabaseClient, DbSession};
use vertica_supervisor::docker::{CommandOutput, ContainerRuntime, DockerError};
use vertica_supervisor::{Clock, DbError, SupervisorConfig};

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Runtime timestamp `secs` before [`epoch`].
pub fn started_before_epoch(secs: i64) -> String {
    timestamp(epoch() - chrono::Duration::seconds(secs))
}

/// `at` in the runtime's `StartedAt` format.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string()
}

pub fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn exit_output(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Time only moves when a test advances it or the code under test sleeps.
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Self::at(epoch())
    }

    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(FakeClock {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

// ============================================================================
// Container runtime
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Inspect(String),
    Logs,
    Exec {
        user: Option<String>,
        command: Vec<String>,
        env: Vec<(String, String)>,
    },
    CopyInto { source: PathBuf, destination: String },
    Start,
    Restart,
    RemoveForce,
    ComposeUp { force_recreate: bool },
    RunEphemeral { image: String },
    Login { registry: String, username: String },
}

impl Call {
    /// Anything beyond read-only introspection.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Call::Inspect(_) | Call::Logs)
    }
}

/// Scripted container state.
#[derive(Debug, Default)]
pub struct FakeState {
    /// `None` means the container does not exist.
    pub status: Option<String>,
    pub health: Option<String>,
    pub started_at: Option<String>,
    pub restart_count: u32,
    pub health_log: Vec<(String, i64)>,
    pub env: Vec<String>,
    pub image: Option<String>,
    pub logs: String,
    /// Exec responses keyed by a substring of the space-joined command;
    /// the first match wins, anything else succeeds with empty output.
    pub exec_responses: Vec<(String, CommandOutput)>,
    pub compose_results: VecDeque<Result<(), DockerError>>,
    pub remove_error: Option<DockerError>,
    pub ephemeral_output: Option<CommandOutput>,
    pub login_error: Option<DockerError>,
    /// When set, a restart resets `started_at` to this clock's now.
    pub clock: Option<Arc<FakeClock>>,
    /// A successful `compose up` leaves a running, healthy container.
    pub compose_starts_healthy: bool,
}

pub struct FakeRuntime {
    pub state: Mutex<FakeState>,
    calls: Mutex<Vec<Call>>,
}

impl FakeRuntime {
    pub fn new(state: FakeState) -> Arc<Self> {
        Arc::new(FakeRuntime {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Running container with the given health and uptime at [`epoch`].
    pub fn running(health: &str, uptime_secs: i64) -> Arc<Self> {
        Self::new(FakeState {
            status: Some("running".to_string()),
            health: Some(health.to_string()),
            started_at: Some(started_before_epoch(uptime_secs)),
            ..Default::default()
        })
    }

    pub fn absent() -> Arc<Self> {
        Self::new(FakeState::default())
    }

    pub fn with<F: FnOnce(&mut FakeState)>(&self, f: F) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn execs_containing(&self, needle: &str) -> usize {
        self.count(|c| matches!(c, Call::Exec { command, .. } if command.join(" ").contains(needle)))
    }

    /// User and environment of the first exec whose command contains `needle`.
    pub fn exec_env(&self, needle: &str) -> Option<(Option<String>, Vec<(String, String)>)> {
        self.calls().into_iter().find_map(|c| match c {
            Call::Exec { user, command, env } if command.join(" ").contains(needle) => Some((user, env)),
            _ => None,
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect(&self, _container: &str, template: &str) -> Result<Option<String>, DockerError> {
        self.record(Call::Inspect(template.to_string()));
        let state = self.state.lock().unwrap();
        if state.status.is_none() {
            return Ok(None);
        }
        let value = if template.contains(".State.Health.Log") {
            let entries: Vec<serde_json::Value> = state
                .health_log
                .iter()
                .map(|(output, code)| serde_json::json!({"Output": output, "ExitCode": code}))
                .collect();
            Some(serde_json::to_string(&entries).unwrap())
        } else if template.contains(".State.Health.Status") {
            state.health.clone()
        } else if template.contains(".State.Status") {
            state.status.clone()
        } else if template.contains(".State.StartedAt") {
            state.started_at.clone()
        } else if template.contains(".RestartCount") {
            Some(state.restart_count.to_string())
        } else if template.contains(".Config.Env") {
            Some(serde_json::to_string(&state.env).unwrap())
        } else if template.contains(".Config.Image") {
            state.image.clone()
        } else {
            None
        };
        Ok(value)
    }

    async fn logs(&self, _container: &str, _tail: usize) -> Result<String, DockerError> {
        self.record(Call::Logs);
        Ok(self.state.lock().unwrap().logs.clone())
    }

    async fn exec_with_env(
        &self,
        _container: &str,
        user: Option<&str>,
        env: &[(&str, &str)],
        command: &[&str],
    ) -> Result<CommandOutput, DockerError> {
        self.record(Call::Exec {
            user: user.map(str::to_string),
            command: command.iter().map(|s| s.to_string()).collect(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        let joined = command.join(" ");
        let state = self.state.lock().unwrap();
        Ok(state
            .exec_responses
            .iter()
            .find(|(needle, _)| joined.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| ok_output("")))
    }

    async fn copy_into(
        &self,
        _container: &str,
        source: &Path,
        destination: &str,
    ) -> Result<(), DockerError> {
        self.record(Call::CopyInto {
            source: source.to_path_buf(),
            destination: destination.to_string(),
        });
        Ok(())
    }

    async fn start(&self, _container: &str) -> Result<(), DockerError> {
        self.record(Call::Start);
        Ok(())
    }

    async fn restart(&self, _container: &str) -> Result<(), DockerError> {
        self.record(Call::Restart);
        let mut state = self.state.lock().unwrap();
        if let Some(clock) = state.clock.clone() {
            state.started_at = Some(timestamp(clock.now()));
        }
        Ok(())
    }

    async fn remove_force(&self, _container: &str) -> Result<(), DockerError> {
        self.record(Call::RemoveForce);
        match self.state.lock().unwrap().remove_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn compose_up(&self, _compose_file: &Path, force_recreate: bool) -> Result<(), DockerError> {
        self.record(Call::ComposeUp { force_recreate });
        let mut state = self.state.lock().unwrap();
        let result = state.compose_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() && state.compose_starts_healthy {
            state.status = Some("running".to_string());
            state.health = Some("healthy".to_string());
        }
        result
    }

    async fn run_ephemeral(
        &self,
        image: &str,
        _entrypoint: &str,
        _args: &[&str],
    ) -> Result<CommandOutput, DockerError> {
        self.record(Call::RunEphemeral {
            image: image.to_string(),
        });
        Ok(self
            .state
            .lock()
            .unwrap()
            .ephemeral_output
            .clone()
            .unwrap_or_else(|| exit_output(1, "no template")))
    }

    async fn login(&self, registry: &str, username: &str, _password: &str) -> Result<(), DockerError> {
        self.record(Call::Login {
            registry: registry.to_string(),
            username: username.to_string(),
        });
        match self.state.lock().unwrap().login_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Registry credentials
// ============================================================================

pub struct FakeCredentials {
    pub result: Result<String, String>,
    pub requests: AtomicU32,
}

impl FakeCredentials {
    pub fn ok() -> Arc<Self> {
        Arc::new(FakeCredentials {
            result: Ok("token".to_string()),
            requests: AtomicU32::new(0),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(FakeCredentials {
            result: Err(reason.to_string()),
            requests: AtomicU32::new(0),
        })
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryCredentials for FakeCredentials {
    async fn password(&self, _target: &RegistryTarget) -> Result<String, String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

// ============================================================================
// Database
// ============================================================================

#[derive(Default)]
pub struct DatabaseState {
    pub users: HashSet<String>,
    pub statements: Vec<String>,
    pub connects: u32,
    /// Fail every connection with this message.
    pub connect_error: Option<String>,
}

#[derive(Clone, Default)]
pub struct FakeDatabase {
    pub state: Arc<Mutex<DatabaseState>>,
}

impl FakeDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeDatabase::default())
    }

    pub fn unreachable(message: &str) -> Arc<Self> {
        let db = FakeDatabase::default();
        db.state.lock().unwrap().connect_error = Some(message.to_string());
        Arc::new(db)
    }

    pub fn with_user(name: &str) -> Arc<Self> {
        let db = FakeDatabase::default();
        db.state.lock().unwrap().users.insert(name.to_string());
        Arc::new(db)
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }
}

/// Text between the first pair of `'` or `"` delimiters after `prefix`.
fn quoted_after(sql: &str, prefix: &str, quote: char) -> Option<String> {
    let rest = sql.strip_prefix(prefix)?.trim_start();
    let rest = rest.strip_prefix(quote)?;
    rest.find(quote).map(|end| rest[..end].to_string())
}

struct FakeSession {
    state: Arc<Mutex<DatabaseState>>,
}

#[async_trait]
impl DbSession for FakeSession {
    async fn query_one(&mut self, sql: &str) -> Result<Option<Vec<String>>, DbError> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        if sql == "SELECT 1" {
            return Ok(Some(vec!["1".to_string()]));
        }
        if let Some(user) = quoted_after(sql, "SELECT 1 FROM users WHERE user_name =", '\'') {
            return Ok(state.users.contains(&user).then(|| vec!["1".to_string()]));
        }
        Err(DbError::Query(format!("unsupported query: {}", sql)))
    }

    async fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        if let Some(user) = quoted_after(sql, "CREATE USER", '"') {
            state.users.insert(user);
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseClient for FakeDatabase {
    async fn connect(&self, _params: &ConnectParams) -> Result<Box<dyn DbSession>, DbError> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if let Some(message) = &state.connect_error {
            return Err(DbError::Connection(message.clone()));
        }
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Config rooted in a temp directory with short, test-friendly timings.
pub fn test_config(data_root: &Path, compose_file: Option<&Path>) -> SupervisorConfig {
    let mut config = SupervisorConfig::default();
    config.data_roots = vec![data_root.to_path_buf()];
    config.compose_files = compose_file.map(|p| vec![p.to_path_buf()]).unwrap_or_default();
    let t = &mut config.timings;
    t.poll_interval = Duration::from_secs(10);
    t.overall_timeout = Duration::from_secs(600);
    t.unhealthy_grace = Duration::from_secs(30);
    t.stuck_threshold = Duration::from_secs(900);
    t.stuck_fatal_threshold = Duration::from_secs(1200);
    t.missing_config_grace = Duration::from_secs(60);
    t.seed_recovery = Duration::from_secs(120);
    t.restart_throttle = Duration::from_secs(60);
    t.log_scan_ttl = Duration::from_secs(30);
    config
}

pub fn write_compose(dir: &Path, image: &str) -> PathBuf {
    let path = dir.join("compose.yml");
    std::fs::write(
        &path,
        format!(
            "services:\n  vertica_ce:\n    image: {}\n    container_name: vertica_ce\n",
            image
        ),
    )
    .unwrap();
    path
}
