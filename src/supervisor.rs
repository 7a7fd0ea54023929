//! The reconciliation loop.
//!
//! Each tick takes one fresh [`ContainerObservation`] and reacts to it with
//! at most one corrective action. Sanitization always runs before the
//! license prompt and missing-database checks.
//!
//! All repair state (directory timers, the prompt cache, the recovered set,
//! the restart throttle) lives in the [`Supervisor`] value. It is not safe
//! to drive two supervisors against the same container name at once.

use crate::bootstrap::DatabaseBootstrapper;
use crate::clock::{seconds_between, Clock};
use crate::compose::{
    ensure_compose_accepts_eula, ComposeOrchestrator, RegistryAuthenticator, RegistryCredentials,
};
use crate::config::SupervisorConfig;
use crate::connection::{
    bootstrap_credentials, ConnectAttempt, ConnectionVerifier, DatabaseClient, TlsMode,
};
use crate::docker::ContainerRuntime;
use crate::error::{Error, Result};
use crate::eula::EulaHandler;
use crate::probe::{
    ContainerObservation, ContainerStatus, HealthLogEntry, HealthLogTracker, HealthState,
    RuntimeProbe,
};
use crate::restart::Restarter;
use crate::sanitizer::{ConfigSanitizer, SanitizeReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const STUCK_RESTART_REASON: &str = "recover from stuck starting state";
const UNHEALTHY_RESTART_REASON: &str = "recover from unhealthy state";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SupervisorState {
    Starting,
    RunningUnhealthy,
    RunningHealthy,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Ready(ContainerObservation),
    Pending(ContainerObservation),
}

/// Returned by [`Supervisor::ensure_ready`] once the container is healthy.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorReport {
    pub observation: ContainerObservation,
    pub ticks: u32,
    pub elapsed_secs: f64,
    pub actions: Vec<String>,
}

/// Escalation counters for one unhealthy episode.
#[derive(Debug, Default)]
struct Recovery {
    restarts: u32,
    recreates: u32,
    total_restarts: u32,
    total_recreates: u32,
    data_reset_attempted: bool,
    readable_checked: bool,
    database_creation_attempted: bool,
}

impl Recovery {
    /// The container came back from a restart or recreate.
    fn container_replaced(&mut self) {
        self.readable_checked = false;
        self.database_creation_attempted = false;
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    runtime: Arc<dyn ContainerRuntime>,
    clock: Arc<dyn Clock>,
    probe: RuntimeProbe,
    sanitizer: ConfigSanitizer,
    eula: EulaHandler,
    compose: ComposeOrchestrator,
    bootstrapper: DatabaseBootstrapper,
    restarter: Restarter,
    health_log: HealthLogTracker,
    state: SupervisorState,
    database: Option<Arc<dyn DatabaseClient>>,
    stuck_restarts: u32,
    starting_since: Option<DateTime<Utc>>,
    compose_missing_since: Option<DateTime<Utc>>,
    last_direct_connect: Option<DateTime<Utc>>,
    recovery: Recovery,
    actions: Vec<String>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        runtime: Arc<dyn ContainerRuntime>,
        clock: Arc<dyn Clock>,
        credentials: Arc<dyn RegistryCredentials>,
    ) -> Self {
        let registry = Arc::new(RegistryAuthenticator::new(runtime.clone(), credentials));
        let probe = RuntimeProbe::new(runtime.clone(), clock.clone());
        let t = &config.timings;
        Supervisor {
            sanitizer: ConfigSanitizer::new(&config, runtime.clone(), clock.clone(), registry.clone()),
            eula: EulaHandler::new(runtime.clone(), clock.clone(), t.log_scan_ttl),
            compose: ComposeOrchestrator::new(runtime.clone(), registry, config.container.clone()),
            bootstrapper: DatabaseBootstrapper::new(
                runtime.clone(),
                probe.clone(),
                config.admin_os_user.clone(),
                config.credentials.bootstrap_password.clone(),
            ),
            restarter: Restarter::new(runtime.clone(), clock.clone(), t.restart_throttle),
            health_log: HealthLogTracker::default(),
            state: SupervisorState::Starting,
            database: None,
            stuck_restarts: 0,
            starting_since: None,
            compose_missing_since: None,
            last_direct_connect: None,
            recovery: Recovery::default(),
            actions: Vec::new(),
            probe,
            runtime,
            clock,
            config,
        }
    }

    /// Client used to connect directly when the health check and the
    /// database disagree.
    pub fn with_database_client(mut self, client: Arc<dyn DatabaseClient>) -> Self {
        self.database = Some(client);
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn probe(&self) -> &RuntimeProbe {
        &self.probe
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        self.runtime.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn set_state(&mut self, state: SupervisorState) {
        if self.state != state {
            tracing::debug!("Supervisor state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn record(&mut self, action: impl Into<String>) {
        self.actions.push(action.into());
    }

    fn reset_recovery(&mut self) {
        self.recovery = Recovery {
            data_reset_attempted: self.recovery.data_reset_attempted,
            ..Recovery::default()
        };
        self.stuck_restarts = 0;
        self.starting_since = None;
    }

    /// The compose file, waiting up to `compose_timeout` for one to appear.
    fn compose_file(&mut self) -> Result<PathBuf> {
        if let Some(file) = self.config.compose_file() {
            if self.compose_missing_since.take().is_some() {
                tracing::info!("Compose file {} is now available", file.display());
            }
            return Ok(file);
        }

        let candidates: Vec<String> = self
            .config
            .compose_files
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let now = self.clock.now();
        let since = *self.compose_missing_since.get_or_insert(now);
        let limit = self.config.timings.compose_timeout;
        if seconds_between(since, now) >= limit.as_secs_f64() {
            return Err(Error::Compose(format!(
                "No compose file found within {}s (looked for {})",
                limit.as_secs(),
                candidates.join(", ")
            )));
        }
        Err(Error::ComposeFailed(format!(
            "Compose file not yet available (looked for {})",
            candidates.join(", ")
        )))
    }

    /// Drive the container to healthy, or fail fatally.
    pub async fn ensure_ready(&mut self) -> Result<SupervisorReport> {
        let timeout = self.config.timings.overall_timeout;
        let started = self.clock.now();
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| started.checked_add_signed(d))
            .ok_or_else(|| Error::Config(format!("overall_timeout {:?} is out of range", timeout)))?;
        self.set_state(SupervisorState::Starting);

        tracing::info!(
            "Waiting up to {}s for {} to become healthy",
            timeout.as_secs(),
            self.config.container
        );

        let mut ticks = 0u32;
        loop {
            ticks += 1;
            match self.tick().await {
                Ok(TickOutcome::Ready(observation)) => {
                    let elapsed_secs = seconds_between(started, self.clock.now());
                    tracing::info!(
                        "{} is ready after {:.0}s ({} ticks)",
                        self.config.container,
                        elapsed_secs,
                        ticks
                    );
                    return Ok(SupervisorReport {
                        observation,
                        ticks,
                        elapsed_secs,
                        actions: self.actions.clone(),
                    });
                }
                Ok(TickOutcome::Pending(_)) => {}
                Err(e) if e.is_fatal() => {
                    self.set_state(SupervisorState::Failed(e.to_string()));
                    return Err(e);
                }
                Err(e) => tracing::warn!("Transient failure while reconciling: {}", e),
            }

            let now = self.clock.now();
            if now >= deadline {
                let err = Error::Timeout(timeout);
                self.set_state(SupervisorState::Failed(err.to_string()));
                return Err(err);
            }
            let remaining = Duration::from_secs_f64(seconds_between(now, deadline));
            self.clock
                .sleep(self.config.timings.poll_interval.min(remaining))
                .await;
        }
    }

    /// One reconciliation step.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let container = self.config.container.clone();
        let observation = self.probe.status(&container).await;
        tracing::debug!(
            "{}: status={} health={} uptime={:?} restarts={:?}",
            container,
            observation.status,
            observation.health,
            observation.uptime_seconds,
            observation.restart_count
        );

        match observation.status {
            ContainerStatus::Absent => {
                self.set_state(SupervisorState::Starting);
                tracing::info!("Container {} does not exist; bringing it up", container);
                self.compose_up(false).await?;
                self.reset_recovery();
            }
            ContainerStatus::Created | ContainerStatus::Exited | ContainerStatus::Paused => {
                self.set_state(SupervisorState::Starting);
                tracing::info!("Container {} is {}; starting it", container, observation.status);
                match self.runtime.start(&container).await {
                    Ok(()) => {
                        self.reset_recovery();
                        self.record(format!("started {}", container));
                    }
                    Err(e) => tracing::warn!("Failed to start {}: {}", container, e),
                }
            }
            ContainerStatus::Dead => {
                self.set_state(SupervisorState::Starting);
                tracing::info!("Container {} is dead; recreating it", container);
                self.compose_up(true).await?;
                self.reset_recovery();
            }
            ContainerStatus::Running | ContainerStatus::Restarting => {
                return self.handle_live(observation).await;
            }
        }
        Ok(TickOutcome::Pending(observation))
    }

    async fn handle_live(&mut self, observation: ContainerObservation) -> Result<TickOutcome> {
        let container = self.config.container.clone();
        let health_log = if observation.health == HealthState::None {
            Vec::new()
        } else {
            self.probe.health_log(&container).await
        };
        for entry in self.health_log.new_entries(&health_log) {
            tracing::info!(
                "Health check for {} exited {}: {}",
                container,
                entry.exit_code,
                entry.output.trim()
            );
        }

        if observation.health != HealthState::Starting {
            self.starting_since = None;
        }
        if observation.health != HealthState::Unhealthy {
            self.recovery.readable_checked = false;
        }

        match observation.health {
            HealthState::Healthy => {
                self.set_state(SupervisorState::RunningHealthy);
                Ok(TickOutcome::Ready(observation))
            }
            HealthState::None if observation.status == ContainerStatus::Running => {
                tracing::info!("{} defines no health check; treating running as ready", container);
                self.set_state(SupervisorState::RunningHealthy);
                Ok(TickOutcome::Ready(observation))
            }
            HealthState::None => Ok(TickOutcome::Pending(observation)),
            HealthState::Starting => {
                self.set_state(SupervisorState::Starting);
                if self.handle_starting(&observation).await? {
                    self.set_state(SupervisorState::RunningHealthy);
                    return Ok(TickOutcome::Ready(observation));
                }
                Ok(TickOutcome::Pending(observation))
            }
            HealthState::Unhealthy => {
                self.set_state(SupervisorState::RunningUnhealthy);
                if self.handle_unhealthy(&observation, &health_log).await? {
                    self.set_state(SupervisorState::RunningHealthy);
                    return Ok(TickOutcome::Ready(observation));
                }
                Ok(TickOutcome::Pending(observation))
            }
        }
    }

    /// Stuck time counts from the first `starting` observation, backdated by
    /// the uptime seen then. Restarts issued here leave it in place.
    async fn handle_starting(&mut self, observation: &ContainerObservation) -> Result<bool> {
        let now = self.clock.now();
        let since = *self.starting_since.get_or_insert_with(|| {
            let uptime_ms = observation.uptime_seconds.unwrap_or(0.0) * 1000.0;
            now - chrono::Duration::milliseconds(uptime_ms as i64)
        });
        let elapsed = seconds_between(since, now);
        let t = &self.config.timings;
        if elapsed < t.stuck_threshold.as_secs_f64() {
            return Ok(false);
        }
        let (max_restarts, fatal_after) = (t.max_stuck_restarts, t.stuck_fatal_threshold);

        if self.responds_directly().await {
            return Ok(true);
        }

        let container = self.config.container.clone();
        if self.stuck_restarts < max_restarts {
            tracing::info!(
                "{} has been starting for {:.0}s; restarting it",
                container,
                elapsed
            );
            if self.restarter.restart(&container, STUCK_RESTART_REASON).await {
                self.stuck_restarts += 1;
                self.record(format!("restarted to {}", STUCK_RESTART_REASON));
            }
            return Ok(false);
        }

        if elapsed >= fatal_after.as_secs_f64() {
            return Err(Error::StuckStarting {
                container,
                elapsed_secs: elapsed,
            });
        }
        tracing::debug!(
            "{} still starting after {} restart(s); {:.0}s elapsed",
            container,
            self.stuck_restarts,
            elapsed
        );
        Ok(false)
    }

    /// Returns `true` when the database answers despite the health check.
    async fn handle_unhealthy(
        &mut self,
        observation: &ContainerObservation,
        health_log: &[HealthLogEntry],
    ) -> Result<bool> {
        let container = self.config.container.clone();
        let grace = self.config.timings.unhealthy_grace.as_secs_f64();
        let uptime = observation.uptime_seconds.unwrap_or(0.0);
        if uptime < grace {
            tracing::info!(
                "{} unhealthy after {:.0}s; within {:.0}s grace period",
                container,
                uptime,
                grace
            );
            return Ok(false);
        }

        let report = self
            .sanitizer
            .run(&mut self.restarter, observation.restart_count)
            .await;
        self.record_sanitize(&report);
        if report.corrective {
            return Ok(false);
        }

        if !self.recovery.readable_checked {
            self.recovery.readable_checked = true;
            if self.sanitizer.ensure_container_config_readable().await {
                self.record("relaxed permissions on the container admintools.conf");
                return Ok(false);
            }
        }

        if self.eula.detect_prompt(&container).await {
            if self.eula.first_observation(&container) {
                tracing::info!("{} is blocked on the EULA prompt; accepting it", container);
                self.accept_eula().await?;
                if self.config.compose_file().is_some() {
                    self.compose_up(true).await?;
                    self.recovery.container_replaced();
                } else {
                    tracing::warn!(
                        "No compose file available; {} keeps running without a recreate",
                        container
                    );
                }
            } else {
                tracing::debug!("EULA prompt still reported for {}; already handled", container);
            }
            return Ok(false);
        }

        if !self.recovery.database_creation_attempted {
            let database = self.config.database.clone();
            if let Some(signal) = self
                .bootstrapper
                .missing_database_signal(&container, &database, health_log)
                .await
            {
                tracing::info!(
                    "Database {} is not defined ({:?}: {}); creating it",
                    database,
                    signal.source,
                    signal.evidence
                );
                self.recovery.database_creation_attempted = true;
                if self.bootstrapper.attempt_creation(&container, &database).await {
                    self.record(format!("created database {}", database));
                }
                return Ok(false);
            }
        }

        if self.responds_directly().await {
            return Ok(true);
        }
        self.escalate(&container).await?;
        Ok(false)
    }

    /// Restart, then recreate, then reset the data directories once. Fatal
    /// when all of them are spent.
    async fn escalate(&mut self, container: &str) -> Result<()> {
        let t = &self.config.timings;
        let (max_restarts, max_recreates) = (t.max_unhealthy_restarts, t.max_recreates);

        if self.recovery.restarts < max_restarts {
            tracing::info!(
                "{} still unhealthy past its grace period; restarting it ({}/{})",
                container,
                self.recovery.restarts + 1,
                max_restarts
            );
            if self.restarter.restart(container, UNHEALTHY_RESTART_REASON).await {
                self.recovery.restarts += 1;
                self.recovery.total_restarts += 1;
                self.recovery.container_replaced();
                self.record(format!("restarted to {}", UNHEALTHY_RESTART_REASON));
            }
            return Ok(());
        }

        let has_compose_file = self.config.compose_file().is_some();
        if has_compose_file && self.recovery.recreates < max_recreates {
            tracing::info!(
                "{} still unhealthy after {} restart(s); recreating it ({}/{})",
                container,
                self.recovery.restarts,
                self.recovery.recreates + 1,
                max_recreates
            );
            self.compose_up(true).await?;
            self.recovery.recreates += 1;
            self.recovery.total_recreates += 1;
            self.recovery.restarts = 0;
            self.recovery.container_replaced();
            return Ok(());
        }

        if !self.recovery.data_reset_attempted {
            self.recovery.data_reset_attempted = true;
            if self.sanitizer.reset_data_directories() {
                tracing::warn!("{} is still unhealthy; reset its data directories", container);
                self.record("reset data directories");
                self.recovery.restarts = 0;
                self.recovery.recreates = 0;
                self.recovery.container_replaced();
                if has_compose_file {
                    self.compose_up(true).await?;
                    self.recovery.total_recreates += 1;
                }
                return Ok(());
            }
            tracing::warn!("No data directory to reset for {}", container);
        }

        Err(Error::RemainedUnhealthy {
            container: container.to_string(),
            restarts: self.recovery.total_restarts,
            recreates: self.recovery.total_recreates,
        })
    }

    /// One connection attempt with the bootstrap credentials, at most once
    /// per `direct_connect_interval`.
    async fn responds_directly(&mut self) -> bool {
        let Some(client) = self.database.clone() else {
            return false;
        };
        let now = self.clock.now();
        let interval = self.config.timings.direct_connect_interval.as_secs_f64();
        if let Some(last) = self.last_direct_connect {
            if seconds_between(last, now) < interval {
                return false;
            }
        }
        self.last_direct_connect = Some(now);

        let container = self.config.container.clone();
        let env = self.probe.container_env(&container).await;
        let (user, password) = bootstrap_credentials(&env, &self.config.credentials);
        let verifier = ConnectionVerifier::new(
            client,
            self.clock.clone(),
            self.config.port,
            self.config.database.clone(),
            TlsMode::resolve(self.config.tls_mode.as_deref()),
            self.config.timings.connect_timeout,
        );
        let attempt = ConnectAttempt {
            attempts: 1,
            delay: Duration::ZERO,
            fatal: false,
            deadline: None,
        };
        match verifier
            .connect("direct", &self.config.host, &user, &password, attempt)
            .await
        {
            Ok(true) => {
                tracing::info!(
                    "{} accepts connections although its health check disagrees; proceeding",
                    container
                );
                self.record("accepted a direct connection despite the health check");
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::debug!("Direct connection to {} failed: {}", container, e);
                false
            }
        }
    }

    fn record_sanitize(&mut self, report: &SanitizeReport) {
        for action in &report.actions {
            self.record(action.to_string());
        }
    }

    /// `compose up` for the configured container. A forced recreate always
    /// carries the license acceptance variables.
    pub async fn compose_up(&mut self, force_recreate: bool) -> Result<()> {
        let file = self.compose_file()?;
        if force_recreate {
            self.prepare_compose_eula(&file);
        }
        self.compose.up(&file, force_recreate).await?;
        self.record(if force_recreate {
            "recreated container via compose".to_string()
        } else {
            "started container via compose".to_string()
        });
        Ok(())
    }

    /// Pre-accept the license in the compose file and record acceptance in
    /// the running container. Returns whether the in-container acceptance
    /// succeeded.
    pub async fn accept_eula(&mut self) -> Result<bool> {
        let container = self.config.container.clone();
        match self.config.compose_file() {
            Some(file) => self.prepare_compose_eula(&file),
            None => tracing::debug!("No compose file to pre-accept the EULA in"),
        }
        let accepted = self.eula.accept(&container).await;
        if accepted {
            self.record("recorded EULA acceptance");
        }
        Ok(accepted)
    }

    fn prepare_compose_eula(&mut self, file: &Path) {
        match ensure_compose_accepts_eula(file, &self.config.container) {
            Ok(true) => self.record(format!("added EULA variables to {}", file.display())),
            Ok(false) => {}
            Err(e) => tracing::warn!("Unable to update {}: {}", file.display(), e),
        }
    }

    /// One sanitization pass regardless of health or grace.
    pub async fn sanitize(&mut self) -> SanitizeReport {
        let restart_count = self.probe.restart_count(&self.config.container).await;
        let report = self.sanitizer.run(&mut self.restarter, restart_count).await;
        self.record_sanitize(&report);
        report
    }

    pub async fn create_database(&mut self) -> bool {
        let container = self.config.container.clone();
        let database = self.config.database.clone();
        self.bootstrapper.attempt_creation(&container, &database).await
    }

    pub fn reset_data_directories(&mut self) -> bool {
        self.sanitizer.reset_data_directories()
    }
}
