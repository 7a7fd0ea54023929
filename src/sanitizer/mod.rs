//! Repair of the host-side configuration directories backing the container.
//!
//! Each candidate `config` directory carries its own grace and recovery
//! timers in a [`ConfigDirectory`]. The sanitizer is driven once per
//! reconciliation tick and takes at most one corrective action (a restart
//! or a directory rebuild) per call; the outcome is observed on the next
//! tick before anything else is attempted.
//!
//! State is owned by the [`ConfigSanitizer`] value. Two sanitizers must not
//! act on the same container concurrently.

pub mod admin_config;
pub mod identity;
pub mod paths;
pub mod seed;

pub use identity::{Alignment, Identity, IdentityReconciler};
pub use seed::{AdminConfigSeeder, SeedOutcome};

use crate::clock::{seconds_between, Clock};
use crate::compose::registry::RegistryAuthenticator;
use crate::config::SupervisorConfig;
use crate::docker::ContainerRuntime;
use crate::log_scan::{scan_logs, TtlCache};
use crate::probe::RuntimeProbe;
use crate::restart::Restarter;
use admin_config::{is_valid_admin_config, ADMIN_CONFIG_FILE};
use chrono::{DateTime, Utc};
use paths::{
    candidate_roots, ensure_directory, has_content, is_confusing_config_link,
    is_recursive_root_link, remove_any,
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Log lines the container prints when its bootstrap copy finds the vendor
/// config directory and the persisted one are the same inode.
const SAME_FILE_PATTERNS: [&str; 2] = [
    "cp: '/opt/vertica/config' and '/data/vertica/config' are the same file",
    "cp: '/opt/vertica/config' and '/var/lib/vertica/config' are the same file",
];

pub const RECOVERED_DEFAULTS_REASON: &str = "apply recovered configuration defaults";
pub const SEEDED_CONFIG_REASON: &str = "apply seeded admintools.conf";

/// Whether recent logs carry the duplicate-source signature.
pub fn detect_same_file_issue(text: &str) -> bool {
    SAME_FILE_PATTERNS.iter().any(|p| text.contains(p))
}

/// Per-directory repair state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDirectory {
    pub path: PathBuf,
    /// Seen existing with content at least once.
    pub observed: bool,
    pub missing_observed_at: Option<DateTime<Utc>>,
    pub seeded_at: Option<DateTime<Utc>>,
}

impl ConfigDirectory {
    fn new(path: PathBuf) -> Self {
        ConfigDirectory {
            path,
            observed: false,
            missing_observed_at: None,
            seeded_at: None,
        }
    }

    fn clear_timers(&mut self) {
        self.missing_observed_at = None;
        self.seeded_at = None;
    }
}

/// Something the sanitizer changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    RecursiveRootRemoved(PathBuf),
    SymlinkReplaced(PathBuf),
    Seeded(PathBuf),
    Synchronized(PathBuf),
    Rebuilt(PathBuf),
    Restarted(String),
}

impl std::fmt::Display for RepairAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairAction::RecursiveRootRemoved(p) => write!(f, "removed recursive link {}", p.display()),
            RepairAction::SymlinkReplaced(p) => write!(f, "replaced symlink {}", p.display()),
            RepairAction::Seeded(p) => write!(f, "seeded admintools.conf in {}", p.display()),
            RepairAction::Synchronized(p) => write!(f, "copied {} into the container", p.display()),
            RepairAction::Rebuilt(p) => write!(f, "rebuilt {}", p.display()),
            RepairAction::Restarted(reason) => write!(f, "restarted to {}", reason),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SanitizeReport {
    pub actions: Vec<RepairAction>,
    /// A restart or rebuild happened; the tick must end here.
    pub corrective: bool,
}

impl SanitizeReport {
    fn push(&mut self, action: RepairAction) {
        if matches!(action, RepairAction::Restarted(_) | RepairAction::Rebuilt(_)) {
            self.corrective = true;
        }
        self.actions.push(action);
    }
}

pub struct ConfigSanitizer {
    runtime: Arc<dyn ContainerRuntime>,
    clock: Arc<dyn Clock>,
    seeder: AdminConfigSeeder,
    identity: IdentityReconciler,
    container: String,
    database: String,
    admin_os_user: String,
    data_roots: Vec<PathBuf>,
    container_config_path: String,
    missing_config_grace: Duration,
    seed_recovery: Duration,
    missing_config_restart_threshold: u32,
    directories: HashMap<PathBuf, ConfigDirectory>,
    recovered: HashSet<PathBuf>,
    same_file_cache: TtlCache<bool>,
}

impl ConfigSanitizer {
    pub fn new(
        config: &SupervisorConfig,
        runtime: Arc<dyn ContainerRuntime>,
        clock: Arc<dyn Clock>,
        registry: Arc<RegistryAuthenticator>,
    ) -> Self {
        let probe = RuntimeProbe::new(runtime.clone(), clock.clone());
        let seeder = AdminConfigSeeder::new(
            runtime.clone(),
            probe,
            registry,
            config.container.clone(),
            config.compose_files.clone(),
        );
        let identity = IdentityReconciler::new(
            runtime.clone(),
            config.container.clone(),
            config.admin_os_user.clone(),
            config.data_roots.clone(),
            config.fallback_identity,
        );
        let t = &config.timings;
        ConfigSanitizer {
            runtime,
            clock,
            seeder,
            identity,
            container: config.container.clone(),
            database: config.database.clone(),
            admin_os_user: config.admin_os_user.clone(),
            data_roots: config.data_roots.clone(),
            container_config_path: config.container_config_path.clone(),
            missing_config_grace: t.missing_config_grace,
            seed_recovery: t.seed_recovery,
            missing_config_restart_threshold: t.missing_config_restart_threshold,
            directories: HashMap::new(),
            recovered: HashSet::new(),
            same_file_cache: TtlCache::new(t.log_scan_ttl),
        }
    }

    /// Tracked state for a config directory, if any.
    pub fn directory(&self, path: &Path) -> Option<&ConfigDirectory> {
        self.directories.get(path)
    }

    pub fn is_recovered(&self, path: &Path) -> bool {
        self.recovered.contains(path)
    }

    /// One sanitization pass over every candidate config directory.
    ///
    /// `restart_count` is the container's current restart count; reaching
    /// the configured threshold bypasses the missing-file grace period.
    pub async fn run(
        &mut self,
        restarter: &mut Restarter,
        restart_count: Option<u32>,
    ) -> SanitizeReport {
        let mut report = SanitizeReport::default();

        let same_file = scan_logs(
            self.runtime.as_ref(),
            self.clock.as_ref(),
            &mut self.same_file_cache,
            &self.container,
            detect_same_file_issue,
        )
        .await;
        if same_file {
            tracing::debug!("Container logs report identical configuration source and destination");
        }

        let bases = self.data_roots.clone();
        for base in &bases {
            if !base.is_dir() {
                tracing::debug!("Data root {} does not exist; skipping", base.display());
                continue;
            }
            for root in candidate_roots(base, &self.database) {
                self.sanitize_root(base, &root, same_file, restart_count, restarter, &mut report)
                    .await;
                if report.corrective {
                    return report;
                }
            }
        }
        report
    }

    async fn sanitize_root(
        &mut self,
        base: &Path,
        root: &Path,
        same_file: bool,
        restart_count: Option<u32>,
        restarter: &mut Restarter,
        report: &mut SanitizeReport,
    ) {
        if is_recursive_root_link(root) {
            tracing::info!(
                "Removing recursive symlink {} to avoid bootstrap loops",
                root.display()
            );
            match fs::remove_file(root) {
                Ok(()) => report.push(RepairAction::RecursiveRootRemoved(root.to_path_buf())),
                Err(e) => tracing::warn!("Unable to remove {}: {}", root.display(), e),
            }
            return;
        }
        // Roots the container has not created yet are left for its own
        // bootstrap to populate.
        if !root.is_dir() {
            return;
        }

        let config_dir = root.join("config");

        if is_confusing_config_link(&config_dir) {
            tracing::info!(
                "Replacing confusing symlink {} so the container can recreate configuration files",
                config_dir.display()
            );
            match fs::remove_file(&config_dir).and_then(|_| ensure_directory(&config_dir)) {
                Ok(()) => {
                    self.identity.align(&config_dir).await;
                    report.push(RepairAction::SymlinkReplaced(config_dir));
                }
                Err(e) => tracing::warn!("Unable to replace {}: {}", config_dir.display(), e),
            }
            return;
        }

        let config_present = fs::symlink_metadata(&config_dir).is_ok();
        if !config_present {
            self.recovered.remove(&config_dir);
        }

        if same_file && config_present && !self.recovered.contains(&config_dir) {
            self.recover_same_file(&config_dir, restarter, report).await;
            return;
        }

        let now = self.clock.now();
        let state = self
            .directories
            .entry(config_dir.clone())
            .or_insert_with(|| ConfigDirectory::new(config_dir.clone()));

        if config_dir.is_dir() && has_content(&config_dir) {
            if !state.observed {
                tracing::debug!("Observed populated configuration directory {}", config_dir.display());
            }
            state.observed = true;
        }
        if !state.observed {
            return;
        }

        if !config_dir.is_dir() {
            tracing::info!(
                "Previously observed configuration directory {} disappeared; recreating it",
                config_dir.display()
            );
            if let Err(e) = ensure_directory(&config_dir) {
                tracing::warn!("Unable to recreate {}: {}", config_dir.display(), e);
                return;
            }
            self.identity.align(&config_dir).await;
        }

        let admin_config = config_dir.join(ADMIN_CONFIG_FILE);
        let valid = fs::read_to_string(&admin_config)
            .map(|text| is_valid_admin_config(&text))
            .unwrap_or(false);
        let seeded_at = state.seeded_at;

        if valid {
            let Some(seeded_at) = seeded_at else {
                state.missing_observed_at = None;
                return;
            };
            match self.container_path_exists(&self.container_config_path).await {
                Some(true) => {
                    tracing::info!(
                        "Container confirmed seeded admintools.conf from {}",
                        config_dir.display()
                    );
                    self.clear_timers(&config_dir);
                }
                Some(false) => {
                    let since_seed = seconds_between(seeded_at, now);
                    if since_seed >= self.seed_recovery.as_secs_f64() {
                        tracing::info!(
                            "admintools.conf still unreadable inside the container {:.0}s after seeding",
                            since_seed
                        );
                        self.rebuild(base, root, &config_dir, restarter, report).await;
                    } else if self.synchronize(&admin_config).await {
                        report.push(RepairAction::Synchronized(admin_config));
                    }
                }
                None => tracing::debug!("Unable to verify admintools.conf inside container"),
            }
            return;
        }

        if let Some(seeded_at) = seeded_at {
            let since_seed = seconds_between(seeded_at, now);
            if since_seed >= self.seed_recovery.as_secs_f64() {
                tracing::info!(
                    "admintools.conf remains missing {:.0}s after seeding; rebuilding {}",
                    since_seed,
                    root.display()
                );
                self.rebuild(base, root, &config_dir, restarter, report).await;
                return;
            }
        }

        let missing_since = *state.missing_observed_at.get_or_insert(now);
        let missing_for = seconds_between(missing_since, now);
        let grace_elapsed = missing_for >= self.missing_config_grace.as_secs_f64();
        let restarts_exceeded =
            restart_count.is_some_and(|n| n >= self.missing_config_restart_threshold);
        if !grace_elapsed && !restarts_exceeded {
            tracing::debug!(
                "admintools.conf missing in {} for {:.0}s; within grace period",
                config_dir.display(),
                missing_for
            );
            return;
        }

        tracing::info!(
            "admintools.conf missing in {} for {:.0}s (restart count {}); seeding defaults",
            config_dir.display(),
            missing_for,
            restart_count.map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );
        self.seed_and_apply(&config_dir, now, SEEDED_CONFIG_REASON, restarter, report)
            .await;
    }

    /// The bootstrap copy collided with the persisted directory: the file
    /// there cannot be trusted, so it is replaced unconditionally.
    async fn recover_same_file(
        &mut self,
        config_dir: &Path,
        restarter: &mut Restarter,
        report: &mut SanitizeReport,
    ) {
        tracing::info!(
            "Detected identical configuration source and destination; restoring defaults in {}",
            config_dir.display()
        );
        if let Err(e) = ensure_directory(config_dir) {
            tracing::warn!("Unable to prepare {}: {}", config_dir.display(), e);
            return;
        }
        if let Err(e) = remove_any(&config_dir.join(ADMIN_CONFIG_FILE)) {
            tracing::warn!("Unable to clear corrupted admintools.conf: {}", e);
            return;
        }

        let now = self.clock.now();
        self.directories
            .entry(config_dir.to_path_buf())
            .or_insert_with(|| ConfigDirectory::new(config_dir.to_path_buf()))
            .observed = true;
        // A throttled restart leaves the directory eligible for the next pass.
        if self
            .seed_and_apply(config_dir, now, RECOVERED_DEFAULTS_REASON, restarter, report)
            .await
        {
            self.recovered.insert(config_dir.to_path_buf());
        }
    }

    /// Seed, align ownership, copy into the container and restart when
    /// something changed. Returns whether the container has the seeded file
    /// or a restart to pick it up was issued.
    async fn seed_and_apply(
        &mut self,
        config_dir: &Path,
        now: DateTime<Utc>,
        reason: &str,
        restarter: &mut Restarter,
        report: &mut SanitizeReport,
    ) -> bool {
        let outcome = match self.seeder.seed(config_dir, &self.identity).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Failed to seed admintools.conf in {}: {}", config_dir.display(), e);
                if let Some(state) = self.directories.get_mut(config_dir) {
                    state.seeded_at = None;
                }
                return false;
            }
        };

        if let Some(state) = self.directories.get_mut(config_dir) {
            state.observed = true;
            if outcome.changed || state.seeded_at.is_none() {
                state.seeded_at = Some(now);
            }
        }
        if outcome.changed {
            report.push(RepairAction::Seeded(config_dir.to_path_buf()));
        }
        self.identity.align_tree(config_dir, 2).await;

        let admin_config = config_dir.join(ADMIN_CONFIG_FILE);
        let synchronized = self.synchronize(&admin_config).await;
        if synchronized {
            report.push(RepairAction::Synchronized(admin_config));
        }

        let present = self
            .container_path_exists(&self.container_config_path)
            .await;
        if present == Some(true) {
            self.clear_timers(config_dir);
        }

        let should_restart = outcome.changed || synchronized || present != Some(true);
        if !should_restart {
            return true;
        }
        if restarter.restart(&self.container, reason).await {
            report.push(RepairAction::Restarted(reason.to_string()));
            return true;
        }
        false
    }

    /// Destroy and recreate the root (or only `config` when the root is the
    /// data root itself), then restart.
    async fn rebuild(
        &mut self,
        base: &Path,
        root: &Path,
        config_dir: &Path,
        restarter: &mut Restarter,
        report: &mut SanitizeReport,
    ) {
        let target = if root == base { config_dir } else { root };
        tracing::info!(
            "Removing incomplete data directory {} so the container can rebuild it",
            target.display()
        );
        if let Err(e) = remove_any(target) {
            tracing::warn!("Unable to remove {}: {}", target.display(), e);
            return;
        }
        // `config` itself is left absent: a pre-existing empty directory
        // makes the bootstrap copy report identical paths.
        if target == root {
            if let Err(e) = ensure_directory(root) {
                tracing::warn!("Unable to recreate {}: {}", root.display(), e);
            }
        }
        if let Some(state) = self.directories.get_mut(config_dir) {
            state.clear_timers();
            state.observed = false;
        }
        report.push(RepairAction::Rebuilt(target.to_path_buf()));
        if restarter.restart(&self.container, SEEDED_CONFIG_REASON).await {
            report.push(RepairAction::Restarted(SEEDED_CONFIG_REASON.to_string()));
        }
    }

    fn clear_timers(&mut self, config_dir: &Path) {
        if let Some(state) = self.directories.get_mut(config_dir) {
            state.clear_timers();
        }
    }

    /// `test -e` inside the container: `None` when inconclusive.
    pub async fn container_path_exists(&self, path: &str) -> Option<bool> {
        match self
            .runtime
            .exec(&self.container, None, &["test", "-e", path])
            .await
        {
            Ok(out) => match out.exit_code {
                Some(0) => Some(true),
                Some(1) => Some(false),
                code => {
                    tracing::debug!(
                        "Path check for {} inside {} returned {:?}: {}",
                        path,
                        self.container,
                        code,
                        out.combined()
                    );
                    None
                }
            },
            Err(e) => {
                tracing::debug!("Path check for {} inside {} failed: {}", path, self.container, e);
                None
            }
        }
    }

    /// Make the admin config inside the container readable by the admin OS
    /// user: align its owner, then `chmod a+r` the file and `a+rx` its
    /// directory as root. Returns whether an adjustment was made.
    pub async fn ensure_container_config_readable(&self) -> bool {
        let target = self.container_config_path.as_str();
        if self.container_path_exists(target).await != Some(true) {
            return false;
        }
        let owner = self
            .identity
            .container_identity()
            .await
            .unwrap_or_else(|| self.identity.fallback());

        let mut adjusted = false;
        let current = self
            .runtime
            .exec(&self.container, Some("0"), &["stat", "-c", "%u:%g", target])
            .await
            .ok()
            .filter(|out| out.success())
            .and_then(|out| out.stdout.trim().parse::<Identity>().ok());
        if current.is_some_and(|id| id != owner) {
            tracing::info!("Aligning ownership of {} inside {} to {}", target, self.container, owner);
            adjusted |= self.root_exec_ok(&["chown", &owner.to_string(), target]).await;
        }

        let readable = match self
            .runtime
            .exec(&self.container, Some(&self.admin_os_user), &["test", "-r", target])
            .await
        {
            Ok(out) => out.success(),
            Err(e) => {
                tracing::debug!("Unable to check readability of {}: {}", target, e);
                return adjusted;
            }
        };
        if readable {
            return adjusted;
        }

        tracing::info!(
            "{} is not readable by {} inside {}; relaxing permissions",
            target,
            self.admin_os_user,
            self.container
        );
        if !self.root_exec_ok(&["chmod", "a+r", target]).await {
            return true;
        }
        let parent = Path::new(target)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        self.root_exec_ok(&["chmod", "a+rx", &parent]).await;
        true
    }

    async fn root_exec_ok(&self, command: &[&str]) -> bool {
        match self.runtime.exec(&self.container, Some("0"), command).await {
            Ok(out) if out.success() => true,
            Ok(out) => {
                tracing::warn!("'{}' inside container failed: {}", command.join(" "), out.combined());
                false
            }
            Err(e) => {
                tracing::warn!("'{}' inside container failed: {}", command.join(" "), e);
                false
            }
        }
    }

    /// Copy the host admin config into the container and give it to the
    /// admin account.
    pub async fn synchronize(&self, source: &Path) -> bool {
        if !source.is_file() {
            return false;
        }
        let target = self.container_config_path.as_str();
        let parent = Path::new(target)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());

        let root_exec = |args: Vec<String>| {
            let runtime = self.runtime.clone();
            let container = self.container.clone();
            async move {
                let argv: Vec<&str> = args.iter().map(String::as_str).collect();
                runtime.exec(&container, Some("0"), &argv).await
            }
        };

        match root_exec(vec!["rm".into(), "-f".into(), target.into()]).await {
            Ok(out) if !out.success() => tracing::debug!(
                "Unable to remove existing {} inside container: {}",
                target,
                out.combined()
            ),
            Err(e) => {
                tracing::warn!("Unable to prepare {} inside container: {}", target, e);
                return false;
            }
            _ => {}
        }
        if let Ok(out) = root_exec(vec!["mkdir".into(), "-p".into(), parent.clone()]).await {
            if !out.success() {
                tracing::warn!("Unable to create {} inside container: {}", parent, out.combined());
            }
        }

        if let Err(e) = self.runtime.copy_into(&self.container, source, target).await {
            tracing::warn!("Failed to copy admintools.conf into container: {}", e);
            return false;
        }
        tracing::info!("Copied admintools.conf into {} at {}", self.container, target);

        let owner = self
            .identity
            .container_identity()
            .await
            .unwrap_or_else(|| self.identity.fallback());
        let mut aligned = true;
        for args in [
            vec!["chown".to_string(), owner.to_string(), target.to_string()],
            vec!["chmod".to_string(), "a+r".to_string(), target.to_string()],
        ] {
            match root_exec(args.clone()).await {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    tracing::warn!("'{}' inside container failed: {}", args.join(" "), out.combined());
                    aligned = false;
                }
                Err(e) => {
                    tracing::warn!("'{}' inside container failed: {}", args.join(" "), e);
                    aligned = false;
                }
            }
        }
        aligned
    }

    /// Remove every non-base candidate root and each base-level `config`
    /// directory so the next container start bootstraps from scratch.
    pub fn reset_data_directories(&mut self) -> bool {
        let mut removed_any = false;
        for base in &self.data_roots {
            for root in candidate_roots(base, &self.database) {
                if root == *base || fs::symlink_metadata(&root).is_err() {
                    continue;
                }
                tracing::info!("Removing data directory {}", root.display());
                match remove_any(&root) {
                    Ok(()) => removed_any = true,
                    Err(e) => tracing::warn!("Unable to remove {}: {}", root.display(), e),
                }
            }

            let config_dir = base.join("config");
            if fs::symlink_metadata(&config_dir).is_ok() {
                tracing::info!("Removing configuration directory {}", config_dir.display());
                match remove_any(&config_dir) {
                    Ok(()) => removed_any = true,
                    Err(e) => tracing::warn!("Unable to remove {}: {}", config_dir.display(), e),
                }
            }
        }
        self.directories.clear();
        self.recovered.clear();
        removed_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_file_signature() {
        let log = "Copying config\ncp: '/opt/vertica/config' and '/data/vertica/config' are the same file\n";
        assert!(detect_same_file_issue(log));
        assert!(!detect_same_file_issue("cp: cannot stat '/opt/vertica/config'"));
    }

    #[test]
    fn test_report_marks_corrective_actions() {
        let mut report = SanitizeReport::default();
        report.push(RepairAction::Seeded(PathBuf::from("/data/vertica/config")));
        assert!(!report.corrective);
        report.push(RepairAction::Restarted(SEEDED_CONFIG_REASON.to_string()));
        assert!(report.corrective);
    }
}
