use super::duration::humantime_str;
use crate::sanitizer::Identity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Everything the supervisor needs to know about the container it manages.
///
/// ```yaml
/// container: vertica_ce
/// database: VMart
/// data_roots: [/var/lib/vertica, /data/vertica]
/// timings:
///   unhealthy_grace: 15m
///   poll_interval: 10s
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    pub container: String,
    pub database: String,
    pub host: String,
    pub port: u16,
    /// Host advertised to external clients; connected to non-fatally after
    /// the primary checks pass.
    pub public_host: Option<String>,
    /// Transport security mode; `prefer` when unset.
    pub tls_mode: Option<String>,
    /// OS account the database processes run as inside the container.
    pub admin_os_user: String,
    pub compose_files: Vec<PathBuf>,
    pub data_roots: Vec<PathBuf>,
    pub container_config_path: String,
    pub fallback_identity: Identity,
    pub credentials: Credentials,
    pub timings: Timings,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            container: "vertica_ce".to_string(),
            database: "VMart".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5433,
            public_host: None,
            tls_mode: None,
            admin_os_user: "dbadmin".to_string(),
            compose_files: [
                "/opt/compose.remote.yml",
                "/opt/compose.remote.yaml",
                "/opt/compose.yml",
                "/opt/compose.yaml",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
            data_roots: vec![
                PathBuf::from("/var/lib/vertica"),
                PathBuf::from("/data/vertica"),
            ],
            container_config_path: "/opt/vertica/config/admintools.conf".to_string(),
            fallback_identity: Identity::new(500, 500),
            credentials: Credentials::default(),
            timings: Timings::default(),
        }
    }
}

impl SupervisorConfig {
    /// First configured compose file that exists on disk.
    pub fn compose_file(&self) -> Option<PathBuf> {
        self.compose_files.iter().find(|p| p.is_file()).cloned()
    }
}

/// Database credential pairs.
///
/// The bootstrap pair is what the image ships with; the admin pair is the
/// account `ensure` provisions on top of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Credentials {
    pub bootstrap_user: Option<String>,
    pub bootstrap_password: Option<String>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
}

/// Grace periods, thresholds and timeouts for the reconciliation loop.
///
/// `missing_config_grace`, `seed_recovery` and
/// `missing_config_restart_threshold` are independent knobs; none of them
/// is derived from another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timings {
    #[serde(with = "humantime_str")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_str")]
    pub overall_timeout: Duration,
    #[serde(with = "humantime_str")]
    pub unhealthy_grace: Duration,
    #[serde(with = "humantime_str")]
    pub stuck_threshold: Duration,
    #[serde(with = "humantime_str")]
    pub stuck_fatal_threshold: Duration,
    pub max_stuck_restarts: u32,
    /// Restarts of a container still unhealthy past its grace period before
    /// it is recreated.
    pub max_unhealthy_restarts: u32,
    /// Forced recreates before the data directories are reset.
    pub max_recreates: u32,
    /// Minimum spacing of direct connection attempts against a container
    /// whose health check disagrees.
    #[serde(with = "humantime_str")]
    pub direct_connect_interval: Duration,
    #[serde(with = "humantime_str")]
    pub missing_config_grace: Duration,
    #[serde(with = "humantime_str")]
    pub seed_recovery: Duration,
    pub missing_config_restart_threshold: u32,
    #[serde(with = "humantime_str")]
    pub restart_throttle: Duration,
    #[serde(with = "humantime_str")]
    pub log_scan_ttl: Duration,
    #[serde(with = "humantime_str")]
    pub command_timeout: Duration,
    /// Budget for one `compose up`, and for a missing compose file to appear.
    #[serde(with = "humantime_str")]
    pub compose_timeout: Duration,
    #[serde(with = "humantime_str")]
    pub connect_timeout: Duration,
    pub connect_attempts: u32,
    #[serde(with = "humantime_str")]
    pub connect_delay: Duration,
    #[serde(with = "humantime_str")]
    pub port_wait: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            poll_interval: Duration::from_secs(10),
            overall_timeout: Duration::from_secs(1500),
            unhealthy_grace: Duration::from_secs(900),
            stuck_threshold: Duration::from_secs(900),
            stuck_fatal_threshold: Duration::from_secs(1200),
            max_stuck_restarts: 1,
            max_unhealthy_restarts: 3,
            max_recreates: 2,
            direct_connect_interval: Duration::from_secs(60),
            missing_config_grace: Duration::from_secs(300),
            seed_recovery: Duration::from_secs(300),
            missing_config_restart_threshold: 2,
            restart_throttle: Duration::from_secs(60),
            log_scan_ttl: Duration::from_secs(30),
            command_timeout: Duration::from_secs(120),
            compose_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
            connect_attempts: 30,
            connect_delay: Duration::from_secs(10),
            port_wait: Duration::from_secs(300),
        }
    }
}
