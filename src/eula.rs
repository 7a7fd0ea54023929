//! License prompt detection and acceptance.
//!
//! Without a TTY the engine prints its EULA, cannot read an answer and the
//! health check never passes. Detection is a log scan; acceptance runs the
//! vendor's own checker inside the container.

use crate::clock::Clock;
use crate::docker::ContainerRuntime;
use crate::log_scan::{scan_logs, TtlCache};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Environment variables that pre-accept the license on container start.
pub const EULA_ENVIRONMENT_VARIABLES: [(&str, &str); 18] = [
    ("VERTICA_ACCEPT_EULA", "ACCEPT"),
    ("VERTICA_EULA", "ACCEPT"),
    ("VERTICA_EULA_ACCEPTANCE", "ACCEPT"),
    ("VERTICA_EULA_ACCEPTED", "1"),
    ("ACCEPT_EULA", "ACCEPT"),
    ("VERTICA_DB_EULA", "ACCEPT"),
    ("VERTICA_DB_EULA_ACCEPTED", "1"),
    ("VERTICA_LICENSE", "ACCEPT"),
    ("VERTICA_LICENSE_ACCEPTED", "1"),
    ("VERTICA_LICENSE_STATUS", "ACCEPT"),
    ("VERTICA_ACCEPT_LICENSE", "ACCEPT"),
    ("VERTICA_LICENSE_ACCEPTANCE", "ACCEPT"),
    // The management console agent in newer images has its own prompt.
    ("VERTICA_MC_ACCEPT_EULA", "ACCEPT"),
    ("VERTICA_MC_EULA", "ACCEPT"),
    ("VERTICA_MC_EULA_ACCEPTED", "1"),
    ("VERTICA_MC_ACCEPT_LICENSE", "ACCEPT"),
    ("VERTICA_MC_LICENSE", "ACCEPT"),
    ("VERTICA_MC_LICENSE_ACCEPTED", "1"),
];

const TTY_NOTICE: &str = "Output is not a tty --- can't reliably display EULA";

const KEYWORD_SETS: [&[&str]; 4] = [
    &["eula", "accept", "required"],
    &["eula", "acceptance", "required"],
    &["license", "accept", "required"],
    &["eula", "prompt"],
];

const PYTHON_CANDIDATES: [&str; 2] = [
    "/opt/vertica/oss/python3/bin/python3",
    "/opt/vertica/bin/python3",
];

const ACCEPT_SCRIPT: &str = "import vertica.shared.logging; \
    import vertica.tools.eula_checker; \
    vertica.shared.logging.setup_admintool_logging(); \
    vertica.tools.eula_checker.EulaChecker().write_acceptance()";

/// Why a log was classified as blocked on the license prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EulaPromptSignal {
    /// The installer's own "not a tty" notice.
    TtyNotice,
    /// Every keyword of one indicator set appeared.
    Keywords(&'static [&'static str]),
}

/// Classify log text.
pub fn detect_eula_prompt(text: &str) -> Option<EulaPromptSignal> {
    if text.contains(TTY_NOTICE) {
        return Some(EulaPromptSignal::TtyNotice);
    }
    let lowered = text.to_lowercase();
    KEYWORD_SETS
        .iter()
        .copied()
        .find(|set| set.iter().all(|keyword| lowered.contains(keyword)))
        .map(EulaPromptSignal::Keywords)
}

pub struct EulaHandler {
    runtime: Arc<dyn ContainerRuntime>,
    clock: Arc<dyn Clock>,
    cache: TtlCache<bool>,
    handled: HashSet<String>,
}

impl EulaHandler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        EulaHandler {
            runtime,
            clock,
            cache: TtlCache::new(ttl),
            handled: HashSet::new(),
        }
    }

    /// Whether recent logs show the prompt. Cached per container for the TTL.
    pub async fn detect_prompt(&mut self, container: &str) -> bool {
        scan_logs(
            self.runtime.as_ref(),
            self.clock.as_ref(),
            &mut self.cache,
            container,
            |text| detect_eula_prompt(text).is_some(),
        )
        .await
    }

    /// Record that the prompt for `container` has been acted on. Returns
    /// `true` only the first time.
    pub fn first_observation(&mut self, container: &str) -> bool {
        self.handled.insert(container.to_string())
    }

    /// Locate a Python interpreter inside the container.
    pub async fn detect_interpreter(&self, container: &str) -> Option<String> {
        for candidate in PYTHON_CANDIDATES {
            match self
                .runtime
                .exec(container, None, &["test", "-x", candidate])
                .await
            {
                Ok(out) if out.success() => return Some(candidate.to_string()),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Interpreter probe failed in {}: {}", container, e);
                    return None;
                }
            }
        }

        let out = self
            .runtime
            .exec(container, None, &["which", "python3"])
            .await
            .ok()?;
        if !out.success() {
            return None;
        }
        out.stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }

    /// Record acceptance inside the container. Never fails; returns whether
    /// the vendor checker reported success.
    pub async fn accept(&mut self, container: &str) -> bool {
        let Some(python) = self.detect_interpreter(container).await else {
            tracing::warn!(
                "Unable to find a Python interpreter inside {} to record EULA acceptance",
                container
            );
            return false;
        };

        let result = self
            .runtime
            .exec(container, None, &[&python, "-c", ACCEPT_SCRIPT])
            .await;
        // The next scan must see post-acceptance logs.
        self.cache.invalidate(container);

        match result {
            Ok(out) if out.success() => {
                tracing::info!("Recorded EULA acceptance within container {}", container);
                true
            }
            Ok(out) => {
                tracing::warn!(
                    "Failed to record EULA acceptance in {} (exit {:?}): {}",
                    container,
                    out.exit_code,
                    out.combined()
                );
                false
            }
            Err(e) => {
                tracing::warn!("Failed to record EULA acceptance in {}: {}", container, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_tty_notice() {
        let log = "Starting Vertica...\nOutput is not a tty --- can't reliably display EULA\n";
        assert_eq!(detect_eula_prompt(log), Some(EulaPromptSignal::TtyNotice));
    }

    #[test]
    fn test_detects_keyword_sets_case_insensitively() {
        let log = "EULA acceptance REQUIRED before continuing";
        assert_eq!(
            detect_eula_prompt(log),
            Some(EulaPromptSignal::Keywords(&["eula", "accept", "required"]))
        );
        assert!(detect_eula_prompt("Displaying EULA prompt").is_some());
    }

    #[test]
    fn test_partial_keywords_do_not_match() {
        assert_eq!(detect_eula_prompt("license file installed"), None);
        assert_eq!(detect_eula_prompt("eula accepted"), None);
        assert_eq!(detect_eula_prompt(""), None);
    }

    #[test]
    fn test_environment_variables_are_unique() {
        let keys: HashSet<&str> = EULA_ENVIRONMENT_VARIABLES.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys.len(), EULA_ENVIRONMENT_VARIABLES.len());
    }
}
