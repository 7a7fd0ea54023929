//! Ownership alignment between host data directories and the in-container
//! admin account.

use crate::docker::ContainerRuntime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// A numeric `uid:gid` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub const ROOT: Identity = Identity { uid: 0, gid: 0 };

    pub const fn new(uid: u32, gid: u32) -> Self {
        Identity { uid, gid }
    }

    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::symlink_metadata(path)?;
        Ok(Identity::new(meta.uid(), meta.gid()))
    }

    /// Identity of the running process.
    pub fn effective() -> Self {
        Identity::new(
            nix::unistd::geteuid().as_raw(),
            nix::unistd::getegid().as_raw(),
        )
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

impl FromStr for Identity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (uid, gid) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected 'uid:gid', got '{}'", s))?;
        let uid = uid
            .trim()
            .parse()
            .map_err(|_| format!("invalid uid in '{}'", s))?;
        let gid = gid
            .trim()
            .parse()
            .map_err(|_| format!("invalid gid in '{}'", s))?;
        Ok(Identity::new(uid, gid))
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Result of aligning one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// Already owned by a candidate identity.
    Unchanged,
    Changed(Identity),
    /// Outside the data roots, or no candidate could be applied.
    Skipped,
}

/// Chooses and applies the identity the database process runs as.
///
/// Candidates, in order: the live identity of the admin account inside the
/// container, identities already present on files under the data roots
/// (excluding root and this process), then the configured fallback.
pub struct IdentityReconciler {
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
    admin_os_user: String,
    data_roots: Vec<PathBuf>,
    fallback: Identity,
    scan_depth: usize,
}

impl IdentityReconciler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        container: impl Into<String>,
        admin_os_user: impl Into<String>,
        data_roots: Vec<PathBuf>,
        fallback: Identity,
    ) -> Self {
        IdentityReconciler {
            runtime,
            container: container.into(),
            admin_os_user: admin_os_user.into(),
            data_roots,
            fallback,
            scan_depth: 3,
        }
    }

    pub fn fallback(&self) -> Identity {
        self.fallback
    }

    fn within_data_roots(&self, path: &Path) -> bool {
        self.data_roots.iter().any(|root| path.starts_with(root))
    }

    /// `uid:gid` of the admin OS account inside the running container.
    pub async fn container_identity(&self) -> Option<Identity> {
        let script = format!(
            "uid=$(id -u {user}) && gid=$(id -g {user}) && printf '%s:%s' \"$uid\" \"$gid\"",
            user = self.admin_os_user
        );
        let out = self
            .runtime
            .exec(&self.container, Some("0"), &["sh", "-c", &script])
            .await
            .ok()?;
        if !out.success() {
            return None;
        }
        out.stdout.trim().parse().ok()
    }

    /// Identities found on existing entries under the data roots, most
    /// frequent first.
    pub fn discovered_identities(&self) -> Vec<Identity> {
        let mut counts: HashMap<Identity, usize> = HashMap::new();
        let mut order: Vec<Identity> = Vec::new();

        for root in &self.data_roots {
            let mut stack = vec![(root.clone(), 0usize)];
            while let Some((path, depth)) = stack.pop() {
                let Ok(meta) = std::fs::symlink_metadata(&path) else {
                    continue;
                };
                let identity = Identity::new(meta.uid(), meta.gid());
                let count = counts.entry(identity).or_insert(0);
                if *count == 0 {
                    order.push(identity);
                }
                *count += 1;

                if depth >= self.scan_depth || !meta.is_dir() {
                    continue;
                }
                if let Ok(entries) = std::fs::read_dir(&path) {
                    for entry in entries.flatten() {
                        stack.push((entry.path(), depth + 1));
                    }
                }
            }
        }

        let ignored = [Identity::ROOT, Identity::effective()];
        order.retain(|id| !ignored.contains(id));
        // Stable sort keeps first-seen order among equal counts.
        order.sort_by(|a, b| counts[b].cmp(&counts[a]));
        order
    }

    /// Ordered, de-duplicated candidate list.
    pub async fn candidates(&self) -> Vec<Identity> {
        let mut candidates = Vec::new();
        if let Some(live) = self.container_identity().await {
            candidates.push(live);
        }
        candidates.extend(self.discovered_identities());
        candidates.push(self.fallback);

        let mut seen = std::collections::HashSet::new();
        candidates.retain(|id| seen.insert(*id));
        candidates
    }

    /// Align `path` with the first applicable candidate.
    pub async fn align(&self, path: &Path) -> Alignment {
        let candidates = self.candidates().await;
        self.align_with(path, &candidates)
    }

    /// Align `path` and its descendants up to `depth` levels.
    pub async fn align_tree(&self, path: &Path, depth: usize) -> bool {
        let candidates = self.candidates().await;
        let mut changed = false;
        let mut stack = vec![(path.to_path_buf(), 0usize)];
        while let Some((current, level)) = stack.pop() {
            if let Alignment::Changed(_) = self.align_with(&current, &candidates) {
                changed = true;
            }
            if level >= depth {
                continue;
            }
            let is_dir = std::fs::symlink_metadata(&current)
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Ok(entries) = std::fs::read_dir(&current) {
                for entry in entries.flatten() {
                    stack.push((entry.path(), level + 1));
                }
            }
        }
        changed
    }

    fn align_with(&self, path: &Path, candidates: &[Identity]) -> Alignment {
        if !self.within_data_roots(path) {
            return Alignment::Skipped;
        }
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => return Alignment::Skipped,
            Ok(meta) => meta,
            Err(e) => {
                tracing::debug!("Unable to inspect ownership of {}: {}", path.display(), e);
                return Alignment::Skipped;
            }
        };
        let current = Identity::new(meta.uid(), meta.gid());
        if candidates.contains(&current) {
            return Alignment::Unchanged;
        }

        for candidate in candidates {
            let result = nix::unistd::chown(
                path,
                Some(nix::unistd::Uid::from_raw(candidate.uid)),
                Some(nix::unistd::Gid::from_raw(candidate.gid)),
            );
            match result {
                Ok(()) => {
                    tracing::info!(
                        "Adjusted ownership on {} to {} for admin compatibility",
                        path.display(),
                        candidate
                    );
                    return Alignment::Changed(*candidate);
                }
                Err(e) => {
                    tracing::debug!(
                        "Unable to chown {} to {}: {}",
                        path.display(),
                        candidate,
                        e
                    );
                }
            }
        }
        Alignment::Skipped
    }
}
