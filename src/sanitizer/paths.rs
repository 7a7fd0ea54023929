//! Host-side layout of the data roots.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

/// Vendor configuration directory inside the image.
pub const VENDOR_CONFIG_DIR: &str = "/opt/vertica/config";

/// Mode for data directories the container must be able to write into.
pub const DATA_DIR_MODE: u32 = 0o777;

/// Mode for seeded configuration files.
pub const CONFIG_FILE_MODE: u32 = 0o666;

/// Candidate database roots under `base`: `<base>/vertica`, `<base>/<db>`,
/// `base` itself, then existing children that are known names or already
/// hold a `config/` directory. Order-preserving and de-duplicated.
pub fn candidate_roots(base: &Path, database: &str) -> Vec<PathBuf> {
    let mut known: Vec<String> = vec!["vertica".to_string()];
    let database = database.trim();
    if !database.is_empty() && !known.iter().any(|k| k == database) {
        known.push(database.to_string());
    }

    let mut candidates: Vec<PathBuf> = known.iter().map(|name| base.join(name)).collect();
    candidates.push(base.to_path_buf());

    match fs::read_dir(base) {
        Ok(entries) => {
            let mut children: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            children.sort();
            for child in children {
                let named = child
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| known.iter().any(|k| k == n));
                if named || child.join("config").exists() {
                    candidates.push(child);
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!("Unable to inspect contents of {}: {}", base.display(), e),
    }

    let mut seen = HashSet::new();
    candidates.retain(|p| seen.insert(p.clone()));
    candidates
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Lexical normalization (`.` and `..`) of a symlink target.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn points_into_data_tree(target: &Path) -> bool {
    let text = normalize(target).to_string_lossy().into_owned();
    text.starts_with("/data") || text.starts_with("data")
}

/// A database root that is a symlink back into a data tree makes the
/// container's bootstrap copy recurse.
pub fn is_recursive_root_link(path: &Path) -> bool {
    if !is_symlink(path) {
        return false;
    }
    match fs::read_link(path) {
        Ok(target) => points_into_data_tree(&target),
        Err(_) => false,
    }
}

/// A `config` symlink is confusing when it points into a data tree or at
/// the vendor config directory, lexically or after resolution.
pub fn is_confusing_config_link(path: &Path) -> bool {
    if !is_symlink(path) {
        return false;
    }
    let Ok(target) = fs::read_link(path) else {
        return false;
    };
    if points_into_data_tree(&target) {
        return true;
    }
    let normalized = normalize(&target);
    if normalized.ends_with("opt/vertica/config") {
        return true;
    }
    let absolute = if target.is_absolute() {
        target
    } else {
        path.parent().map(|p| p.join(&target)).unwrap_or(target)
    };
    fs::canonicalize(absolute)
        .map(|resolved| resolved == Path::new(VENDOR_CONFIG_DIR))
        .unwrap_or(false)
}

/// Make `path` a real directory with [`DATA_DIR_MODE`], replacing a
/// symlink if one is in the way.
pub fn ensure_directory(path: &Path) -> io::Result<()> {
    if is_symlink(path) {
        tracing::info!("Removing unexpected symlink at {}", path.display());
        fs::remove_file(path)?;
    }
    fs::create_dir_all(path)?;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(DATA_DIR_MODE)) {
        tracing::debug!("Unable to adjust permissions on {}: {}", path.display(), e);
    }
    Ok(())
}

/// Remove a file, symlink or directory tree; absence is success.
pub fn remove_any(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Directory exists and holds at least one entry.
pub fn has_content(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn test_candidate_roots_order_and_dedup() {
        let dir = TempDir::new().unwrap();
        let base = dir.path();
        fs::create_dir_all(base.join("VMart")).unwrap();
        fs::create_dir_all(base.join("other/config")).unwrap();
        fs::create_dir_all(base.join("unrelated")).unwrap();

        let roots = candidate_roots(base, "VMart");
        assert_eq!(
            roots,
            vec![
                base.join("vertica"),
                base.join("VMart"),
                base.to_path_buf(),
                base.join("other"),
            ]
        );
    }

    #[test]
    fn test_candidate_roots_missing_base() {
        let roots = candidate_roots(Path::new("/nonexistent/base"), "vertica");
        assert_eq!(
            roots,
            vec![
                PathBuf::from("/nonexistent/base/vertica"),
                PathBuf::from("/nonexistent/base")
            ]
        );
    }

    #[test]
    fn test_confusing_config_links() {
        let dir = TempDir::new().unwrap();
        let into_data = dir.path().join("a");
        symlink("/data/vertica/config", &into_data).unwrap();
        assert!(is_confusing_config_link(&into_data));

        let vendor = dir.path().join("b");
        symlink("/opt/vertica/config", &vendor).unwrap();
        assert!(is_confusing_config_link(&vendor));

        let relative = dir.path().join("c");
        symlink("../x/../opt/vertica/config", &relative).unwrap();
        assert!(is_confusing_config_link(&relative));

        let harmless = dir.path().join("d");
        symlink("/srv/shared/config", &harmless).unwrap();
        assert!(!is_confusing_config_link(&harmless));

        let real = dir.path().join("e");
        fs::create_dir(&real).unwrap();
        assert!(!is_confusing_config_link(&real));
    }

    #[test]
    fn test_recursive_root_link() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("vertica");
        symlink("data/vertica", &link).unwrap();
        assert!(is_recursive_root_link(&link));

        let fine = dir.path().join("VMart");
        symlink("/srv/vmart", &fine).unwrap();
        assert!(!is_recursive_root_link(&fine));
    }

    #[test]
    fn test_ensure_directory_replaces_symlink() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        let link = dir.path().join("config");
        symlink(&target, &link).unwrap();

        ensure_directory(&link).unwrap();
        let meta = fs::symlink_metadata(&link).unwrap();
        assert!(meta.is_dir());
        assert!(!meta.file_type().is_symlink());
        assert!(!has_content(&link));
    }

    #[test]
    fn test_remove_any_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("nested")).unwrap();
        fs::write(tree.join("nested/file"), "x").unwrap();
        remove_any(&tree).unwrap();
        assert!(!tree.exists());
        remove_any(&tree).unwrap();
    }
}
