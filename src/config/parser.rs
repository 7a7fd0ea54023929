use super::SupervisorConfig;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_NAMES: [&str; 2] = ["vsup.yaml", "vsup.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory
    pub fn find_config_file(&self) -> Result<Option<PathBuf>> {
        let current_dir = std::env::current_dir()?;
        Ok(Self::find_config_in_dir(&current_dir))
    }

    /// Walk from `dir` up to the filesystem root looking for `vsup.yaml`.
    pub fn find_config_in_dir(dir: &Path) -> Option<PathBuf> {
        for ancestor in dir.ancestors() {
            for name in CONFIG_NAMES {
                let candidate = ancestor.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Load config from file path
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<SupervisorConfig> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse_config(&content)
    }

    pub fn parse_config(&self, content: &str) -> Result<SupervisorConfig> {
        if content.trim().is_empty() {
            return Ok(SupervisorConfig::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Resolve the effective configuration: an explicit path, else a
    /// discovered `vsup.yaml`, else defaults; environment overrides last.
    pub fn resolve(&self, explicit: Option<&Path>) -> Result<SupervisorConfig> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => self.find_config_file()?,
        };

        let mut config = match path {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                self.load_config(&path)?
            }
            None => SupervisorConfig::default(),
        };
        config.apply_env()?;
        Ok(config)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
