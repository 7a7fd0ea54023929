//! Authentication against hosted ECR registries.
//!
//! Only images whose reference matches a known hosted-registry pattern need
//! a login. A failed login is fatal: a pull failure further down is much
//! harder to diagnose.

use crate::docker::ContainerRuntime;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const PUBLIC_REGION: &str = "us-east-1";
const LOGIN_USER: &str = "AWS";

fn private_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]+\.dkr\.ecr\.([a-z0-9-]+)\.amazonaws\.com)(/.+)$")
            .expect("static regex pattern is valid")
    })
}

fn public_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(public\.ecr\.aws)(/.+)$").expect("static regex pattern is valid"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    Private,
    Public,
}

/// A registry an image reference resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryTarget {
    pub registry: String,
    pub region: String,
    pub kind: RegistryKind,
}

impl RegistryTarget {
    /// `None` for images that need no login.
    pub fn from_image(image: &str) -> Option<Self> {
        let image = image.trim();
        if let Some(caps) = private_pattern().captures(image) {
            return Some(RegistryTarget {
                registry: caps[1].to_string(),
                region: caps[2].to_string(),
                kind: RegistryKind::Private,
            });
        }
        public_pattern().captures(image).map(|caps| RegistryTarget {
            registry: caps[1].to_string(),
            region: PUBLIC_REGION.to_string(),
            kind: RegistryKind::Public,
        })
    }
}

/// Source of registry passwords.
#[async_trait]
pub trait RegistryCredentials: Send + Sync {
    async fn password(&self, target: &RegistryTarget) -> std::result::Result<String, String>;
}

/// Passwords from the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsCliCredentials {
    timeout: Duration,
}

impl AwsCliCredentials {
    pub fn new(timeout: Duration) -> Self {
        AwsCliCredentials { timeout }
    }
}

impl Default for AwsCliCredentials {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl RegistryCredentials for AwsCliCredentials {
    async fn password(&self, target: &RegistryTarget) -> std::result::Result<String, String> {
        let service = match target.kind {
            RegistryKind::Private => "ecr",
            RegistryKind::Public => "ecr-public",
        };
        let args = ["--region", target.region.as_str(), service, "get-login-password"];
        tracing::debug!("$ aws {}", args.join(" "));

        let result = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("aws")
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("failed to run aws CLI: {}", e)),
            Err(_) => return Err(format!("aws CLI timed out after {}s", self.timeout.as_secs())),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "aws {} get-login-password failed: {}",
                service,
                stderr.trim()
            ));
        }
        let password = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if password.is_empty() {
            return Err(format!("aws {} get-login-password returned nothing", service));
        }
        Ok(password)
    }
}

/// Logs in to registries on demand, once per registry per process.
pub struct RegistryAuthenticator {
    runtime: Arc<dyn ContainerRuntime>,
    credentials: Arc<dyn RegistryCredentials>,
    authenticated: Mutex<HashSet<String>>,
}

impl RegistryAuthenticator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, credentials: Arc<dyn RegistryCredentials>) -> Self {
        RegistryAuthenticator {
            runtime,
            credentials,
            authenticated: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_authenticated(&self, registry: &str) -> bool {
        self.authenticated.lock().contains(registry)
    }

    /// Log in to the registry hosting `image` if it needs one.
    pub async fn ensure_login_for_image(&self, image: &str) -> Result<()> {
        let Some(target) = RegistryTarget::from_image(image) else {
            return Ok(());
        };
        if self.is_authenticated(&target.registry) {
            return Ok(());
        }

        tracing::info!(
            "Authenticating to {} (region {}) for image {}",
            target.registry,
            target.region,
            image
        );
        let password = self
            .credentials
            .password(&target)
            .await
            .map_err(|reason| Error::RegistryAuth {
                registry: target.registry.clone(),
                reason,
            })?;
        self.runtime
            .login(&target.registry, LOGIN_USER, &password)
            .await
            .map_err(|e| Error::RegistryAuth {
                registry: target.registry.clone(),
                reason: e.to_string(),
            })?;

        self.authenticated.lock().insert(target.registry);
        Ok(())
    }
}
