//! Bringing the container up from its compose definition.

pub mod definition;
pub mod eula_env;
pub mod registry;

pub use eula_env::ensure_compose_accepts_eula;
pub use registry::{AwsCliCredentials, RegistryAuthenticator, RegistryCredentials};

use crate::docker::{ContainerRuntime, DockerError};
use crate::error::{Error, Result};
use std::path::Path;
use std::sync::Arc;

const NAME_CONFLICT_MARKER: &str = "is already in use by container";

/// The runtime refused to create the container because a stale instance
/// still holds its name.
pub fn is_name_conflict(error: &DockerError) -> bool {
    error.diagnostics().contains(NAME_CONFLICT_MARKER)
}

pub struct ComposeOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<RegistryAuthenticator>,
    container: String,
}

impl ComposeOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<RegistryAuthenticator>,
        container: impl Into<String>,
    ) -> Self {
        ComposeOrchestrator {
            runtime,
            registry,
            container: container.into(),
        }
    }

    /// `compose up -d` with at most one stale-container removal and retry.
    ///
    /// Registry login failures, a failed forced removal and a name conflict
    /// that survives the removal are fatal. Any other failure is
    /// [`Error::ComposeFailed`] and is retried by the caller.
    pub async fn up(&self, compose_file: &Path, force_recreate: bool) -> Result<()> {
        if let Some(image) = definition::service_image(compose_file, &self.container) {
            self.registry.ensure_login_for_image(&image).await?;
        }

        tracing::info!(
            "Starting {} with {}{}",
            self.container,
            compose_file.display(),
            if force_recreate { " (force recreate)" } else { "" }
        );
        let first = match self.runtime.compose_up(compose_file, force_recreate).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !is_name_conflict(&first) {
            return Err(Error::ComposeFailed(first.to_string()));
        }

        tracing::info!(
            "Removing stale container {} that still holds its name",
            self.container
        );
        self.runtime
            .remove_force(&self.container)
            .await
            .map_err(|e| Error::ContainerRemoval {
                container: self.container.clone(),
                reason: e.to_string(),
            })?;

        match self.runtime.compose_up(compose_file, force_recreate).await {
            Ok(()) => Ok(()),
            Err(e) if is_name_conflict(&e) => Err(Error::Compose(format!(
                "container name still in use after removing {}: {}",
                self.container, e
            ))),
            Err(e) => Err(Error::ComposeFailed(e.to_string())),
        }
    }
}
