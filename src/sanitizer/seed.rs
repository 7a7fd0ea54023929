//! Seeding a known-good `admintools.conf`.

use super::admin_config::{
    is_valid_admin_config, ADMIN_CONFIG_FILE, DEFAULT_ADMIN_CONFIG, TEMPLATE_SEARCH_PATHS,
    TEMPLATE_SEARCH_SCRIPT,
};
use super::identity::{Alignment, IdentityReconciler};
use super::paths::{ensure_directory, CONFIG_FILE_MODE};
use crate::compose::definition::service_image;
use crate::compose::registry::RegistryAuthenticator;
use crate::docker::ContainerRuntime;
use crate::error::Result;
use crate::probe::RuntimeProbe;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedOutcome {
    /// Content or ownership was actually written.
    pub changed: bool,
}

pub struct AdminConfigSeeder {
    runtime: Arc<dyn ContainerRuntime>,
    probe: RuntimeProbe,
    registry: Arc<RegistryAuthenticator>,
    container: String,
    compose_files: Vec<PathBuf>,
    template: OnceCell<String>,
}

impl AdminConfigSeeder {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        probe: RuntimeProbe,
        registry: Arc<RegistryAuthenticator>,
        container: impl Into<String>,
        compose_files: Vec<PathBuf>,
    ) -> Self {
        AdminConfigSeeder {
            runtime,
            probe,
            registry,
            container: container.into(),
            compose_files,
            template: OnceCell::new(),
        }
    }

    /// Image of the running container, else the compose service's image.
    pub async fn resolve_image(&self) -> Option<String> {
        if let Some(image) = self.probe.image_of(&self.container).await {
            return Some(image);
        }
        let compose_file = self.compose_files.iter().find(|p| p.is_file())?;
        service_image(compose_file, &self.container)
    }

    /// Read the vendor template out of the image with a throwaway container.
    pub async fn extract_image_template(&self) -> Option<String> {
        let image = self.resolve_image().await?;

        if let Err(e) = self.registry.ensure_login_for_image(&image).await {
            tracing::warn!(
                "Unable to authenticate for {} while extracting admintools.conf template; using built-in defaults: {}",
                image,
                e
            );
            return None;
        }

        let mut args = vec!["-c", TEMPLATE_SEARCH_SCRIPT, "--"];
        args.extend_from_slice(&TEMPLATE_SEARCH_PATHS);
        let out = match self.runtime.run_ephemeral(&image, "/bin/sh", &args).await {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!("Failed to extract admintools.conf template from {}: {}", image, e);
                return None;
            }
        };
        if !out.success() {
            tracing::warn!(
                "Failed to extract admintools.conf template from {} (exit {:?}): {}",
                image,
                out.exit_code,
                out.stderr.trim_end()
            );
            return None;
        }
        if out.stdout.trim().is_empty() {
            tracing::warn!("Image {} returned an empty admintools.conf template", image);
            return None;
        }

        let mut template = out.stdout;
        if !template.ends_with('\n') {
            template.push('\n');
        }
        Some(template)
    }

    /// The template used for seeding, resolved once per process.
    pub async fn template(&self) -> &str {
        self.template
            .get_or_init(|| async {
                match self.extract_image_template().await {
                    Some(template) => {
                        tracing::info!("Using admintools.conf template from the image");
                        template
                    }
                    None => DEFAULT_ADMIN_CONFIG.to_string(),
                }
            })
            .await
    }

    /// Ensure `config_dir/admintools.conf` exists and is valid.
    ///
    /// An existing valid file is left alone; only its ownership may be
    /// adjusted. A symlinked or invalid file is replaced.
    pub async fn seed(
        &self,
        config_dir: &Path,
        identity: &IdentityReconciler,
    ) -> Result<SeedOutcome> {
        let admin_config = config_dir.join(ADMIN_CONFIG_FILE);

        if let Ok(meta) = fs::symlink_metadata(&admin_config) {
            if meta.file_type().is_symlink() {
                tracing::info!(
                    "Removing symlinked admintools.conf at {} to rebuild a regular file",
                    admin_config.display()
                );
                fs::remove_file(&admin_config)?;
            }
        }

        if admin_config.is_file() {
            let valid = fs::read_to_string(&admin_config)
                .map(|text| is_valid_admin_config(&text))
                .unwrap_or(false);
            if valid {
                let changed = matches!(identity.align(&admin_config).await, Alignment::Changed(_));
                return Ok(SeedOutcome { changed });
            }
            tracing::info!(
                "Existing {} is missing critical configuration; rebuilding it",
                admin_config.display()
            );
        }

        ensure_directory(config_dir)?;
        let template = self.template().await;
        fs::write(&admin_config, template)?;
        if let Err(e) = fs::set_permissions(
            &admin_config,
            fs::Permissions::from_mode(CONFIG_FILE_MODE),
        ) {
            tracing::warn!(
                "Unable to relax permissions on {}: {}",
                admin_config.display(),
                e
            );
        }
        identity.align(config_dir).await;
        identity.align(&admin_config).await;
        tracing::info!("Seeded default admintools.conf at {}", admin_config.display());

        Ok(SeedOutcome { changed: true })
    }
}
