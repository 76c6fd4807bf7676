//! Container image provisioning for the afterglow dev machine.
//!
//! Makes sure the dev image exists before any container referencing it is
//! started: builds it when missing, or force-removes and rebuilds it on request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors related to image building
#[derive(Error, Debug)]
pub enum ImageBuilderError {
    #[error("Build of image '{tag}' failed: {reason}")]
    BuildFailed { tag: String, reason: String },
    #[error("Failed to remove image '{tag}': {reason}")]
    RemoveFailed { tag: String, reason: String },
    #[error("Image '{tag}' is still missing after a successful build")]
    ImageMissingAfterBuild { tag: String },
    #[error("Image store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type ImageBuilderResult<T> = Result<T, ImageBuilderError>;

/// Configuration for building the dev image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageBuildConfig {
    /// Name the image is tagged with and looked up by
    pub tag: String,
    /// Build context handed to the container runtime
    pub context_path: PathBuf,
}

impl Default for ImageBuildConfig {
    fn default() -> Self {
        Self {
            tag: "afterglow_log_demo_dev".to_string(),
            context_path: PathBuf::from("build/afterglow-log-demo-dev-machine"),
        }
    }
}

/// Local image registry of a container runtime.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn image_exists(&self, tag: &str) -> ImageBuilderResult<bool>;

    async fn build_image(&self, tag: &str, context_path: &Path) -> ImageBuilderResult<()>;

    /// Removes the image even if containers still reference it.
    async fn remove_image(&self, tag: &str) -> ImageBuilderResult<()>;
}

/// What `ensure_image` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnsureOutcome {
    /// Image was already present
    Existing,
    /// Image was missing and has been built
    Built,
    /// Image existed and was removed and built again
    Rebuilt,
}

impl EnsureOutcome {
    pub fn did_build(&self) -> bool {
        !matches!(self, EnsureOutcome::Existing)
    }
}

/// Build the image, then confirm the store can see it.
pub async fn build_image<S: ImageStore + ?Sized>(
    store: &S,
    config: &ImageBuildConfig,
) -> ImageBuilderResult<()> {
    info!(
        "Building image {} from {}",
        config.tag,
        config.context_path.display()
    );
    store.build_image(&config.tag, &config.context_path).await?;
    info!("Image finished building, checking image...");

    if !store.image_exists(&config.tag).await? {
        return Err(ImageBuilderError::ImageMissingAfterBuild {
            tag: config.tag.clone(),
        });
    }
    info!("Image {} is built successfully", config.tag);
    Ok(())
}

/// Make sure the dev image exists, building it when absent. With `force`, an
/// existing image is removed and rebuilt.
pub async fn ensure_image<S: ImageStore + ?Sized>(
    store: &S,
    config: &ImageBuildConfig,
    force: bool,
) -> ImageBuilderResult<EnsureOutcome> {
    if !store.image_exists(&config.tag).await? {
        warn!("Image {} does not exist...", config.tag);
        build_image(store, config).await?;
        return Ok(EnsureOutcome::Built);
    }

    if !force {
        return Ok(EnsureOutcome::Existing);
    }

    info!("Removing old image {}", config.tag);
    store.remove_image(&config.tag).await?;
    build_image(store, config).await?;
    Ok(EnsureOutcome::Rebuilt)
}
