//! Ensure the dev image, then run the install/build/start commands each in a
//! fresh container with the repository mounted.

use crate::config::DevRunConfig;
use crate::container::{
    run_to_completion, ContainerConfig, ContainerEngine, ContainerResult, RunOutcome,
};
use crate::shutdown::StopSignal;
use image_builder::{ensure_image, EnsureOutcome};
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;
use uuid::Uuid;

/// Which phases to run beyond making sure the image exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DevRunOptions {
    /// Remove and rebuild an existing image
    pub force: bool,
    /// Install packages and build the site
    pub build: bool,
    /// Start the router from the build output
    pub run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevRunReport {
    pub image: EnsureOutcome,
    pub runs: Vec<RunOutcome>,
}

impl DevRunReport {
    pub fn all_succeeded(&self) -> bool {
        self.runs.iter().all(|run| run.exit_code == 0)
    }
}

/// Unique per-invocation container name: `<image>_<8 hex chars>`.
pub fn container_name(image: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", image, &suffix[..8])
}

pub struct Orchestrator<'e, E: ContainerEngine + ?Sized> {
    engine: &'e E,
    config: DevRunConfig,
    host_dir: PathBuf,
}

impl<'e, E: ContainerEngine + ?Sized> Orchestrator<'e, E> {
    /// `host_dir` is mounted as-is, so pass an absolute path.
    pub fn new(engine: &'e E, config: DevRunConfig, host_dir: PathBuf) -> Self {
        Self {
            engine,
            config,
            host_dir,
        }
    }

    pub fn config(&self) -> &DevRunConfig {
        &self.config
    }

    /// Container settings for one command run from `working_dir`.
    pub fn container_config(&self, command: &[String], working_dir: &str) -> ContainerConfig {
        let image = &self.config.image.tag;
        ContainerConfig::new(image.clone(), container_name(image), command.to_vec())
            .with_port_mapping(self.config.port, self.config.port)
            .with_volume(self.host_dir.clone(), self.config.workspace_path.clone())
            .with_working_dir(working_dir)
    }

    pub async fn execute<W>(
        &self,
        options: DevRunOptions,
        out: &mut W,
        stop: &mut StopSignal,
    ) -> ContainerResult<DevRunReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let image = ensure_image(self.engine, &self.config.image, options.force).await?;
        if !image.did_build() {
            info!("Using existing image {}", self.config.image.tag);
        }

        let mut runs = Vec::new();
        let workspace = self.config.workspace_path.clone();

        if options.build {
            runs.push(
                self.run_phase(
                    "Updating packages...",
                    &self.config.install_command,
                    &workspace,
                    out,
                    stop,
                )
                .await?,
            );
            runs.push(
                self.run_phase(
                    "Building...",
                    &self.config.build_command,
                    &workspace,
                    out,
                    stop,
                )
                .await?,
            );
        }

        if options.run {
            runs.push(
                self.run_phase(
                    "Running...",
                    &self.config.start_command,
                    &self.config.start_dir(),
                    out,
                    stop,
                )
                .await?,
            );
        }

        Ok(DevRunReport { image, runs })
    }

    async fn run_phase<W>(
        &self,
        banner: &str,
        command: &[String],
        working_dir: &str,
        out: &mut W,
        stop: &mut StopSignal,
    ) -> ContainerResult<RunOutcome>
    where
        W: AsyncWrite + Unpin + Send,
    {
        write_line(out, banner).await?;
        let config = self.container_config(command, working_dir);
        let outcome = run_to_completion(self.engine, &config, out, stop).await?;
        write_line(out, "Done...").await?;
        Ok(outcome)
    }
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_format() {
        let name = container_name("afterglow_log_demo_dev");
        let suffix = name.strip_prefix("afterglow_log_demo_dev_").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_container_names_are_unique() {
        let a = container_name("img");
        let b = container_name("img");
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_options_only_ensure_image() {
        let options = DevRunOptions::default();
        assert!(!options.force && !options.build && !options.run);
    }
}
