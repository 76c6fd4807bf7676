use crate::shutdown::StopSignal;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use image_builder::{ImageBuilderError, ImageBuilderResult, ImageStore};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Container runtime types supported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRuntime {
    /// Podman container runtime
    Podman,
    /// Docker container runtime
    Docker,
    /// No container runtime available
    None,
}

impl ContainerRuntime {
    /// Get the command name for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            ContainerRuntime::Podman => "podman",
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::None => "",
        }
    }

    /// Check if this runtime is available
    pub fn is_available(&self) -> bool {
        matches!(self, ContainerRuntime::Podman | ContainerRuntime::Docker)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "podman" => Some(ContainerRuntime::Podman),
            "docker" => Some(ContainerRuntime::Docker),
            _ => None,
        }
    }
}

/// Container operation errors
#[derive(Error, Debug)]
pub enum ContainerError {
    /// No container runtime is available
    #[error("No container runtime available. Please install Docker or Podman.")]
    NoRuntimeAvailable,

    /// Container failed to start
    #[error("Failed to start container '{name}': {reason}")]
    ContainerStartFailed { name: String, reason: String },

    /// Reading the container's output failed
    #[error("Log stream of container '{name}' failed: {reason}")]
    LogStreamFailed { name: String, reason: String },

    /// Killing the container failed
    #[error("Failed to kill container '{name}': {reason}")]
    KillFailed { name: String, reason: String },

    /// Command execution failed
    #[error("Command execution failed: {command}")]
    CommandFailed { command: String },

    /// Run was interrupted; the container has been killed
    #[error("Interrupted while running container '{name}'")]
    Interrupted { name: String },

    /// Image provisioning failed
    #[error("Image error: {0}")]
    Image(#[from] ImageBuilderError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ContainerResult<T> = Result<T, ContainerError>;

/// Parameters of one container instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Image to instantiate
    pub image: String,
    /// Container name for the instance
    pub name: String,
    /// Command run inside the container
    pub command: Vec<String>,
    /// Working directory inside the container
    pub working_dir: Option<String>,
    /// Port mapping (host_port, container_port)
    pub port_mapping: Option<(u16, u16)>,
    /// Volume mapping (host_path, container_path)
    pub volume: Option<(PathBuf, String)>,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>, name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            command,
            working_dir: None,
            port_mapping: None,
            volume: None,
        }
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<String>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    pub fn with_port_mapping(mut self, host_port: u16, container_port: u16) -> Self {
        self.port_mapping = Some((host_port, container_port));
        self
    }

    pub fn with_volume(
        mut self,
        host_path: impl Into<PathBuf>,
        container_path: impl Into<String>,
    ) -> Self {
        self.volume = Some((host_path.into(), container_path.into()));
        self
    }

    /// Arguments for a detached `run`.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];

        if let Some((host_port, container_port)) = self.port_mapping {
            args.push("-p".to_string());
            args.push(format!("{}:{}", host_port, container_port));
        }

        if let Some((host_path, container_path)) = &self.volume {
            args.push("-v".to_string());
            args.push(format!("{}:{}", host_path.display(), container_path));
        }

        if let Some(working_dir) = &self.working_dir {
            args.push("-w".to_string());
            args.push(working_dir.clone());
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// Which output stream a log chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub source: LogSource,
    pub data: Vec<u8>,
}

/// Combined stdout/stderr of a container, ending when the container's log stream ends.
pub type LogStream = BoxStream<'static, ContainerResult<LogChunk>>;

/// Container runtime operations used by the orchestrator.
#[async_trait]
pub trait ContainerEngine: ImageStore {
    /// Start a detached container and return its id.
    async fn run_detached(&self, config: &ContainerConfig) -> ContainerResult<String>;

    async fn logs(&self, id: &str) -> ContainerResult<LogStream>;

    /// Wait for the container to exit and return its exit code.
    async fn wait(&self, id: &str) -> ContainerResult<i64>;

    async fn kill(&self, id: &str) -> ContainerResult<()>;

    /// Best-effort synchronous kill, usable from `Drop`.
    fn kill_now(&self, id: &str);
}

/// Outcome of one command run in its own container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub container: String,
    pub command: Vec<String>,
    pub exit_code: i64,
}

/// Handle for a running container; kills it on drop unless released.
pub struct ContainerHandle<'e, E: ContainerEngine + ?Sized> {
    engine: &'e E,
    /// Container id reported by the runtime
    pub id: String,
    /// Container name
    pub name: String,
    /// Whether the container needs cleanup
    pub needs_cleanup: bool,
}

impl<'e, E: ContainerEngine + ?Sized> ContainerHandle<'e, E> {
    pub fn new(engine: &'e E, id: String, name: String) -> Self {
        Self {
            engine,
            id,
            name,
            needs_cleanup: true,
        }
    }

    /// Kill the container. Failures are logged, never returned, so the
    /// caller's original error is what propagates.
    pub async fn kill(mut self) {
        self.needs_cleanup = false;
        match self.engine.kill(&self.id).await {
            Ok(()) => warn!("Killed container {}", self.name),
            Err(e) => warn!("Could not kill container {}: {}", self.name, e),
        }
    }

    /// The container finished on its own; nothing left to clean up.
    pub fn release(mut self) {
        self.needs_cleanup = false;
    }
}

impl<E: ContainerEngine + ?Sized> Drop for ContainerHandle<'_, E> {
    fn drop(&mut self) {
        if self.needs_cleanup {
            self.engine.kill_now(&self.id);
        }
    }
}

/// Run one container to completion, streaming its combined output into `out`.
///
/// On interruption or any error while streaming, the container is killed
/// before the error is returned.
pub async fn run_to_completion<E, W>(
    engine: &E,
    config: &ContainerConfig,
    out: &mut W,
    stop: &mut StopSignal,
) -> ContainerResult<RunOutcome>
where
    E: ContainerEngine + ?Sized,
    W: AsyncWrite + Unpin + Send,
{
    if stop.is_stopped() {
        return Err(ContainerError::Interrupted {
            name: config.name.clone(),
        });
    }

    let id = engine.run_detached(config).await?;
    info!("Started container {} ({})", config.name, short_id(&id));
    let handle = ContainerHandle::new(engine, id, config.name.clone());

    if let Err(e) = forward_logs(engine, &handle, out, stop).await {
        handle.kill().await;
        return Err(e);
    }

    let exit_code = match engine.wait(&handle.id).await {
        Ok(code) => code,
        Err(e) => {
            handle.kill().await;
            return Err(e);
        }
    };
    handle.release();

    if exit_code != 0 {
        warn!(
            "Container {} exited with status {}: {}",
            config.name,
            exit_code,
            config.command.join(" ")
        );
    }

    Ok(RunOutcome {
        container: config.name.clone(),
        command: config.command.clone(),
        exit_code,
    })
}

async fn forward_logs<E, W>(
    engine: &E,
    handle: &ContainerHandle<'_, E>,
    out: &mut W,
    stop: &mut StopSignal,
) -> ContainerResult<()>
where
    E: ContainerEngine + ?Sized,
    W: AsyncWrite + Unpin + Send,
{
    let mut logs = engine.logs(&handle.id).await?;

    loop {
        tokio::select! {
            biased;
            _ = stop.stopped() => {
                return Err(ContainerError::Interrupted {
                    name: handle.name.clone(),
                });
            }
            chunk = logs.next() => match chunk {
                Some(Ok(chunk)) => {
                    out.write_all(&chunk.data).await?;
                    out.flush().await?;
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            },
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Detect available container runtime in order of preference
pub fn detect_runtime() -> ContainerRuntime {
    // Try Podman first (often better for rootless containers)
    if std::process::Command::new("podman")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
    {
        return ContainerRuntime::Podman;
    }

    // Fall back to Docker
    if std::process::Command::new("docker")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
    {
        return ContainerRuntime::Docker;
    }

    ContainerRuntime::None
}

/// Engine driving the `docker`/`podman` command line.
#[derive(Debug, Clone)]
pub struct CliEngine {
    runtime: ContainerRuntime,
}

impl CliEngine {
    pub fn new(runtime: ContainerRuntime) -> ContainerResult<Self> {
        if !runtime.is_available() {
            return Err(ContainerError::NoRuntimeAvailable);
        }
        Ok(Self { runtime })
    }

    pub fn detect() -> ContainerResult<Self> {
        Self::new(detect_runtime())
    }

    pub fn runtime(&self) -> &ContainerRuntime {
        &self.runtime
    }

    fn command(&self) -> Command {
        Command::new(self.runtime.command())
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.runtime.command(), args.join(" "))
    }
}

#[async_trait]
impl ImageStore for CliEngine {
    async fn image_exists(&self, tag: &str) -> ImageBuilderResult<bool> {
        let status = self
            .command()
            .args(["image", "inspect", tag])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                ImageBuilderError::StoreUnavailable(format!(
                    "{}: {}",
                    self.describe(&["image", "inspect", tag]),
                    e
                ))
            })?;

        Ok(status.success())
    }

    async fn build_image(&self, tag: &str, context_path: &Path) -> ImageBuilderResult<()> {
        let output = self
            .command()
            .args(["build", "-t", tag])
            .arg(context_path)
            .output()
            .await
            .map_err(|e| ImageBuilderError::BuildFailed {
                tag: tag.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ImageBuilderError::BuildFailed {
                tag: tag.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> ImageBuilderResult<()> {
        let output = self
            .command()
            .args(["rmi", "-f", tag])
            .output()
            .await
            .map_err(|e| ImageBuilderError::RemoveFailed {
                tag: tag.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ImageBuilderError::RemoveFailed {
                tag: tag.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for CliEngine {
    async fn run_detached(&self, config: &ContainerConfig) -> ContainerResult<String> {
        let args = config.run_args();
        debug!("{} {}", self.runtime.command(), args.join(" "));

        let output = self.command().args(&args).output().await.map_err(|e| {
            ContainerError::ContainerStartFailed {
                name: config.name.clone(),
                reason: e.to_string(),
            }
        })?;

        if !output.status.success() {
            return Err(ContainerError::ContainerStartFailed {
                name: config.name.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(ContainerError::ContainerStartFailed {
                name: config.name.clone(),
                reason: "runtime returned no container id".to_string(),
            });
        }
        Ok(id)
    }

    async fn logs(&self, id: &str) -> ContainerResult<LogStream> {
        let mut child = self
            .command()
            .args(["logs", "--follow", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|_| ContainerError::CommandFailed {
                command: self.describe(&["logs", "--follow", id]),
            })?;

        let follower = LogFollower {
            name: id.to_string(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
        };

        let stream = futures::stream::unfold(follower, |mut follower| async move {
            follower
                .next_chunk()
                .await
                .map(|chunk| (chunk, follower))
        });
        Ok(stream.boxed())
    }

    async fn wait(&self, id: &str) -> ContainerResult<i64> {
        let output = self
            .command()
            .args(["wait", id])
            .output()
            .await
            .map_err(|_| ContainerError::CommandFailed {
                command: self.describe(&["wait", id]),
            })?;

        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                command: self.describe(&["wait", id]),
            });
        }

        parse_exit_code(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ContainerError::CommandFailed {
                command: self.describe(&["wait", id]),
            }
        })
    }

    async fn kill(&self, id: &str) -> ContainerResult<()> {
        let output = self
            .command()
            .args(["kill", id])
            .output()
            .await
            .map_err(|e| ContainerError::KillFailed {
                name: id.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ContainerError::KillFailed {
                name: id.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    fn kill_now(&self, id: &str) {
        let _ = std::process::Command::new(self.runtime.command())
            .args(["kill", id])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// `wait` prints the exit code on the last non-empty line.
fn parse_exit_code(output: &str) -> Option<i64> {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.trim().parse().ok())
}

/// Follows `logs --follow`, multiplexing stdout and stderr in arrival order.
struct LogFollower {
    name: String,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl LogFollower {
    async fn next_chunk(&mut self) -> Option<ContainerResult<LogChunk>> {
        let mut out_buf = [0u8; 4096];
        let mut err_buf = [0u8; 4096];

        loop {
            if self.stdout.is_none() && self.stderr.is_none() {
                return self.finish().await;
            }

            let (source, read) = tokio::select! {
                read = read_some(&mut self.stdout, &mut out_buf) => (LogSource::Stdout, read),
                read = read_some(&mut self.stderr, &mut err_buf) => (LogSource::Stderr, read),
            };

            match read {
                Ok(0) => match source {
                    LogSource::Stdout => self.stdout = None,
                    LogSource::Stderr => self.stderr = None,
                },
                Ok(n) => {
                    let data = match source {
                        LogSource::Stdout => out_buf[..n].to_vec(),
                        LogSource::Stderr => err_buf[..n].to_vec(),
                    };
                    return Some(Ok(LogChunk { source, data }));
                }
                Err(e) => {
                    return Some(Err(ContainerError::LogStreamFailed {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    }))
                }
            }
        }
    }

    /// Both pipes hit EOF; reap the log process once.
    async fn finish(&mut self) -> Option<ContainerResult<LogChunk>> {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => status,
            _ => match self.child.wait().await {
                Ok(status) => status,
                Err(e) => {
                    return Some(Err(ContainerError::LogStreamFailed {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    }))
                }
            },
        };

        if status.success() {
            None
        } else {
            Some(Err(ContainerError::LogStreamFailed {
                name: self.name.clone(),
                reason: format!("log follower exited with {}", status),
            }))
        }
    }
}

async fn read_some<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}
