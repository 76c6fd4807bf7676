use crate::container::ContainerRuntime;
use image_builder::ImageBuildConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings of the dev build runner. Every field has the dev machine's default,
/// so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevRunConfig {
    /// `docker` or `podman`; detected when unset
    pub runtime: Option<String>,
    pub image: ImageBuildConfig,
    /// Repository directory mounted into every container. When unset, the
    /// nearest ancestor of the working directory holding the build context.
    pub host_dir: Option<PathBuf>,
    pub workspace_path: String,
    /// Published on the same port number on both sides
    pub port: u16,
    pub install_command: Vec<String>,
    pub build_command: Vec<String>,
    pub start_command: Vec<String>,
    /// Directory below the workspace the start command runs in
    pub start_subdir: String,
}

fn words(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

impl Default for DevRunConfig {
    fn default() -> Self {
        Self {
            runtime: None,
            image: ImageBuildConfig::default(),
            host_dir: None,
            workspace_path: "/workspace".to_string(),
            port: 7777,
            install_command: words("unbuffer npm install"),
            build_command: words("unbuffer npm run build"),
            start_command: words("unbuffer crossbar start"),
            start_subdir: "dist".to_string(),
        }
    }
}

impl DevRunConfig {
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    pub fn with_host_dir(mut self, host_dir: impl Into<PathBuf>) -> Self {
        self.host_dir = Some(host_dir.into());
        self
    }

    /// Explicitly configured runtime, if any.
    pub fn container_runtime(&self) -> ConfigResult<Option<ContainerRuntime>> {
        match &self.runtime {
            None => Ok(None),
            Some(name) => ContainerRuntime::from_name(name)
                .map(Some)
                .ok_or_else(|| ConfigError::Invalid {
                    message: format!("Unknown container runtime '{}'", name),
                }),
        }
    }

    /// Working directory of the start command.
    pub fn start_dir(&self) -> String {
        let root = self.workspace_path.trim_end_matches('/');
        if self.start_subdir.is_empty() {
            return self.workspace_path.clone();
        }
        format!("{}/{}", root, self.start_subdir.trim_matches('/'))
    }

    /// Absolute repository directory; volume mounts need absolute paths.
    pub fn resolved_host_dir(&self) -> ConfigResult<PathBuf> {
        let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
            path: ".".to_string(),
            source,
        })?;
        self.host_dir_from(&cwd)
    }

    /// Like [`resolved_host_dir`](Self::resolved_host_dir), searching upwards from `start`.
    pub fn host_dir_from(&self, start: &Path) -> ConfigResult<PathBuf> {
        let canonical = |path: &Path| {
            std::fs::canonicalize(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
        };

        if let Some(host_dir) = &self.host_dir {
            return canonical(start.join(host_dir).as_path());
        }

        let start = canonical(start)?;
        start
            .ancestors()
            .find(|dir| dir.join(&self.image.context_path).is_dir())
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::Invalid {
                message: format!(
                    "No directory above {} contains the build context '{}'",
                    start.display(),
                    self.image.context_path.display()
                ),
            })
    }

    /// Anchor a relative build context at the repository root.
    pub fn with_context_under(mut self, root: &Path) -> Self {
        if self.image.context_path.is_relative() {
            self.image.context_path = root.join(&self.image.context_path);
        }
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };

        self.container_runtime()?;

        if self.image.tag.trim().is_empty() {
            return invalid("Image tag cannot be empty");
        }

        if !self.workspace_path.starts_with('/') {
            return invalid("Workspace path must be absolute");
        }

        if self.port == 0 {
            return invalid("Port must be greater than 0");
        }

        if self.install_command.is_empty()
            || self.build_command.is_empty()
            || self.start_command.is_empty()
        {
            return invalid("Install, build and start commands cannot be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DevRunConfig::default();
        assert_eq!(config.image.tag, "afterglow_log_demo_dev");
        assert_eq!(config.workspace_path, "/workspace");
        assert_eq!(config.port, 7777);
        assert_eq!(config.install_command, vec!["unbuffer", "npm", "install"]);
        assert_eq!(config.build_command, vec!["unbuffer", "npm", "run", "build"]);
        assert_eq!(config.start_command, vec!["unbuffer", "crossbar", "start"]);
        assert_eq!(config.start_dir(), "/workspace/dist");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DevRunConfig::from_toml_str(
            r#"
            runtime = "podman"
            port = 8080

            [image]
            tag = "afterglow_custom"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.container_runtime().unwrap(),
            Some(ContainerRuntime::Podman)
        );
        assert_eq!(config.port, 8080);
        assert_eq!(config.image.tag, "afterglow_custom");
        assert_eq!(
            config.image.context_path,
            PathBuf::from("build/afterglow-log-demo-dev-machine")
        );
        assert_eq!(config.start_command, vec!["unbuffer", "crossbar", "start"]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = DevRunConfig::default().with_runtime("lxc");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));

        config.runtime = None;
        config.workspace_path = "workspace".to_string();
        assert!(config.validate().is_err());

        config.workspace_path = "/workspace".to_string();
        config.port = 0;
        assert!(config.validate().is_err());

        config.port = 7777;
        config.start_command.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let result = DevRunConfig::from_toml_str("port = \"not a number\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "start_subdir = \"site\"").unwrap();
        writeln!(file, "workspace_path = \"/srv/app/\"").unwrap();

        let config = DevRunConfig::load(file.path()).unwrap();
        assert_eq!(config.start_dir(), "/srv/app/site");
    }

    #[test]
    fn test_load_missing_file() {
        let result = DevRunConfig::load(Path::new("/nonexistent/afterglow.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_explicit_host_dir_is_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let config = DevRunConfig::default().with_host_dir(dir.path());
        let resolved = config.resolved_host_dir().unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_host_dir_found_from_subdirectory() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join("build/afterglow-log-demo-dev-machine")).unwrap();
        let nested = repo.path().join("src/js");
        std::fs::create_dir_all(&nested).unwrap();

        let config = DevRunConfig::default();
        let root = std::fs::canonicalize(repo.path()).unwrap();
        assert_eq!(config.host_dir_from(&nested).unwrap(), root);
        assert_eq!(config.host_dir_from(repo.path()).unwrap(), root);

        let config = config.with_context_under(&root);
        assert_eq!(
            config.image.context_path,
            root.join("build/afterglow-log-demo-dev-machine")
        );
    }

    #[test]
    fn test_host_dir_without_build_context() {
        let dir = tempfile::tempdir().unwrap();
        let result = DevRunConfig::default().host_dir_from(dir.path());
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
