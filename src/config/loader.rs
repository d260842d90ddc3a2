//! Configuration file loader.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::RunnerConfig;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = ".claude-runner.toml";

/// Where the loader looks for its file.
#[derive(Debug, Clone)]
enum Source {
    /// Try each path in order; none existing means defaults.
    Search(Vec<PathBuf>),
    /// A file the user named. It must exist.
    Explicit(PathBuf),
}

/// Loads `RunnerConfig` from TOML.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    source: Source,
}

impl ConfigLoader {
    /// Search `./.claude-runner.toml`, then `<config_dir>/claude-runner/config.toml`.
    #[must_use]
    pub fn new() -> Self {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("claude-runner").join("config.toml"));
        }
        Self::searching(paths)
    }

    /// Load exactly this file. A missing file is an error.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            source: Source::Explicit(path),
        }
    }

    fn searching(paths: Vec<PathBuf>) -> Self {
        Self {
            source: Source::Search(paths),
        }
    }

    /// Load the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an explicitly named file cannot be read, or if
    /// any file found cannot be read or parsed.
    pub fn load(&self) -> Result<RunnerConfig, ConfigError> {
        match &self.source {
            Source::Explicit(path) => {
                let content = read(path)?;
                tracing::debug!(path = %path.display(), "Loaded config file");
                parse(path, &content)
            }
            Source::Search(paths) => {
                for path in paths {
                    match read(path) {
                        Ok(content) => {
                            tracing::debug!(path = %path.display(), "Loaded config file");
                            return parse(path, &content);
                        }
                        Err(ConfigError::ReadError { ref source, .. })
                            if source.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                }
                tracing::debug!(searched = paths.len(), "No config file found, using defaults");
                Ok(RunnerConfig::default())
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

fn parse(path: &Path, content: &str) -> Result<RunnerConfig, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}
