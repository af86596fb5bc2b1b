//! Configuration file parsing.
//!
//! Every section and key is optional; command-line flags and `COMPONENTIZE_*`
//! environment variables take precedence over the file.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "componentize.toml";

/// CLI configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where the WIT sources live and which world to target.
    pub wit: WitConfig,
    /// Adapter modules used by `link`.
    pub link: LinkConfig,
    /// Where linked components are written.
    pub output: OutputConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// WIT source settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct WitConfig {
    /// WIT files or directories.
    pub paths: Vec<PathBuf>,
    /// World name, plain or `ns:pkg/world`.
    pub world: Option<String>,
    /// Enabled `@unstable` features.
    pub features: Vec<String>,
    pub all_features: bool,
}

/// Link settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Adapter module per core import module name, e.g.
    /// `wasi_snapshot_preview1 = "wasi_snapshot_preview1.reactor.wasm"`.
    pub adapters: BTreeMap<String, PathBuf>,
}

/// Output settings for `link`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Output file; defaults to `<module-stem>.component.wasm` beside the module.
    pub path: Option<PathBuf>,
    /// Validate the component before writing it.
    pub validate: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: None,
            validate: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive such as `info` or `componentize=debug`. Falls back
    /// to `RUST_LOG`, then to `warn`.
    pub level: Option<String>,
    pub format: LogFormat,
    /// `stderr`, `stdout` or a file path to append to.
    pub output: String,
    /// Colored output when writing to a terminal.
    pub color: bool,
    /// Include the event target.
    pub target: bool,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::Text,
            output: "stderr".to_string(),
            color: true,
            target: false,
            timestamps: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Relative paths inside the file
    /// are taken relative to the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = content.parse()?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            config.rebase(dir);
        }
        Ok(config)
    }

    /// Load `path` if given, else [`DEFAULT_CONFIG_FILE`] if it exists,
    /// else the defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::from_file(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    fn rebase(&mut self, dir: &Path) {
        for path in &mut self.wit.paths {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
        for path in self.link.adapters.values_mut() {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
        if let Some(path) = self.output.path.as_mut().filter(|p| p.is_relative()) {
            *path = dir.join(&*path);
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}
