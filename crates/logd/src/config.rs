//! Daemon configuration.
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! log_size = 16384
//! socket_path = "/dev/log"
//! kmsg_path = "/proc/kmsg"
//!
//! [trace]
//! enabled = true
//!
//! [trace.rings.kernel]
//! entries = 256
//! size = 16384
//! ```

use std::path::{Path, PathBuf};

use logd_core::{CollectorConfig, DEFAULT_CAPACITY, MIN_CAPACITY, SinkKind, TraceConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DaemonError, Result};

/// Default path of the user-space log socket.
pub const DEFAULT_SOCKET_PATH: &str = "/dev/log";

/// Default path of the kernel log stream.
pub const DEFAULT_KMSG_PATH: &str = "/proc/kmsg";

/// Trace ring settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TraceSection {
    /// Master switch for all rings.
    pub enabled: bool,
    /// Per-ring settings by name.
    pub rings: TraceConfig,
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            enabled: true,
            rings: TraceConfig::default(),
        }
    }
}

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Capacity of the log store in bytes.
    pub log_size: usize,
    /// Path of the user-space log socket.
    pub socket_path: PathBuf,
    /// Path of the kernel log stream.
    pub kmsg_path: PathBuf,
    /// Trace ring configuration.
    pub trace: TraceSection,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_size: DEFAULT_CAPACITY,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            kmsg_path: PathBuf::from(DEFAULT_KMSG_PATH),
            trace: TraceSection::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DaemonError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DaemonError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DaemonError::Config(format!("failed to serialize config: {e}")))
    }

    /// Write the configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// Unknown trace ring names are accepted with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.log_size < MIN_CAPACITY {
            return Err(DaemonError::Config(format!(
                "log_size must be at least {MIN_CAPACITY} bytes"
            )));
        }

        if self.socket_path.as_os_str().is_empty() {
            return Err(DaemonError::Config(
                "socket_path cannot be empty".to_string(),
            ));
        }

        if self.kmsg_path.as_os_str().is_empty() {
            return Err(DaemonError::Config("kmsg_path cannot be empty".to_string()));
        }

        for name in self.trace.rings.rings.keys() {
            if SinkKind::from_name(name).is_none() {
                warn!(ring = %name, "unknown trace ring in configuration");
            }
        }

        Ok(())
    }

    /// Returns the collector settings derived from this configuration.
    #[must_use]
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            capacity: self.log_size,
            trace_enabled: self.trace.enabled,
            trace: self.trace.rings.clone(),
            ..CollectorConfig::default()
        }
    }
}

/// Command-line values that take precedence over the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Store capacity in bytes.
    pub log_size: Option<usize>,
    /// User-space log socket path.
    pub socket_path: Option<PathBuf>,
    /// Kernel log stream path.
    pub kmsg_path: Option<PathBuf>,
}

impl Overrides {
    /// Applies the overrides and re-validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the overridden configuration is invalid.
    pub fn apply(&self, mut config: DaemonConfig) -> Result<DaemonConfig> {
        if let Some(log_size) = self.log_size {
            config.log_size = log_size;
        }
        if let Some(path) = &self.socket_path {
            config.socket_path.clone_from(path);
        }
        if let Some(path) = &self.kmsg_path {
            config.kmsg_path.clone_from(path);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Loads the configuration file, if any, and applies the overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the result is invalid.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<DaemonConfig> {
    let config = match path {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    overrides.apply(config)
}
