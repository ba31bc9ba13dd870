//! Error types for the daemon.

use thiserror::Error;

/// Errors that can occur while running the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Log source could not be opened.
    #[error("failed to open {source_name} at {path}: {error}")]
    Source {
        /// Which source failed.
        source_name: &'static str,
        /// Path of the source.
        path: String,
        /// Underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Collector error.
    #[error(transparent)]
    Core(#[from] logd_core::LogError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;
