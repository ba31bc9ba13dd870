//! Error types for the log collection core.

use thiserror::Error;

/// Errors that can occur while collecting or storing log lines.
#[derive(Debug, Error)]
pub enum LogError {
    /// The backing region could not be allocated.
    #[error("failed to allocate log buffer of {0} bytes")]
    Allocation(usize),

    /// The requested capacity cannot hold even a single record.
    #[error("invalid log buffer capacity: {0} bytes")]
    InvalidCapacity(usize),

    /// A record does not fit into the region at all.
    #[error("record of {size} bytes exceeds log buffer capacity of {capacity} bytes")]
    RecordTooLarge {
        /// Footprint of the rejected record.
        size: usize,
        /// Capacity of the region.
        capacity: usize,
    },

    /// A line grammar failed to compile.
    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for log operations.
pub type Result<T> = std::result::Result<T, LogError>;
