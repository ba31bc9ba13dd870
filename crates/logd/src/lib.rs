//! logd - syslog daemon for small systems
//!
//! Collects lines from the user-space log socket and the kernel log into a
//! fixed-size in-memory store.

pub mod config;
pub mod daemon;
pub mod error;

pub use config::{DaemonConfig, Overrides};
pub use daemon::Daemon;
pub use error::{DaemonError, Result};
