//! Core types for the log collection core.
//!
//! This module provides:
//! - [`LogId`] — Process-lifetime unique record identifier
//! - [`LogSource`] — Where a line was read from
//! - [`Priority`] — Syslog facility/severity pair
//! - [`LogRecord`] — A record as seen by consumers

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a log record.
///
/// Ids increase monotonically and are never reused, even after eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId(pub u64);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// The user-space datagram log socket
    Syslog = 0,
    /// The kernel ring-log stream
    Kernel = 1,
}

impl LogSource {
    /// Returns the string representation of this source.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Syslog => "syslog",
            Self::Kernel => "kernel",
        }
    }

    /// Returns the tag stored in a record header.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Decodes a header tag. Unknown tags map to [`LogSource::Syslog`].
    #[must_use]
    pub const fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Self::Kernel,
            _ => Self::Syslog,
        }
    }
}

/// Syslog facility codes used by the collector.
pub struct Facility;

impl Facility {
    /// Kernel messages.
    pub const KERN: u32 = 0;
    /// Generic user-level messages.
    pub const USER: u32 = 1;
    /// System daemons.
    pub const DAEMON: u32 = 3;
    /// Local use 7, reserved for debug traffic.
    pub const LOCAL7: u32 = 23;
    /// Facility whose records never enter the main store.
    pub const DEBUG: u32 = Self::LOCAL7;
}

/// Encoded syslog priority (`facility * 8 + severity`).
///
/// A line without a priority token carries `Priority(0)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Priority(pub u32);

impl Priority {
    /// Builds a priority from its facility and severity.
    #[must_use]
    pub const fn from_parts(facility: u32, severity: u32) -> Self {
        Self((facility << 3) | (severity & 7))
    }

    /// Returns the facility code.
    #[must_use]
    pub const fn facility(self) -> u32 {
        self.0 >> 3
    }

    /// Returns the severity (0 = emergency, 7 = debug).
    #[must_use]
    pub const fn severity(self) -> u32 {
        self.0 & 7
    }

    /// Returns true if this priority belongs to the debug facility.
    #[must_use]
    pub const fn is_debug_facility(self) -> bool {
        self.facility() == Facility::DEBUG
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A log record retained by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Unique identifier for this record
    pub id: LogId,
    /// Encoded facility and severity
    pub priority: Priority,
    /// Where the line came from
    pub source: LogSource,
    /// Wall-clock time sampled at insertion
    pub timestamp: DateTime<Utc>,
    /// Payload bytes, without the terminator
    pub data: Vec<u8>,
}

impl LogRecord {
    /// Returns the stored size of the payload, terminator included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len() + 1
    }

    /// Returns the payload as text.
    #[must_use]
    pub fn message(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}
