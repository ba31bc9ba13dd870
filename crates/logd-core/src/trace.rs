//! Per-category diagnostic trace rings.
//!
//! Every accepted line is forwarded to one of three bounded rings before it
//! reaches the main store:
//! - `kernel` receives kernel lines, with the boot-relative prefix removed
//! - `debug` receives debug-facility lines, which the store never retains
//! - `syslog` receives everything else
//!
//! The rings are configured from a JSON blob mapping ring names to
//! [`RingConfig`] objects.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::traits::TraceSink;
use crate::types::{LogSource, Priority};

/// Default number of entries kept per ring.
pub const DEFAULT_RING_ENTRIES: usize = 1024;

/// Default number of rendered bytes kept per ring.
pub const DEFAULT_RING_SIZE: usize = 64 * 1024;

/// The three trace categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Kernel lines
    Kernel,
    /// User-space lines outside the debug facility
    Syslog,
    /// Debug-facility lines
    Debug,
}

impl SinkKind {
    /// All kinds, in routing order.
    pub const ALL: [Self; 3] = [Self::Kernel, Self::Syslog, Self::Debug];

    /// Returns the configuration name of this kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::Syslog => "syslog",
            Self::Debug => "debug",
        }
    }

    /// Looks a kind up by its configuration name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Picks the ring a line is forwarded to.
    ///
    /// Kernel lines always go to the kernel ring, even when they carry the
    /// debug facility.
    #[must_use]
    pub const fn route(source: LogSource, priority: Priority) -> Self {
        match source {
            LogSource::Kernel => Self::Kernel,
            LogSource::Syslog if priority.is_debug_facility() => Self::Debug,
            LogSource::Syslog => Self::Syslog,
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings for a single ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Whether the ring accepts entries.
    pub enabled: bool,
    /// Maximum number of entries kept.
    pub entries: usize,
    /// Maximum number of rendered bytes kept.
    pub size: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entries: DEFAULT_RING_ENTRIES,
            size: DEFAULT_RING_SIZE,
        }
    }
}

/// Trace configuration, keyed by ring name.
///
/// ```json
/// { "kernel": { "enabled": true, "entries": 256, "size": 16384 },
///   "debug": { "enabled": false } }
/// ```
///
/// Rings that are not mentioned use [`RingConfig::default`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceConfig {
    /// Ring settings by name.
    pub rings: BTreeMap<String, RingConfig>,
}

impl TraceConfig {
    /// Parses a JSON configuration blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is not a valid configuration object.
    pub fn from_json(blob: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(blob)?)
    }

    /// Sets the configuration of one ring.
    #[must_use]
    pub fn with_ring(mut self, kind: SinkKind, config: RingConfig) -> Self {
        self.rings.insert(kind.name().to_string(), config);
        self
    }

    /// Returns the effective configuration of a ring.
    #[must_use]
    pub fn ring(&self, kind: SinkKind) -> RingConfig {
        self.rings.get(kind.name()).copied().unwrap_or_default()
    }
}

/// One forwarded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// Wall-clock time in microseconds since the Unix epoch
    pub timestamp_us: u64,
    /// Priority of the line
    pub priority: Priority,
    /// Line text
    pub text: Vec<u8>,
}

impl TraceEntry {
    /// Renders the entry as `<priority>text`.
    #[must_use]
    pub fn render(&self) -> Vec<u8> {
        let mut out = format!("<{}>", self.priority).into_bytes();
        out.extend_from_slice(&self.text);
        out
    }

    /// Length of the rendered form.
    #[must_use]
    pub fn rendered_len(&self) -> usize {
        // "<" + digits + ">"
        self.priority.to_string().len() + 2 + self.text.len()
    }
}

/// A bounded ring of trace entries.
///
/// Oldest entries are dropped once either the entry or the byte bound is
/// exceeded.
#[derive(Debug, Clone)]
pub struct TraceRing {
    kind: SinkKind,
    config: RingConfig,
    entries: VecDeque<TraceEntry>,
    bytes: usize,
}

impl TraceRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new(kind: SinkKind, config: RingConfig) -> Self {
        Self {
            kind,
            config,
            entries: VecDeque::new(),
            bytes: 0,
        }
    }

    /// Applies new settings. Disabling a ring discards its contents.
    pub fn configure(&mut self, config: RingConfig) {
        if config != self.config {
            debug!(
                ring = %self.kind,
                enabled = config.enabled,
                entries = config.entries,
                size = config.size,
                "trace ring reconfigured"
            );
        }
        self.config = config;
        if !config.enabled {
            self.entries.clear();
            self.bytes = 0;
        }
        self.shrink_to_bounds();
    }

    /// Returns the kind of this ring.
    #[must_use]
    pub const fn kind(&self) -> SinkKind {
        self.kind
    }

    /// Returns the current settings.
    #[must_use]
    pub const fn config(&self) -> RingConfig {
        self.config
    }

    /// Returns the retained entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    /// Returns the number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the rendered size of all retained entries.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    fn shrink_to_bounds(&mut self) {
        while self.entries.len() > self.config.entries || self.bytes > self.config.size {
            let Some(evicted) = self.entries.pop_front() else {
                break;
            };
            self.bytes -= evicted.rendered_len();
        }
    }
}

impl TraceSink for TraceRing {
    fn append(&mut self, timestamp_us: u64, priority: Priority, text: &[u8]) {
        if !self.config.enabled {
            return;
        }

        let entry = TraceEntry {
            timestamp_us,
            priority,
            text: text.to_vec(),
        };
        let len = entry.rendered_len();
        if len > self.config.size || self.config.entries == 0 {
            debug!(ring = %self.kind, len, "trace entry exceeds ring bounds");
            return;
        }

        self.bytes += len;
        self.entries.push_back(entry);
        self.shrink_to_bounds();
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// The kernel, syslog and debug rings.
#[derive(Debug, Clone)]
pub struct TraceSinks {
    kernel: TraceRing,
    syslog: TraceRing,
    debug: TraceRing,
}

impl Default for TraceSinks {
    fn default() -> Self {
        Self::new(&TraceConfig::default())
    }
}

impl TraceSinks {
    /// Creates the rings from a configuration.
    #[must_use]
    pub fn new(config: &TraceConfig) -> Self {
        Self {
            kernel: TraceRing::new(SinkKind::Kernel, config.ring(SinkKind::Kernel)),
            syslog: TraceRing::new(SinkKind::Syslog, config.ring(SinkKind::Syslog)),
            debug: TraceRing::new(SinkKind::Debug, config.ring(SinkKind::Debug)),
        }
    }

    /// Returns the ring of the given kind.
    #[must_use]
    pub const fn get(&self, kind: SinkKind) -> &TraceRing {
        match kind {
            SinkKind::Kernel => &self.kernel,
            SinkKind::Syslog => &self.syslog,
            SinkKind::Debug => &self.debug,
        }
    }

    /// Returns the ring of the given kind for appending.
    pub fn get_mut(&mut self, kind: SinkKind) -> &mut TraceRing {
        match kind {
            SinkKind::Kernel => &mut self.kernel,
            SinkKind::Syslog => &mut self.syslog,
            SinkKind::Debug => &mut self.debug,
        }
    }

    /// Applies a configuration to all rings.
    ///
    /// With `enabled` false every ring is disabled regardless of the
    /// configuration. Unknown ring names are ignored.
    pub fn apply_config(&mut self, config: &TraceConfig, enabled: bool) {
        for name in config.rings.keys() {
            if SinkKind::from_name(name).is_none() {
                warn!(ring = %name, "ignoring unknown trace ring");
            }
        }

        for kind in SinkKind::ALL {
            let mut ring = config.ring(kind);
            ring.enabled &= enabled;
            self.get_mut(kind).configure(ring);
        }

        info!(enabled, "trace configuration applied");
    }

    /// Parses a JSON blob and applies it, see [`TraceSinks::apply_config`].
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be parsed. The rings are left
    /// untouched in that case.
    pub fn apply_json(&mut self, blob: &[u8], enabled: bool) -> Result<()> {
        let config = TraceConfig::from_json(blob)?;
        self.apply_config(&config, enabled);
        Ok(())
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
#[must_use]
pub fn now_micros() -> u64 {
    u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Facility;
    use test_case::test_case;

    fn texts(ring: &TraceRing) -> Vec<String> {
        ring.entries()
            .map(|e| String::from_utf8_lossy(&e.text).into_owned())
            .collect()
    }

    #[test_case(LogSource::Kernel, Priority(6), SinkKind::Kernel ; "kernel line")]
    #[test_case(LogSource::Kernel, Priority::from_parts(Facility::LOCAL7, 7), SinkKind::Kernel ; "kernel line with debug facility")]
    #[test_case(LogSource::Syslog, Priority::from_parts(Facility::LOCAL7, 3), SinkKind::Debug ; "debug facility")]
    #[test_case(LogSource::Syslog, Priority(134), SinkKind::Syslog ; "user line")]
    #[test_case(LogSource::Syslog, Priority::default(), SinkKind::Syslog ; "no priority")]
    fn routing(source: LogSource, priority: Priority, expected: SinkKind) {
        assert_eq!(SinkKind::route(source, priority), expected);
    }

    #[test]
    fn kind_names() {
        for kind in SinkKind::ALL {
            assert_eq!(SinkKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(SinkKind::from_name("network"), None);
        assert_eq!(SinkKind::Debug.to_string(), "debug");
    }

    #[test]
    fn entry_rendering() {
        let entry = TraceEntry {
            timestamp_us: 1,
            priority: Priority(134),
            text: b"hello".to_vec(),
        };
        assert_eq!(entry.render(), b"<134>hello");
        assert_eq!(entry.rendered_len(), entry.render().len());
    }

    #[test]
    fn ring_drops_oldest_by_count() {
        let mut ring = TraceRing::new(
            SinkKind::Syslog,
            RingConfig {
                entries: 2,
                ..RingConfig::default()
            },
        );
        ring.append(1, Priority(6), b"one");
        ring.append(2, Priority(6), b"two");
        ring.append(3, Priority(6), b"three");

        assert_eq!(texts(&ring), vec!["two", "three"]);
    }

    #[test]
    fn ring_drops_oldest_by_size() {
        // each "<6>abcd" renders to 7 bytes
        let mut ring = TraceRing::new(
            SinkKind::Syslog,
            RingConfig {
                size: 15,
                ..RingConfig::default()
            },
        );
        ring.append(1, Priority(6), b"aaaa");
        ring.append(2, Priority(6), b"bbbb");
        assert_eq!(ring.bytes(), 14);

        ring.append(3, Priority(6), b"cccc");
        assert_eq!(texts(&ring), vec!["bbbb", "cccc"]);
        assert_eq!(ring.bytes(), 14);
    }

    #[test]
    fn ring_skips_entry_larger_than_size() {
        let mut ring = TraceRing::new(
            SinkKind::Kernel,
            RingConfig {
                size: 4,
                ..RingConfig::default()
            },
        );
        ring.append(1, Priority(6), b"too long");
        assert!(ring.is_empty());
    }

    #[test]
    fn disabled_ring_ignores_appends() {
        let mut ring = TraceRing::new(SinkKind::Debug, RingConfig::default());
        ring.append(1, Priority(191), b"kept");
        ring.configure(RingConfig {
            enabled: false,
            ..RingConfig::default()
        });
        assert!(ring.is_empty());
        assert!(!ring.is_enabled());

        ring.append(2, Priority(191), b"dropped");
        assert!(ring.is_empty());
    }

    #[test]
    fn shrinking_config_evicts() {
        let mut ring = TraceRing::new(SinkKind::Syslog, RingConfig::default());
        for i in 0..10u64 {
            ring.append(i, Priority(6), b"x");
        }
        ring.configure(RingConfig {
            entries: 3,
            ..RingConfig::default()
        });
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.entries().next().map(|e| e.timestamp_us), Some(7));
    }

    #[test]
    fn config_from_json() {
        let config = TraceConfig::from_json(
            br#"{"kernel": {"enabled": true, "entries": 16, "size": 512}, "debug": {"enabled": false}}"#,
        )
        .expect("parse");

        assert_eq!(
            config.ring(SinkKind::Kernel),
            RingConfig {
                enabled: true,
                entries: 16,
                size: 512
            }
        );
        assert!(!config.ring(SinkKind::Debug).enabled);
        assert_eq!(config.ring(SinkKind::Debug).entries, DEFAULT_RING_ENTRIES);
        assert_eq!(config.ring(SinkKind::Syslog), RingConfig::default());
    }

    #[test]
    fn config_rejects_malformed_json() {
        assert!(TraceConfig::from_json(b"[1, 2]").is_err());
        assert!(TraceConfig::from_json(br#"{"kernel": {"entries": "many"}}"#).is_err());
    }

    #[test]
    fn apply_config_sets_rings() {
        let mut sinks = TraceSinks::default();
        let config = TraceConfig::default()
            .with_ring(
                SinkKind::Debug,
                RingConfig {
                    enabled: false,
                    ..RingConfig::default()
                },
            )
            .with_ring(
                SinkKind::Kernel,
                RingConfig {
                    entries: 8,
                    ..RingConfig::default()
                },
            );

        sinks.apply_config(&config, true);
        assert!(!sinks.get(SinkKind::Debug).is_enabled());
        assert!(sinks.get(SinkKind::Syslog).is_enabled());
        assert_eq!(sinks.get(SinkKind::Kernel).config().entries, 8);
    }

    #[test]
    fn apply_config_globally_disabled() {
        let mut sinks = TraceSinks::default();
        sinks.get_mut(SinkKind::Syslog).append(1, Priority(6), b"x");

        sinks.apply_config(&TraceConfig::default(), false);
        for kind in SinkKind::ALL {
            assert!(!sinks.get(kind).is_enabled());
            assert!(sinks.get(kind).is_empty());
        }
    }

    #[test]
    fn apply_json_ignores_unknown_rings() {
        let mut sinks = TraceSinks::default();
        sinks
            .apply_json(br#"{"network": {"enabled": false}, "syslog": {"entries": 4}}"#, true)
            .expect("apply");
        assert_eq!(sinks.get(SinkKind::Syslog).config().entries, 4);
        assert!(sinks.get(SinkKind::Kernel).is_enabled());
    }

    #[test]
    fn apply_json_error_leaves_rings_untouched() {
        let mut sinks = TraceSinks::default();
        assert!(sinks.apply_json(b"not json", false).is_err());
        assert!(sinks.get(SinkKind::Kernel).is_enabled());
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_micros() > 1_577_836_800_000_000);
    }
}
