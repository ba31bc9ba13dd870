//! Ingestion pipeline.
//!
//! This module provides:
//! - [`Collector`] — Sanitizes lines, forwards them to the trace rings,
//!   stores them and notifies subscribers
//! - [`CollectorConfig`] — Store and trace settings
//! - [`RecordStream`] — Receives records as they are stored

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::clock::KernelClock;
use crate::error::{LogError, Result};
use crate::parser::{LineParser, ParsedLine};
use crate::store::{Cursor, DEFAULT_CAPACITY, InsertOutcome, Records, RingStore};
use crate::trace::{SinkKind, TraceConfig, TraceSinks, now_micros};
use crate::traits::{ClockSource, TraceSink};
use crate::types::{LogRecord, LogSource};

/// Configuration for a [`Collector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Byte capacity of the record store.
    pub capacity: usize,
    /// Channel capacity for record notifications.
    pub notify_buffer: usize,
    /// Whether the trace rings are enabled at all.
    pub trace_enabled: bool,
    /// Trace ring settings.
    pub trace: TraceConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            notify_buffer: 1024,
            trace_enabled: true,
            trace: TraceConfig::default(),
        }
    }
}

impl CollectorConfig {
    /// Sets the store capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the trace configuration.
    #[must_use]
    pub fn with_trace(mut self, trace: TraceConfig) -> Self {
        self.trace = trace;
        self
    }
}

/// The log collection core.
///
/// A collector is owned by a single task; every operation takes effect
/// before the next one starts.
#[derive(Debug)]
pub struct Collector {
    parser: LineParser,
    clock: KernelClock,
    store: RingStore,
    sinks: TraceSinks,
    notify: broadcast::Sender<LogRecord>,
}

impl Collector {
    /// Creates a collector reading the host clocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store
    /// cannot be allocated.
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        Self::build(config, KernelClock::new())
    }

    /// Creates a collector reading the given clocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store
    /// cannot be allocated.
    pub fn with_clock(config: &CollectorConfig, clock: impl ClockSource + 'static) -> Result<Self> {
        Self::build(config, KernelClock::with_clock(clock))
    }

    fn build(config: &CollectorConfig, clock: KernelClock) -> Result<Self> {
        if config.notify_buffer == 0 {
            return Err(LogError::Config(
                "notify_buffer must be greater than 0".to_string(),
            ));
        }

        let store = RingStore::new(config.capacity)?;
        let mut sinks = TraceSinks::new(&config.trace);
        if !config.trace_enabled {
            sinks.apply_config(&config.trace, false);
        }
        let (notify, _) = broadcast::channel(config.notify_buffer);

        info!(capacity = config.capacity, "log collector started");

        Ok(Self {
            parser: LineParser::new()?,
            clock,
            store,
            sinks,
            notify,
        })
    }

    /// Ingests one raw line.
    ///
    /// The buffer is normalized in place. Returns the stored record, or
    /// `None` if the line belongs to the debug facility and was only
    /// forwarded to the debug ring.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::RecordTooLarge`] if the line cannot fit into the
    /// store. The line has still been forwarded to its trace ring.
    pub fn insert(&mut self, buf: &mut [u8], source: LogSource) -> Result<Option<LogRecord>> {
        let line = self.parser.sanitize(buf, source);
        self.forward(line, source);

        let outcome = self
            .store
            .insert(line.text, line.priority, source)
            .inspect_err(|e| warn!(error = %e, source = source.as_str(), "dropping log line"))?;

        match outcome {
            InsertOutcome::Stored(record) => {
                trace!(id = %record.id, source = source.as_str(), "record stored");
                // No receivers is fine.
                let _ = self.notify.send(record.clone());
                Ok(Some(record))
            }
            InsertOutcome::Filtered => Ok(None),
        }
    }

    /// Ingests one line given as text, see [`Collector::insert`].
    ///
    /// # Errors
    ///
    /// Returns [`LogError::RecordTooLarge`] if the line cannot fit into the
    /// store.
    pub fn insert_line(&mut self, line: &str, source: LogSource) -> Result<Option<LogRecord>> {
        let mut buf = line.as_bytes().to_vec();
        self.insert(&mut buf, source)
    }

    fn forward(&mut self, line: ParsedLine<'_>, source: LogSource) {
        let ring = self.sinks.get_mut(SinkKind::route(source, line.priority));
        if !ring.is_enabled() {
            return;
        }

        let mut text = line.text;
        let mut timestamp_us = 0;
        if source == LogSource::Kernel {
            if let Some(stamp) = self.parser.kernel_stamp(text) {
                timestamp_us = self.clock.correlate(&stamp);
                text = &text[stamp.rest..];
            }
        }
        if timestamp_us == 0 {
            timestamp_us = now_micros();
        }

        ring.append(timestamp_us, line.priority, text);
    }

    /// Returns the next retained record, see [`RingStore::list`].
    #[must_use]
    pub fn list(&self, count: usize, cursor: Option<Cursor>) -> Option<(Cursor, LogRecord)> {
        self.store.list(count, cursor)
    }

    /// Iterates over the retained records, see [`RingStore::records`].
    #[must_use]
    pub fn records(&self, count: usize) -> Records<'_> {
        self.store.records(count)
    }

    /// Changes the store capacity, keeping the most recent records.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity is invalid or cannot be allocated.
    /// The store is left untouched in that case.
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        if capacity == self.store.capacity() {
            return Ok(());
        }

        let before = self.store.len();
        self.store.resize(capacity)?;
        info!(
            capacity,
            kept = self.store.len(),
            dropped = before - self.store.len(),
            "log store resized"
        );
        Ok(())
    }

    /// Reconfigures the trace rings.
    pub fn apply_trace_config(&mut self, config: &TraceConfig, enabled: bool) {
        self.sinks.apply_config(config, enabled);
    }

    /// Reconfigures the trace rings from a JSON blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be parsed.
    pub fn apply_trace_json(&mut self, blob: &[u8], enabled: bool) -> Result<()> {
        self.sinks.apply_json(blob, enabled)
    }

    /// Subscribes to records as they are stored.
    #[must_use]
    pub fn subscribe(&self) -> RecordStream {
        RecordStream::new(self.notify.subscribe())
    }

    /// Returns the record store.
    #[must_use]
    pub const fn store(&self) -> &RingStore {
        &self.store
    }

    /// Returns the trace rings.
    #[must_use]
    pub const fn sinks(&self) -> &TraceSinks {
        &self.sinks
    }

    /// Releases the store and closes all subscriptions.
    pub fn shutdown(self) {
        info!(
            retained = self.store.len(),
            next_id = %self.store.next_id(),
            "log collector stopped"
        );
    }
}

/// Records delivered as they are stored.
pub struct RecordStream {
    receiver: broadcast::Receiver<LogRecord>,
    closed: bool,
}

impl RecordStream {
    const fn new(receiver: broadcast::Receiver<LogRecord>) -> Self {
        Self {
            receiver,
            closed: false,
        }
    }

    /// Closes the stream.
    pub const fn close(&mut self) {
        self.closed = true;
    }

    /// Returns true if the stream is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Receives the next record, or `None` once the collector is gone.
    ///
    /// Records missed by a slow subscriber are skipped.
    pub async fn next(&mut self) -> Option<LogRecord> {
        while !self.closed {
            match self.receiver.recv().await {
                Ok(record) => return Some(record),
                Err(broadcast::error::RecvError::Closed) => self.closed = true,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "subscriber lagged behind");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::RegionLayout;
    use crate::trace::RingConfig;
    use crate::types::{Facility, LogId, Priority};

    struct FixedClock;

    impl ClockSource for FixedClock {
        fn realtime(&self) -> Option<Duration> {
            Some(Duration::from_secs(1_700_000_100))
        }

        fn monotonic(&self) -> Option<Duration> {
            Some(Duration::from_secs(100))
        }
    }

    fn collector() -> Collector {
        Collector::with_clock(&CollectorConfig::default(), FixedClock).expect("collector")
    }

    fn ring_texts(collector: &Collector, kind: SinkKind) -> Vec<String> {
        collector
            .sinks()
            .get(kind)
            .entries()
            .map(|e| String::from_utf8_lossy(&e.text).into_owned())
            .collect()
    }

    #[test]
    fn syslog_line_is_stored() {
        let mut collector = collector();
        let record = collector
            .insert_line("<134>hello world", LogSource::Syslog)
            .expect("insert")
            .expect("stored");

        assert_eq!(record.id, LogId(0));
        assert_eq!(record.priority, Priority(134));
        assert_eq!(record.data, b"hello world");

        let (_, listed) = collector.list(0, None).expect("listed");
        assert_eq!(listed, record);
        assert_eq!(ring_texts(&collector, SinkKind::Syslog), vec!["hello world"]);
    }

    #[test]
    fn debug_facility_goes_to_debug_ring_only() {
        let mut collector = collector();
        let prio = Priority::from_parts(Facility::LOCAL7, 7);
        let line = format!("<{prio}>verbose detail");

        let stored = collector.insert_line(&line, LogSource::Syslog).expect("insert");
        assert!(stored.is_none());
        assert!(collector.list(0, None).is_none());
        assert_eq!(collector.store().next_id(), LogId(0));

        assert_eq!(ring_texts(&collector, SinkKind::Debug), vec!["verbose detail"]);
        assert!(collector.sinks().get(SinkKind::Syslog).is_empty());
    }

    #[test]
    fn kernel_line_forwarded_with_correlated_time() {
        let mut collector = collector();
        let record = collector
            .insert_line("<6>[   12.345678] eth0 up", LogSource::Kernel)
            .expect("insert")
            .expect("stored");

        // The store keeps the boot-relative prefix.
        assert_eq!(record.data, b"[   12.345678] eth0 up");
        assert_eq!(record.source, LogSource::Kernel);

        let ring = collector.sinks().get(SinkKind::Kernel);
        let entry = ring.entries().next().expect("entry");
        assert_eq!(entry.text, b"eth0 up");
        assert_eq!(entry.priority, Priority(6));
        assert_eq!(entry.timestamp_us, 1_700_000_012_345_678);
    }

    #[test]
    fn kernel_line_without_stamp_uses_current_time() {
        let mut collector = collector();
        let before = now_micros();
        collector
            .insert_line("<4>no stamp here", LogSource::Kernel)
            .expect("insert");

        let entry = collector
            .sinks()
            .get(SinkKind::Kernel)
            .entries()
            .next()
            .cloned()
            .expect("entry");
        assert_eq!(entry.text, b"no stamp here");
        assert!(entry.timestamp_us >= before);
    }

    #[test]
    fn disabled_ring_still_stores() {
        let config = CollectorConfig {
            trace_enabled: false,
            ..CollectorConfig::default()
        };
        let mut collector = Collector::with_clock(&config, FixedClock).expect("collector");
        collector
            .insert_line("<13>quiet", LogSource::Syslog)
            .expect("insert");

        assert!(collector.sinks().get(SinkKind::Syslog).is_empty());
        assert_eq!(collector.store().len(), 1);
    }

    #[test]
    fn oversized_line_is_rejected() {
        let config = CollectorConfig::default().with_capacity(128);
        let mut collector = Collector::with_clock(&config, FixedClock).expect("collector");
        let line = "x".repeat(200);

        let result = collector.insert_line(&line, LogSource::Syslog);
        assert!(matches!(result, Err(LogError::RecordTooLarge { .. })));
        assert!(collector.store().is_empty());
    }

    #[test]
    fn zero_notify_buffer_is_rejected() {
        let config = CollectorConfig {
            notify_buffer: 0,
            ..CollectorConfig::default()
        };
        assert!(matches!(
            Collector::new(&config),
            Err(LogError::Config(_))
        ));
    }

    #[test]
    fn resize_keeps_recent_records() {
        let mut collector = collector();
        for i in 0..10 {
            collector
                .insert_line(&format!("<13>message {i}"), LogSource::Syslog)
                .expect("insert");
        }

        collector.resize(256).expect("resize");
        assert_eq!(collector.store().capacity(), 256);
        assert!(matches!(
            collector.store().layout(),
            RegionLayout::Linear { oldest: 0, .. }
        ));

        let ids: Vec<u64> = collector.records(0).map(|r| r.id.0).collect();
        assert_eq!(ids.last(), Some(&9));
        assert!(ids.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn resize_to_same_capacity_keeps_cursor() {
        let mut collector = collector();
        collector.insert_line("<13>a", LogSource::Syslog).expect("insert");
        collector.insert_line("<13>b", LogSource::Syslog).expect("insert");

        let (cursor, _) = collector.list(0, None).expect("first");
        collector.resize(DEFAULT_CAPACITY).expect("resize");
        let (_, second) = collector.list(0, Some(cursor)).expect("second");
        assert_eq!(second.data, b"b");
    }

    #[test]
    fn trace_json_reconfigures_rings() {
        let mut collector = collector();
        collector
            .apply_trace_json(br#"{"syslog": {"enabled": false}}"#, true)
            .expect("apply");
        collector.insert_line("<13>a", LogSource::Syslog).expect("insert");
        assert!(collector.sinks().get(SinkKind::Syslog).is_empty());

        collector.apply_trace_config(
            &TraceConfig::default().with_ring(SinkKind::Syslog, RingConfig::default()),
            true,
        );
        collector.insert_line("<13>b", LogSource::Syslog).expect("insert");
        assert_eq!(ring_texts(&collector, SinkKind::Syslog), vec!["b"]);
    }

    #[tokio::test]
    async fn subscriber_receives_stored_records() {
        let mut collector = collector();
        let mut stream = collector.subscribe();

        collector
            .insert_line("<191>debug only", LogSource::Syslog)
            .expect("insert");
        collector
            .insert_line("<30>daemon started", LogSource::Syslog)
            .expect("insert");

        let record = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("notified")
            .expect("record");
        assert_eq!(record.data, b"daemon started");
        assert_eq!(record.id, LogId(0));
    }

    #[tokio::test]
    async fn stream_ends_after_shutdown() {
        let collector = collector();
        let mut stream = collector.subscribe();
        assert!(!stream.is_closed());

        collector.shutdown();
        assert!(stream.next().await.is_none());
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn closed_stream_yields_nothing() {
        let mut collector = collector();
        let mut stream = collector.subscribe();
        stream.close();

        collector.insert_line("<13>x", LogSource::Syslog).expect("insert");
        assert!(stream.next().await.is_none());
    }
}
