//! Traits for the collaborators of the collector.
//!
//! - [`TraceSink`] abstracts the per-category diagnostic sinks
//! - [`ClockSource`] abstracts the clocks sampled for kernel timestamps

use std::time::Duration;

use crate::types::Priority;

/// An append-only, timestamped byte-record sink.
///
/// The collector only ever appends; retention is up to the implementor.
pub trait TraceSink: Send {
    /// Appends one record.
    ///
    /// `timestamp_us` is wall-clock time in microseconds since the Unix epoch.
    fn append(&mut self, timestamp_us: u64, priority: Priority, text: &[u8]);

    /// Returns true if appends are currently accepted.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// A source of wall-clock and monotonic time.
///
/// Both readings are durations since the clock's epoch. `None` means the
/// clock could not be read.
pub trait ClockSource: Send + Sync {
    /// Wall-clock time since the Unix epoch.
    fn realtime(&self) -> Option<Duration>;

    /// Monotonic time since boot.
    fn monotonic(&self) -> Option<Duration>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple sink for testing the trait.
    #[derive(Default)]
    struct MockSink {
        records: Vec<(u64, Priority, Vec<u8>)>,
    }

    impl TraceSink for MockSink {
        fn append(&mut self, timestamp_us: u64, priority: Priority, text: &[u8]) {
            self.records.push((timestamp_us, priority, text.to_vec()));
        }
    }

    struct FrozenClock;

    impl ClockSource for FrozenClock {
        fn realtime(&self) -> Option<Duration> {
            Some(Duration::from_secs(1_000))
        }

        fn monotonic(&self) -> Option<Duration> {
            None
        }
    }

    #[test]
    fn sink_default_is_enabled() {
        let sink = MockSink::default();
        assert!(sink.is_enabled());
    }

    #[test]
    fn sink_through_trait_object() {
        let mut sink = MockSink::default();
        {
            let dyn_sink: &mut dyn TraceSink = &mut sink;
            dyn_sink.append(42, Priority(6), b"hello");
        }
        assert_eq!(sink.records, vec![(42, Priority(6), b"hello".to_vec())]);
    }

    #[test]
    fn clock_through_trait_object() {
        let clock: Box<dyn ClockSource> = Box::new(FrozenClock);
        assert_eq!(clock.realtime(), Some(Duration::from_secs(1_000)));
        assert!(clock.monotonic().is_none());
    }
}
