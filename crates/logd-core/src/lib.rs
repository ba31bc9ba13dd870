//! # logd-core
//!
//! In-memory log collection core for small systems.
//!
//! This crate provides:
//!
//! - [`RingStore`] — Fixed-capacity circular store of variable-length records
//! - [`LineParser`] — Line sanitization and priority extraction
//! - [`KernelClock`] — Wall-clock correlation of boot-relative kernel timestamps
//! - [`TraceSinks`] — Bounded per-category trace rings
//! - [`Collector`] — The ingestion pipeline tying them together
//!
//! ## Example
//!
//! ```rust
//! use logd_core::{Collector, CollectorConfig, LogSource};
//!
//! let mut collector = Collector::new(&CollectorConfig::default())?;
//! collector.insert_line("<13>Oct 16 12:00:00 myprog: started", LogSource::Syslog)?;
//!
//! for record in collector.records(0) {
//!     println!("{} <{}> {}", record.id, record.priority, record.message());
//! }
//! # Ok::<(), logd_core::LogError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod collector;
pub mod error;
pub mod parser;
pub mod store;
pub mod trace;
pub mod traits;
pub mod types;

// Re-export main types
pub use clock::{KernelClock, SystemClock};
pub use collector::{Collector, CollectorConfig, RecordStream};
pub use error::{LogError, Result};
pub use parser::{KernelStamp, LineParser, ParsedLine, SYSLOG_PADDING};
pub use store::{
    Cursor, DEFAULT_CAPACITY, HEADER_SIZE, InsertOutcome, MIN_CAPACITY, Records, RegionLayout,
    RingStore, footprint,
};
pub use trace::{
    DEFAULT_RING_ENTRIES, DEFAULT_RING_SIZE, RingConfig, SinkKind, TraceConfig, TraceEntry,
    TraceRing, TraceSinks,
};
pub use traits::{ClockSource, TraceSink};
pub use types::{Facility, LogId, LogRecord, LogSource, Priority};
