//! Kernel timestamp correlation.
//!
//! Kernel lines carry a boot-relative timestamp. [`KernelClock`] translates
//! it into wall-clock time by adding the current offset between the
//! realtime and monotonic clocks.

use std::time::Duration;

use tracing::trace;

use crate::parser::KernelStamp;
use crate::traits::ClockSource;

const MICROS_PER_SEC: i128 = 1_000_000;

/// Reads the host clocks with `clock_gettime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    #[allow(unsafe_code)]
    fn read(clock: libc::clockid_t) -> Option<Duration> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `clock_gettime` only writes through the pointer, which
        // refers to a live, properly aligned `timespec`.
        if unsafe { libc::clock_gettime(clock, &mut ts) } != 0 {
            return None;
        }
        Some(Duration::new(
            u64::try_from(ts.tv_sec).ok()?,
            u32::try_from(ts.tv_nsec).ok()?,
        ))
    }
}

impl ClockSource for SystemClock {
    fn realtime(&self) -> Option<Duration> {
        Self::read(libc::CLOCK_REALTIME)
    }

    fn monotonic(&self) -> Option<Duration> {
        Self::read(libc::CLOCK_MONOTONIC)
    }
}

/// Converts boot-relative kernel timestamps to wall-clock microseconds.
pub struct KernelClock {
    clock: Box<dyn ClockSource>,
}

impl std::fmt::Debug for KernelClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelClock").finish_non_exhaustive()
    }
}

impl Default for KernelClock {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelClock {
    /// Creates a correlator backed by the host clocks.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Creates a correlator backed by the given clocks.
    #[must_use]
    pub fn with_clock(clock: impl ClockSource + 'static) -> Self {
        Self {
            clock: Box::new(clock),
        }
    }

    /// Returns the wall-clock time of `stamp` in microseconds since the
    /// Unix epoch, or 0 if either clock cannot be read.
    #[must_use]
    pub fn correlate(&self, stamp: &KernelStamp) -> u64 {
        let (Some(wall), Some(mono)) = (self.clock.realtime(), self.clock.monotonic()) else {
            trace!("clock read failed, no kernel timestamp");
            return 0;
        };

        let since_boot = i128::from(stamp.secs) * MICROS_PER_SEC + i128::from(stamp.nanos / 1_000);
        let boot_offset = wall.as_micros() as i128 - mono.as_micros() as i128;

        u64::try_from((since_boot + boot_offset).max(0)).unwrap_or(u64::MAX)
    }
}
