//! Line normalization and classification.
//!
//! This module provides:
//! - [`LineParser`] — Sanitizes raw lines and extracts the priority token
//! - [`ParsedLine`] — The normalized text and its priority
//! - [`KernelStamp`] — A boot-relative kernel timestamp prefix
//!
//! Parsing never fails: input that does not match a grammar is passed
//! through unchanged with priority 0.

use regex::bytes::Regex;

use crate::error::Result;
use crate::types::{LogSource, Priority};

/// Width of the date and host field prefixed by syslog clients.
pub const SYSLOG_PADDING: usize = 16;

const PRIORITY_PATTERN: &str = r"^<([0-9]*)>";
const KERNEL_STAMP_PATTERN: &str = r"^\[[ 0]*([0-9]*)\.([0-9]*)\] ";

const NANO_DIGITS: usize = 9;

/// A sanitized line, borrowed from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    /// Priority token value, or 0 when absent
    pub priority: Priority,
    /// Text after the priority token and syslog padding
    pub text: &'a [u8],
}

/// Timestamp prefix of a kernel line, `[   12.345678] `.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStamp {
    /// Whole seconds since boot
    pub secs: u64,
    /// Fractional part scaled to nanoseconds
    pub nanos: u32,
    /// Offset of the text following the prefix
    pub rest: usize,
}

/// Parser holding the compiled line grammars.
#[derive(Debug, Clone)]
pub struct LineParser {
    priority: Regex,
    kernel_stamp: Regex,
}

impl LineParser {
    /// Compiles the line grammars.
    ///
    /// # Errors
    ///
    /// Returns an error if a grammar fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            priority: Regex::new(PRIORITY_PATTERN)?,
            kernel_stamp: Regex::new(KERNEL_STAMP_PATTERN)?,
        })
    }

    /// Normalizes a raw line in place and classifies it.
    ///
    /// The line ends at the first NUL byte. Line breaks become spaces,
    /// trailing whitespace is dropped, a leading `<digits>` token becomes the
    /// priority and, for syslog lines, the fixed-width date/host field is
    /// skipped.
    pub fn sanitize<'a>(&self, buf: &'a mut [u8], source: LogSource) -> ParsedLine<'a> {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        for byte in &mut buf[..end] {
            if matches!(*byte, b'\n' | b'\r') {
                *byte = b' ';
            }
        }

        let buf: &'a [u8] = buf;
        let len = buf[..end]
            .iter()
            .rposition(|&b| !is_space(b))
            .map_or(0, |last| last + 1);
        let mut text = &buf[..len];

        let mut priority = Priority::default();
        if let Some(caps) = self.priority.captures(text) {
            let digits = caps.get(1).map_or(&[][..], |m| m.as_bytes());
            priority = Priority(parse_digits(digits).unwrap_or(0));
            text = &text[caps.get(0).map_or(0, |m| m.end())..];
        }

        // Best effort: no attempt is made to validate the date itself.
        if source == LogSource::Syslog
            && text.len() + 1 > SYSLOG_PADDING
            && text[SYSLOG_PADDING - 1] == b' '
        {
            text = &text[SYSLOG_PADDING..];
        }

        ParsedLine { priority, text }
    }

    /// Matches a kernel timestamp prefix at the start of `text`.
    #[must_use]
    pub fn kernel_stamp(&self, text: &[u8]) -> Option<KernelStamp> {
        let caps = self.kernel_stamp.captures(text)?;
        let secs = caps.get(1).map_or(&[][..], |m| m.as_bytes());
        let frac = caps.get(2).map_or(&[][..], |m| m.as_bytes());

        Some(KernelStamp {
            secs: parse_digits(secs).unwrap_or(0),
            nanos: frac_to_nanos(frac),
            rest: caps.get(0).map_or(0, |m| m.end()),
        })
    }
}

/// C `isspace` in the default locale.
const fn is_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

fn parse_digits<T: std::str::FromStr>(digits: &[u8]) -> Option<T> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn frac_to_nanos(digits: &[u8]) -> u32 {
    (0..NANO_DIGITS).fold(0, |nanos, i| {
        nanos * 10 + digits.get(i).map_or(0, |d| u32::from(d - b'0'))
    })
}
