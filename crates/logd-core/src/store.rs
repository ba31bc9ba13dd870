//! Circular in-memory log storage.
//!
//! Records are packed back to back into one fixed byte region. Each record is
//! a 32 byte header followed by its NUL-terminated payload, padded to 4 bytes.
//! Once the region is full, new writes reuse the space of the oldest records.
//!
//! ```text
//! linear:   [ free | oldest .. records .. | newest -> free ]
//! wrapped:  [ records .. | newest -> free | oldest .. records .. | tail -> unused ]
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::{LogError, Result};
use crate::types::{LogId, LogRecord, LogSource, Priority};

/// Default capacity of the region in bytes.
pub const DEFAULT_CAPACITY: usize = 16 * 1024;

/// Size of the fixed record header in bytes.
pub const HEADER_SIZE: usize = 32;

const ALIGN: usize = 4;

/// Smallest region that can hold a record.
pub const MIN_CAPACITY: usize = HEADER_SIZE + ALIGN;

const fn pad4(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

/// Bytes occupied in the region by a record with `size` payload bytes.
///
/// `size` includes the terminator.
#[must_use]
pub const fn footprint(size: usize) -> usize {
    HEADER_SIZE + pad4(size)
}

/// Physical arrangement of the live records, for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionLayout {
    /// Live records occupy `[oldest, newest)`.
    Linear {
        /// Offset of the oldest record
        oldest: usize,
        /// Next free write position
        newest: usize,
    },
    /// Live records occupy `[oldest, tail)` followed by `[0, newest)`.
    Wrapped {
        /// Offset of the oldest record
        oldest: usize,
        /// End of the upper segment; scans continue at offset 0
        tail: usize,
        /// Next free write position
        newest: usize,
    },
}

/// Position of a record in the enumerable sequence.
///
/// A cursor does not borrow the store. It is checked again on every use and
/// stops enumeration once the record it names has been evicted or moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    offset: usize,
    id: LogId,
    epoch: u64,
}

impl Cursor {
    /// Id of the record this cursor points at.
    #[must_use]
    pub const fn id(&self) -> LogId {
        self.id
    }
}

/// Result of an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was written and assigned an id.
    Stored(LogRecord),
    /// The record belongs to the debug facility and was not retained.
    Filtered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wrap {
    Linear,
    Wrapped { tail: usize },
}

#[derive(Debug, Clone, Copy)]
struct Header {
    id: u64,
    size: u32,
    priority: u32,
    source: u8,
    ts_sec: i64,
    ts_nsec: u32,
}

impl Header {
    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.priority.to_le_bytes());
        buf[16] = self.source;
        buf[17..20].fill(0);
        buf[20..28].copy_from_slice(&self.ts_sec.to_le_bytes());
        buf[28..32].copy_from_slice(&self.ts_nsec.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            id: u64::from_le_bytes(array(&buf[0..8])),
            size: u32::from_le_bytes(array(&buf[8..12])),
            priority: u32::from_le_bytes(array(&buf[12..16])),
            source: buf[16],
            ts_sec: i64::from_le_bytes(array(&buf[20..28])),
            ts_nsec: u32::from_le_bytes(array(&buf[28..32])),
        }
    }

    fn footprint(&self) -> usize {
        footprint(self.size as usize)
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

fn allocate(capacity: usize) -> Result<Vec<u8>> {
    let mut region = Vec::new();
    region
        .try_reserve_exact(capacity)
        .map_err(|_| LogError::Allocation(capacity))?;
    region.resize(capacity, 0);
    Ok(region)
}

/// Fixed-capacity circular store of variable-length log records.
#[derive(Debug)]
pub struct RingStore {
    /// Backing region
    region: Vec<u8>,
    /// Offset of the oldest live record
    oldest: usize,
    /// Next free write position
    newest: usize,
    /// Whether the live records wrap around the region end
    wrap: Wrap,
    /// Number of live records
    len: usize,
    /// Id assigned to the next stored record
    next_id: u64,
    /// Bumped whenever records move, invalidating cursors
    epoch: u64,
}

impl RingStore {
    /// Allocates a store with the given capacity in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity is too small or cannot be allocated.
    pub fn new(capacity: usize) -> Result<Self> {
        check_capacity(capacity)?;
        let region = allocate(capacity)?;
        debug!(capacity, "allocated log buffer");

        Ok(Self {
            region,
            oldest: 0,
            newest: 0,
            wrap: Wrap::Linear,
            len: 0,
            next_id: 0,
            epoch: 0,
        })
    }

    /// Stores a payload, evicting the oldest records it overwrites.
    ///
    /// Records of the debug facility are not retained and consume no id.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::RecordTooLarge`] if the record cannot fit into the
    /// region even when it is empty. The store is left untouched.
    pub fn insert(
        &mut self,
        payload: &[u8],
        priority: Priority,
        source: LogSource,
    ) -> Result<InsertOutcome> {
        if priority.is_debug_facility() {
            trace!(%priority, "debug facility record not retained");
            return Ok(InsertOutcome::Filtered);
        }

        let size = payload.len() + 1;
        let needed = footprint(size);
        if needed > self.capacity() || u32::try_from(size).is_err() {
            return Err(LogError::RecordTooLarge {
                size: needed,
                capacity: self.capacity(),
            });
        }

        let at = self.make_room(needed);
        let timestamp = Utc::now();
        let id = LogId(self.next_id);
        self.next_id += 1;

        let header = Header {
            id: id.0,
            size: size as u32,
            priority: priority.0,
            source: source.tag(),
            ts_sec: timestamp.timestamp(),
            ts_nsec: timestamp.timestamp_subsec_nanos(),
        };
        header.encode(&mut self.region[at..at + HEADER_SIZE]);

        let body = at + HEADER_SIZE;
        self.region[body..body + payload.len()].copy_from_slice(payload);
        self.region[body + payload.len()..at + needed].fill(0);

        if self.len == 0 {
            self.oldest = at;
        }
        self.newest = at + needed;
        self.len += 1;
        trace!(%id, size, offset = at, "stored record");

        Ok(InsertOutcome::Stored(LogRecord {
            id,
            priority,
            source,
            timestamp,
            data: payload.to_vec(),
        }))
    }

    /// Frees at least `needed` bytes at the write position and returns it.
    fn make_room(&mut self, needed: usize) -> usize {
        loop {
            match self.wrap {
                Wrap::Linear => {
                    if self.newest + needed <= self.capacity() {
                        return self.newest;
                    }
                    if self.len == 0 {
                        self.oldest = 0;
                        self.newest = 0;
                        return 0;
                    }
                    debug!(tail = self.newest, "log wrap");
                    self.wrap = Wrap::Wrapped { tail: self.newest };
                    self.newest = 0;
                }
                Wrap::Wrapped { .. } => {
                    let end = self.newest + needed;
                    while matches!(self.wrap, Wrap::Wrapped { .. }) && self.oldest < end {
                        self.evict_oldest();
                    }
                    if matches!(self.wrap, Wrap::Wrapped { .. }) {
                        return self.newest;
                    }
                    // The upper segment is gone; retry as a linear region.
                }
            }
        }
    }

    fn evict_oldest(&mut self) {
        let header = self.header_at(self.oldest);
        trace!(id = header.id, offset = self.oldest, "evicting record");
        self.oldest += header.footprint();
        self.len -= 1;

        if let Wrap::Wrapped { tail } = self.wrap {
            if self.oldest >= tail {
                self.oldest = 0;
                self.wrap = Wrap::Linear;
            }
        }
    }

    /// Returns the next record at or after `cursor`.
    ///
    /// With `count == 0` every live record is returned, otherwise only
    /// records among the last `count` ids ever assigned. A `None` cursor
    /// starts at the oldest record. Enumeration ends (`None`) at the newest
    /// record or as soon as the cursor no longer names a live record.
    #[must_use]
    pub fn list(&self, count: usize, cursor: Option<Cursor>) -> Option<(Cursor, LogRecord)> {
        let floor = self.floor(count);

        let mut offset = match cursor {
            None if self.len == 0 => return None,
            None => self.oldest,
            Some(cursor) => {
                if !self.is_current(cursor) {
                    trace!(id = %cursor.id, "stale cursor, ending enumeration");
                    return None;
                }
                self.advance(cursor.offset)?
            }
        };

        loop {
            let header = self.header_at(offset);
            if header.id >= floor {
                let cursor = Cursor {
                    offset,
                    id: LogId(header.id),
                    epoch: self.epoch,
                };
                return Some((cursor, self.record_at(offset, &header)));
            }
            offset = self.advance(offset)?;
        }
    }

    /// Iterates over the live records, oldest first.
    ///
    /// See [`RingStore::list`] for the meaning of `count`.
    #[must_use]
    pub fn records(&self, count: usize) -> Records<'_> {
        Records {
            store: self,
            count,
            cursor: None,
            done: false,
        }
    }

    /// Moves the live records into a newly allocated region.
    ///
    /// When the new region is smaller, the most recent records that fit are
    /// kept. Outstanding cursors stop working.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity is too small or the allocation fails.
    /// The store is left untouched in that case.
    pub fn resize(&mut self, new_capacity: usize) -> Result<()> {
        check_capacity(new_capacity)?;
        let mut region = allocate(new_capacity)?;

        let offsets = self.offsets();
        let mut used = 0;
        let mut kept = 0;
        for &offset in offsets.iter().rev() {
            let size = self.header_at(offset).footprint();
            if used + size > new_capacity {
                break;
            }
            used += size;
            kept += 1;
        }

        let mut at = 0;
        for &offset in &offsets[offsets.len() - kept..] {
            let size = self.header_at(offset).footprint();
            region[at..at + size].copy_from_slice(&self.region[offset..offset + size]);
            at += size;
        }

        debug!(
            from = self.capacity(),
            to = new_capacity,
            kept,
            dropped = offsets.len() - kept,
            "resized log buffer"
        );

        self.region = region;
        self.oldest = 0;
        self.newest = at;
        self.wrap = Wrap::Linear;
        self.len = kept;
        self.epoch += 1;
        Ok(())
    }

    /// Returns the capacity of the region in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Returns the number of live records.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no record is live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the id the next stored record will get.
    #[must_use]
    pub const fn next_id(&self) -> LogId {
        LogId(self.next_id)
    }

    /// Returns the id of the oldest live record.
    #[must_use]
    pub fn oldest_id(&self) -> Option<LogId> {
        (self.len > 0).then(|| LogId(self.header_at(self.oldest).id))
    }

    /// Returns the number of region bytes held by live records.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        if self.len == 0 {
            return 0;
        }
        match self.wrap {
            Wrap::Linear => self.newest - self.oldest,
            Wrap::Wrapped { tail } => (tail - self.oldest) + self.newest,
        }
    }

    /// Returns the current physical layout.
    #[must_use]
    pub const fn layout(&self) -> RegionLayout {
        match self.wrap {
            Wrap::Linear => RegionLayout::Linear {
                oldest: self.oldest,
                newest: self.newest,
            },
            Wrap::Wrapped { tail } => RegionLayout::Wrapped {
                oldest: self.oldest,
                tail,
                newest: self.newest,
            },
        }
    }

    fn floor(&self, count: usize) -> u64 {
        if count == 0 {
            0
        } else {
            self.next_id.saturating_sub(count as u64)
        }
    }

    /// Ids between the oldest live record and `next_id` are gap-free and
    /// never move until a resize, so an id in that range pins the slot.
    fn is_current(&self, cursor: Cursor) -> bool {
        if cursor.epoch != self.epoch || cursor.id.0 >= self.next_id {
            return false;
        }
        match self.oldest_id() {
            Some(oldest) if cursor.id >= oldest => {
                self.contains(cursor.offset) && self.header_at(cursor.offset).id == cursor.id.0
            }
            _ => false,
        }
    }

    fn contains(&self, offset: usize) -> bool {
        if self.len == 0 {
            return false;
        }
        match self.wrap {
            Wrap::Linear => offset >= self.oldest && offset < self.newest,
            Wrap::Wrapped { tail } => (offset >= self.oldest && offset < tail) || offset < self.newest,
        }
    }

    /// Offset of the record after the one at `offset`, or `None` at the end.
    fn advance(&self, offset: usize) -> Option<usize> {
        let mut next = offset + self.header_at(offset).footprint();
        if let Wrap::Wrapped { tail } = self.wrap {
            if next >= tail {
                next = 0;
            }
        }
        (next != self.newest).then_some(next)
    }

    fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.len);
        if self.len == 0 {
            return offsets;
        }
        let mut offset = Some(self.oldest);
        while let Some(at) = offset {
            offsets.push(at);
            offset = self.advance(at);
        }
        offsets
    }

    fn header_at(&self, offset: usize) -> Header {
        Header::decode(&self.region[offset..offset + HEADER_SIZE])
    }

    fn record_at(&self, offset: usize, header: &Header) -> LogRecord {
        let body = offset + HEADER_SIZE;
        let len = (header.size as usize).saturating_sub(1);
        LogRecord {
            id: LogId(header.id),
            priority: Priority(header.priority),
            source: LogSource::from_tag(header.source),
            timestamp: DateTime::from_timestamp(header.ts_sec, header.ts_nsec).unwrap_or_default(),
            data: self.region[body..body + len].to_vec(),
        }
    }
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity < MIN_CAPACITY {
        return Err(LogError::InvalidCapacity(capacity));
    }
    Ok(())
}

/// Iterator over live records, see [`RingStore::records`].
pub struct Records<'a> {
    store: &'a RingStore,
    count: usize,
    cursor: Option<Cursor>,
    done: bool,
}

impl Iterator for Records<'_> {
    type Item = LogRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.store.list(self.count, self.cursor) {
            Some((cursor, record)) => {
                self.cursor = Some(cursor);
                Some(record)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
