//! Index pages and the on-disk page layout.
//!
//! Each page is a 16KB block holding a sorted run of `(key, offset)` slots.
//! Edits are not applied to the slot array directly: they accumulate in two
//! small sorted buffers (pending inserts and pending deletes) and are folded
//! into the array by `compact`, which runs only when a buffer fills up, the
//! page is about to be written, or the page is split or merged.
//!
//! # Layout
//!
//! - `[0, 4)`: entry count (`i32`, little-endian)
//! - `[4, 8)`: CRC32 over the count bytes and the live slots
//! - `[8, HEADER_SIZE)`: reserved
//! - `[HEADER_SIZE, ..)`: `count` slots of `key (K::WIDTH bytes) + offset (i32 LE)`,
//!   strictly ascending
//!
//! Bytes past the last live slot are stale and never read.
//!
//! # Invariants
//!
//! - `pending_inserts` and `pending_deletes` are sorted and hold no duplicates
//! - every pending delete names a persisted entry
//! - no pending insert equals a live persisted entry
//! - `persisted + pending_inserts.len() <= MAX_ENTRIES`, which keeps the
//!   backward merge in `compact` from overwriting slots it has not read yet

// Slot counts are bounded by PAGE_SIZE, far below i32::MAX.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::ops::Range;

use crate::entry::{Entry, OFFSET_WIDTH};
use crate::io::{PageStore, StorageError};
use crate::key::FixedLengthKey;

/// Page size in bytes (16KB).
pub const PAGE_SIZE: usize = 16384;

/// Bytes reserved at the start of each page before the first slot.
pub const HEADER_SIZE: usize = 1024;

/// Bound on each pending-edit buffer before it is folded into the page.
pub const PENDING_CAPACITY: usize = 256;

const COUNT_OFFSET: usize = 0;
const CHECKSUM_OFFSET: usize = 4;

/// Length of the header prefix that carries data (count + checksum).
pub const HEADER_PREFIX_LEN: usize = 8;

/// A page-sized buffer.
pub type PageBuffer = Box<[u8; PAGE_SIZE]>;

/// Number of slots that fit in a page for keys of `key_width` bytes.
#[must_use]
pub const fn max_entries_for(key_width: usize) -> usize {
    (PAGE_SIZE - HEADER_SIZE) / (key_width + OFFSET_WIDTH)
}

/// Header bytes of a page that holds nothing.
#[must_use]
pub const fn empty_header() -> [u8; HEADER_PREFIX_LEN] {
    [0u8; HEADER_PREFIX_LEN]
}

/// Errors found while reading a page.
#[derive(Debug)]
pub enum PageError {
    /// The page could not be read from storage.
    Storage(StorageError),
    /// The header count is negative or exceeds the page capacity.
    CountOutOfRange { count: i32, max: usize },
    /// The stored checksum does not match the page content.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Slot `index` is not greater than the slot before it.
    OutOfOrder { index: usize },
    /// The page starts with the same entry as another page.
    DuplicateMinimum,
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::CountOutOfRange { count, max } => {
                write!(f, "entry count {count} out of range (max {max})")
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::OutOfOrder { index } => write!(f, "slot {index} is out of order"),
            Self::DuplicateMinimum => write!(f, "first entry duplicates another page"),
        }
    }
}

impl std::error::Error for PageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for PageError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// Parse the entry count from the first bytes of a page.
pub fn read_count(header: &[u8], max_entries: usize) -> Result<usize, PageError> {
    let count = i32::from_le_bytes([
        header[COUNT_OFFSET],
        header[COUNT_OFFSET + 1],
        header[COUNT_OFFSET + 2],
        header[COUNT_OFFSET + 3],
    ]);
    match usize::try_from(count) {
        Ok(n) if n <= max_entries => Ok(n),
        _ => Err(PageError::CountOutOfRange {
            count,
            max: max_entries,
        }),
    }
}

/// An in-memory mirror of one index page.
pub struct Page<K> {
    buffer: PageBuffer,
    file_offset: u64,
    /// Slots physically present in `buffer`.
    persisted: usize,
    pending_inserts: Vec<Entry<K>>,
    pending_deletes: Vec<Entry<K>>,
    dirty: bool,
}

impl<K: FixedLengthKey> Page<K> {
    /// Slots per page for this key type.
    pub const MAX_ENTRIES: usize = max_entries_for(K::WIDTH);

    /// Create an empty page that will live at `file_offset`.
    ///
    /// The page starts dirty so that its header reaches storage.
    #[must_use]
    pub const fn new(buffer: PageBuffer, file_offset: u64) -> Self {
        Self {
            buffer,
            file_offset,
            persisted: 0,
            pending_inserts: Vec::new(),
            pending_deletes: Vec::new(),
            dirty: true,
        }
    }

    /// Read the page at `file_offset` into `buffer` and validate it.
    pub fn load<S: PageStore + ?Sized>(
        store: &mut S,
        file_offset: u64,
        mut buffer: PageBuffer,
    ) -> Result<Self, PageError> {
        store.read_at(file_offset, &mut buffer[..])?;

        let persisted = read_count(&buffer[..], Self::MAX_ENTRIES)?;
        if persisted > 0 {
            let expected = stored_checksum(&buffer);
            let actual = compute_checksum::<K>(&buffer, persisted);
            if expected != actual {
                return Err(PageError::ChecksumMismatch { expected, actual });
            }
        }

        let page = Self {
            buffer,
            file_offset,
            persisted,
            pending_inserts: Vec::new(),
            pending_deletes: Vec::new(),
            dirty: false,
        };
        page.check_order()?;
        Ok(page)
    }

    /// Write the page back if it has unsaved changes.
    pub fn flush<S: PageStore + ?Sized>(&mut self, store: &mut S) -> Result<(), StorageError> {
        if !self.dirty {
            return Ok(());
        }

        self.compact();
        self.write_header();
        store.write_at(self.file_offset, &self.buffer[..])?;
        self.dirty = false;
        Ok(())
    }

    /// Offset of this page in the backing store.
    #[must_use]
    pub const fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// Whether the page has changes not yet written.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of live entries, counting pending edits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.persisted + self.pending_inserts.len() - self.pending_deletes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= Self::MAX_ENTRIES
    }

    /// Number of edits not yet folded into the slot array.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending_inserts.len() + self.pending_deletes.len()
    }

    /// Whether `entry` is live in this page.
    #[must_use]
    pub fn contains(&self, entry: &Entry<K>) -> bool {
        if self.pending_inserts.binary_search(entry).is_ok() {
            return true;
        }
        self.find_persisted(entry).is_some() && self.pending_deletes.binary_search(entry).is_err()
    }

    /// Smallest live entry.
    #[must_use]
    pub fn first_entry(&self) -> Option<Entry<K>> {
        // Deletes are a sorted subset of the slots, so deleted leading slots
        // line up with the front of `pending_deletes`.
        let mut slot = 0;
        while slot < self.persisted
            && slot < self.pending_deletes.len()
            && self.entry_at(slot) == self.pending_deletes[slot]
        {
            slot += 1;
        }
        let persisted = (slot < self.persisted).then(|| self.entry_at(slot));

        match (persisted, self.pending_inserts.first()) {
            (Some(p), Some(i)) => Some(if p < *i { p } else { i.clone() }),
            (Some(p), None) => Some(p),
            (None, Some(i)) => Some(i.clone()),
            (None, None) => None,
        }
    }

    /// Add `entry` to the page.
    ///
    /// Returns `false` if the entry is already live.
    ///
    /// # Panics
    ///
    /// Panics if the page is full; callers split first.
    pub fn insert(&mut self, entry: Entry<K>) -> bool {
        if let Ok(pos) = self.pending_deletes.binary_search(&entry) {
            self.pending_deletes.remove(pos);
            self.dirty = true;
            return true;
        }
        if self.contains(&entry) {
            return false;
        }
        assert!(!self.is_full(), "insert into a full page");

        if self.pending_inserts.len() >= PENDING_CAPACITY
            || self.persisted + self.pending_inserts.len() >= Self::MAX_ENTRIES
        {
            self.compact();
        }

        let pos = self.pending_inserts.partition_point(|e| *e < entry);
        self.pending_inserts.insert(pos, entry);
        self.dirty = true;
        true
    }

    /// Remove `entry` from the page.
    ///
    /// Returns `false` if the entry is not live.
    pub fn delete(&mut self, entry: &Entry<K>) -> bool {
        if let Ok(pos) = self.pending_inserts.binary_search(entry) {
            self.pending_inserts.remove(pos);
            self.dirty = true;
            return true;
        }
        if self.pending_deletes.binary_search(entry).is_ok() || self.find_persisted(entry).is_none()
        {
            return false;
        }

        if self.pending_deletes.len() >= PENDING_CAPACITY {
            self.compact();
        }

        let pos = self.pending_deletes.partition_point(|e| e < entry);
        self.pending_deletes.insert(pos, entry.clone());
        self.dirty = true;
        true
    }

    /// Append live entries with `begin <= key <= end` to `out`, ascending.
    pub fn search_range(&self, begin: &K, end: &K, out: &mut Vec<Entry<K>>) {
        if begin > end {
            return;
        }
        let probe = Entry::lower_bound(begin.clone());
        let slot = self.persisted_lower_bound(&probe);
        let insert = self.pending_inserts.partition_point(|e| *e < probe);
        let delete = self.pending_deletes.partition_point(|e| *e < probe);
        self.merge_forward(slot, insert, delete, |e| e.key <= *end, out);
    }

    /// Append every live entry to `out`, ascending.
    pub fn all_entries(&self, out: &mut Vec<Entry<K>>) {
        self.merge_forward(0, 0, 0, |_| true, out);
    }

    /// Walk slots and pending edits forward in entry order, starting at the
    /// given cursors, until `in_range` rejects an entry.
    fn merge_forward(
        &self,
        mut slot: usize,
        mut insert: usize,
        mut delete: usize,
        in_range: impl Fn(&Entry<K>) -> bool,
        out: &mut Vec<Entry<K>>,
    ) {
        let mut next_persisted = (slot < self.persisted).then(|| self.entry_at(slot));

        loop {
            let entry = match next_persisted.take() {
                Some(p) if self.pending_inserts.get(insert).is_none_or(|i| p < *i) => {
                    slot += 1;
                    next_persisted = (slot < self.persisted).then(|| self.entry_at(slot));

                    while self.pending_deletes.get(delete).is_some_and(|d| *d < p) {
                        delete += 1;
                    }
                    if self.pending_deletes.get(delete) == Some(&p) {
                        delete += 1;
                        continue;
                    }
                    p
                }
                other => {
                    next_persisted = other;
                    let Some(i) = self.pending_inserts.get(insert) else {
                        break;
                    };
                    insert += 1;
                    i.clone()
                }
            };

            if !in_range(&entry) {
                break;
            }
            out.push(entry);
        }
    }

    /// Fold the pending buffers into the slot array.
    ///
    /// Merges backward from the ends of the slot array and both buffers,
    /// writing the result into the tail of the slot area, then shifts it to
    /// the front. Runs in O(entries) with no allocation.
    pub fn compact(&mut self) {
        if self.pending_inserts.is_empty() && self.pending_deletes.is_empty() {
            return;
        }

        let mut inserts = std::mem::take(&mut self.pending_inserts);
        let mut deletes = std::mem::take(&mut self.pending_deletes);
        let mut read = self.persisted;
        let mut write = Self::MAX_ENTRIES;
        let mut next_persisted = read.checked_sub(1).map(|r| self.entry_at(r));

        loop {
            match next_persisted.take() {
                Some(p) if inserts.last().is_none_or(|i| p > *i) => {
                    read -= 1;
                    if deletes.last() == Some(&p) {
                        deletes.pop();
                    } else {
                        write -= 1;
                        debug_assert!(write >= read);
                        self.copy_slot(read, write);
                    }
                    next_persisted = read.checked_sub(1).map(|r| self.entry_at(r));
                }
                other => {
                    next_persisted = other;
                    let Some(entry) = inserts.pop() else {
                        break;
                    };
                    write -= 1;
                    debug_assert!(write >= read);
                    self.write_slot(write, &entry);
                }
            }
        }
        debug_assert!(deletes.is_empty(), "pending delete without a slot");

        let live = Self::MAX_ENTRIES - write;
        let tail = slot_range::<K>(write, live);
        self.buffer.copy_within(tail, HEADER_SIZE);
        self.persisted = live;

        // Hand the emptied buffers back to keep their capacity.
        self.pending_inserts = inserts;
        self.pending_deletes = deletes;
    }

    /// Move the upper part of this page into a new page at `new_file_offset`,
    /// then add `entry` to whichever half it belongs to.
    ///
    /// The cut is at `floor(MAX_ENTRIES * factor)`, so `factor` is the share
    /// of a full page that stays on the left.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is not in `(0.1, 1.0)` or the page holds fewer than
    /// two entries.
    #[allow(clippy::cast_precision_loss)]
    pub fn split(
        &mut self,
        entry: Entry<K>,
        new_file_offset: u64,
        factor: f64,
        buffer: PageBuffer,
    ) -> Self {
        assert!(
            factor > 0.1 && factor < 1.0,
            "split factor {factor} outside (0.1, 1.0)"
        );
        self.compact();
        assert!(self.persisted >= 2, "split of a page with fewer than two entries");

        let cut = ((Self::MAX_ENTRIES as f64 * factor) as usize).clamp(1, self.persisted - 1);
        let moved = self.persisted - cut;

        let mut right = Self::new(buffer, new_file_offset);
        right.buffer[slot_range::<K>(0, moved)]
            .copy_from_slice(&self.buffer[slot_range::<K>(cut, moved)]);
        right.persisted = moved;
        self.persisted = cut;
        self.dirty = true;

        if entry < right.entry_at(0) {
            self.insert(entry);
        } else {
            right.insert(entry);
        }
        right
    }

    /// Absorb every entry of `right`, which must hold only larger entries.
    ///
    /// # Panics
    ///
    /// Panics if the combined entries do not fit in one page.
    pub fn merge(&mut self, right: &mut Self) {
        self.compact();
        right.compact();
        assert!(
            self.persisted + right.persisted <= Self::MAX_ENTRIES,
            "merged page would overflow"
        );

        let moved = right.persisted;
        self.buffer[slot_range::<K>(self.persisted, moved)]
            .copy_from_slice(&right.buffer[slot_range::<K>(0, moved)]);
        self.persisted += moved;
        right.persisted = 0;
        self.dirty = true;
        right.dirty = true;
    }

    /// Give back the page buffer for reuse.
    #[must_use]
    pub fn into_buffer(self) -> PageBuffer {
        self.buffer
    }

    fn entry_at(&self, slot: usize) -> Entry<K> {
        Entry::read_from(&self.buffer[slot_range::<K>(slot, 1)])
    }

    fn write_slot(&mut self, slot: usize, entry: &Entry<K>) {
        entry.write_to(&mut self.buffer[slot_range::<K>(slot, 1)]);
    }

    fn copy_slot(&mut self, from: usize, to: usize) {
        if from != to {
            let src = slot_range::<K>(from, 1);
            self.buffer.copy_within(src, slot_range::<K>(to, 1).start);
        }
    }

    /// First slot whose entry is `>= probe`.
    fn persisted_lower_bound(&self, probe: &Entry<K>) -> usize {
        let (mut lo, mut hi) = (0, self.persisted);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry_at(mid) < *probe {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn find_persisted(&self, entry: &Entry<K>) -> Option<usize> {
        let slot = self.persisted_lower_bound(entry);
        (slot < self.persisted && self.entry_at(slot) == *entry).then_some(slot)
    }

    fn write_header(&mut self) {
        let count = self.persisted as i32;
        self.buffer[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&count.to_le_bytes());
        let checksum = compute_checksum::<K>(&self.buffer, self.persisted);
        self.buffer[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
    }

    fn check_order(&self) -> Result<(), PageError> {
        let mut prev = (self.persisted > 0).then(|| self.entry_at(0));
        for index in 1..self.persisted {
            let current = self.entry_at(index);
            if prev.as_ref().is_some_and(|p| *p >= current) {
                return Err(PageError::OutOfOrder { index });
            }
            prev = Some(current);
        }
        Ok(())
    }
}

impl<K> std::fmt::Debug for Page<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("file_offset", &self.file_offset)
            .field("persisted", &self.persisted)
            .field("pending_inserts", &self.pending_inserts.len())
            .field("pending_deletes", &self.pending_deletes.len())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

/// Byte range of `count` slots starting at `slot`.
const fn slot_range<K: FixedLengthKey>(slot: usize, count: usize) -> Range<usize> {
    let start = HEADER_SIZE + slot * Entry::<K>::WIDTH;
    start..start + count * Entry::<K>::WIDTH
}

fn stored_checksum(buffer: &[u8; PAGE_SIZE]) -> u32 {
    u32::from_le_bytes([
        buffer[CHECKSUM_OFFSET],
        buffer[CHECKSUM_OFFSET + 1],
        buffer[CHECKSUM_OFFSET + 2],
        buffer[CHECKSUM_OFFSET + 3],
    ])
}

/// CRC32 over the count bytes and the first `count` slots.
fn compute_checksum<K: FixedLengthKey>(buffer: &[u8; PAGE_SIZE], count: usize) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buffer[COUNT_OFFSET..COUNT_OFFSET + 4]);
    hasher.update(&buffer[slot_range::<K>(0, count)]);
    hasher.finalize()
}
