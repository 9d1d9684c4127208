//! Storage abstraction for the index.
//!
//! The index talks to its backing bytes through the `PageStore` trait, so the
//! same engine runs over a real file in production and over in-memory storage
//! with fault injection in tests.
//!
//! # Invariants
//!
//! Implementations must ensure:
//! - `len()` is always a multiple of `PAGE_SIZE`
//! - `read_at` returns the bytes most recently written by `write_at`
//! - `grow` appends exactly one zeroed page and returns its offset

use crate::page::PAGE_SIZE;

/// Page size as u64 for offset calculations.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Access past the end of the store.
    OutOfBounds { offset: u64, len: u64 },
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OutOfBounds { offset, len } => {
                write!(f, "offset {offset} out of bounds (store length: {len})")
            }
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::OutOfBounds { .. } | Self::InjectedFault(_) => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Byte-addressed storage that grows one page at a time.
pub trait PageStore {
    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Returns an error if the range extends past `len()`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Write `buf` starting at `offset`.
    ///
    /// Returns an error if the range extends past `len()`; use `grow` first.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError>;

    /// Current length in bytes.
    fn len(&self) -> u64;

    /// Whether the store holds no pages.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one zeroed page and return its offset.
    fn grow(&mut self) -> Result<u64, StorageError>;

    /// Make all previous writes durable.
    fn sync(&mut self) -> Result<(), StorageError>;

    /// Discard all content, leaving an empty store.
    fn clear(&mut self) -> Result<(), StorageError>;
}

/// Check that `[offset, offset + len)` lies within a store of `store_len` bytes.
pub(crate) fn check_bounds(offset: u64, len: usize, store_len: u64) -> Result<(), StorageError> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= store_len => Ok(()),
        _ => Err(StorageError::OutOfBounds {
            offset,
            len: store_len,
        }),
    }
}
