//! In-memory page store with fault injection.
//!
//! Useful both as a volatile index backend and for deterministic testing:
//! - Read, write and sync errors
//! - Byte-level corruption (bit flips) on read
//!
//! All faults are driven by a seeded RNG, so the same seed produces the same
//! sequence of faults.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::io::{PAGE_SIZE_U64, PageStore, StorageError, check_bounds};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
    /// Probability of corrupting the returned bytes on read (0.0 - 1.0).
    pub corruption_rate: f64,
}

impl FaultConfig {
    /// A fault config with no faults.
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Every write fails.
    #[must_use]
    pub fn failing_writes() -> Self {
        Self {
            write_error_rate: 1.0,
            ..Self::default()
        }
    }
}

/// Statistics about store operations.
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreStats {
    /// Number of reads.
    pub reads: u64,
    /// Number of writes.
    pub writes: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of injected read, write and sync errors.
    pub injected_errors: u64,
    /// Number of reads returned with flipped bits.
    pub corrupted_reads: u64,
}

/// A page store held entirely in memory.
///
/// # Thread Safety
///
/// Not thread-safe; the index is single-threaded.
#[derive(Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
    fault_config: FaultConfig,
    rng: StdRng,
    stats: MemoryStoreStats,
}

impl MemoryStore {
    /// Create an empty store with no faults.
    ///
    /// The seed only matters once faults are enabled.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, FaultConfig::default())
    }

    /// Create an empty store with custom fault configuration.
    #[must_use]
    pub fn with_config(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            bytes: Vec::new(),
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            stats: MemoryStoreStats::default(),
        }
    }

    /// Create a fault-free store holding `bytes`, such as a copied index image.
    #[must_use]
    pub fn from_bytes(seed: u64, bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..Self::new(seed)
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &MemoryStoreStats {
        &self.stats
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    /// Raw contents, for tests that inspect or damage the on-disk format.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    /// Flip 1-8 random bits in `buf`.
    fn corrupt(&mut self, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        let num_flips = self.rng.random_range(1..=8);
        for _ in 0..num_flips {
            let byte_offset = self.rng.random_range(0..buf.len());
            let bit = self.rng.random_range(0..8u8);
            buf[byte_offset] ^= 1 << bit;
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("len", &self.bytes.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_possible_truncation)] // offsets are bounds-checked against a Vec length
impl PageStore for MemoryStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.stats.reads += 1;
        check_bounds(offset, buf.len(), self.len())?;

        if self.should_inject_fault(self.fault_config.read_error_rate) {
            self.stats.injected_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated read error".to_string(),
            ));
        }

        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);

        if self.should_inject_fault(self.fault_config.corruption_rate) {
            self.stats.corrupted_reads += 1;
            self.corrupt(buf);
        }

        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        self.stats.writes += 1;
        check_bounds(offset, buf.len(), self.len())?;

        if self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated write error".to_string(),
            ));
        }

        let start = offset as usize;
        self.bytes[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn grow(&mut self) -> Result<u64, StorageError> {
        let offset = self.len();
        self.bytes.resize((offset + PAGE_SIZE_U64) as usize, 0);
        Ok(offset)
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.stats.syncs += 1;

        if self.should_inject_fault(self.fault_config.sync_error_rate) {
            self.stats.injected_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated sync error".to_string(),
            ));
        }

        // Writes are already "durable".
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.bytes.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic() {
        let mut store = MemoryStore::new(42);
        assert!(store.is_empty());

        let offset = store.grow().expect("grow");
        assert_eq!(offset, 0);
        assert_eq!(store.len(), PAGE_SIZE_U64);

        store.write_at(10, b"abc").expect("write");
        let mut buf = [0u8; 3];
        store.read_at(10, &mut buf).expect("read");
        assert_eq!(&buf, b"abc");

        assert_eq!(store.stats().reads, 1);
        assert_eq!(store.stats().writes, 1);
    }

    #[test]
    fn test_memory_store_fault_injection() {
        let mut store = MemoryStore::with_config(7, FaultConfig::failing_writes());
        store.grow().expect("grow never faults");

        let result = store.write_at(0, b"x");
        assert!(matches!(result, Err(StorageError::InjectedFault(_))));
        assert_eq!(store.stats().injected_errors, 1);

        store.set_fault_config(FaultConfig::no_faults());
        store.write_at(0, b"x").expect("write after faults disabled");
    }

    #[test]
    fn test_memory_store_corruption_is_deterministic() {
        let config = FaultConfig {
            corruption_rate: 1.0,
            ..FaultConfig::default()
        };

        let read_once = |seed| {
            let mut store = MemoryStore::with_config(seed, config.clone());
            store.grow().expect("grow");
            let mut buf = [0u8; 64];
            store.read_at(0, &mut buf).expect("read");
            assert_eq!(store.stats().corrupted_reads, 1);
            buf
        };

        assert_eq!(read_once(99), read_once(99));
    }

    #[test]
    fn test_memory_store_clear() {
        let mut store = MemoryStore::new(1);
        store.grow().expect("grow");
        store.grow().expect("grow");
        store.clear().expect("clear");
        assert!(store.is_empty());
    }
}
