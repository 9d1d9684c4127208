//! Recycled page buffers.
//!
//! Evicted and freed pages hand their 16KB buffers back here so the next page
//! to be loaded or created can reuse the memory instead of allocating.
//!
//! # Design
//!
//! - Uses a free list (Vec) for O(1) lease/return
//! - Falls back to a fresh allocation when the free list is empty
//! - Retains at most `capacity` idle buffers; extras are dropped
//! - Single-threaded: owned by one `PageCache`
//!
//! # Invariants
//!
//! - `free_list.len() <= capacity`
//! - All buffers are `PAGE_SIZE` bytes (enforced by type system)

use crate::page::{PAGE_SIZE, PageBuffer};

/// A pool of idle page buffers.
#[derive(Debug)]
pub struct BufferPool {
    /// Idle buffers. Contents are stale.
    free_list: Vec<PageBuffer>,
    /// Most idle buffers kept.
    capacity: usize,
    /// Buffers handed out that had to be allocated.
    allocated: usize,
}

impl BufferPool {
    /// Create an empty pool that retains up to `capacity` idle buffers.
    ///
    /// # Panics
    /// Panics if capacity is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Buffer pool capacity must be positive");

        Self {
            free_list: Vec::with_capacity(capacity),
            capacity,
            allocated: 0,
        }
    }

    /// Lease a buffer. Contents are undefined (may contain stale data).
    pub fn lease(&mut self) -> PageBuffer {
        self.free_list.pop().unwrap_or_else(|| {
            self.allocated += 1;
            Box::new([0u8; PAGE_SIZE])
        })
    }

    /// Lease a zeroed buffer.
    pub fn lease_zeroed(&mut self) -> PageBuffer {
        let mut buffer = self.lease();
        buffer.fill(0);
        buffer
    }

    /// Return a buffer to the pool.
    pub fn give_back(&mut self, buffer: PageBuffer) {
        if self.free_list.len() < self.capacity {
            self.free_list.push(buffer);
        }
    }

    /// Number of idle buffers.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// Number of buffers that had to be freshly allocated.
    #[must_use]
    pub const fn allocated(&self) -> usize {
        self.allocated
    }

    /// Most idle buffers kept.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation() {
        let pool = BufferPool::new(10);
        assert_eq!(pool.capacity(), 10);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_lease_reuses_returned_buffers() {
        let mut pool = BufferPool::new(2);

        let buf1 = pool.lease();
        let buf2 = pool.lease();
        assert_eq!(pool.allocated(), 2);

        pool.give_back(buf1);
        pool.give_back(buf2);
        assert_eq!(pool.available(), 2);

        let _buf = pool.lease();
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_lease_zeroed() {
        let mut pool = BufferPool::new(1);

        let mut buf = pool.lease();
        buf[0] = 0xFF;
        buf[100] = 0xAB;
        pool.give_back(buf);

        let buf = pool.lease_zeroed();
        assert_eq!(buf[0], 0);
        assert_eq!(buf[100], 0);
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_give_back_beyond_capacity_drops_buffer() {
        let mut pool = BufferPool::new(1);
        pool.give_back(Box::new([0u8; PAGE_SIZE]));
        pool.give_back(Box::new([0u8; PAGE_SIZE]));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_panics() {
        let _ = BufferPool::new(0);
    }
}
