//! Bounded cache of live pages.
//!
//! Pages are keyed by file offset and evicted least-recently-used first. An
//! evicted page is flushed before it is dropped, and its buffer goes back to
//! the pool for the next page to be loaded or created.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::buffer_pool::BufferPool;
use crate::index::IndexError;
use crate::io::PageStore;
use crate::key::FixedLengthKey;
use crate::page::{Page, PageBuffer};

/// Idle buffers kept around for reuse.
const SPARE_BUFFERS: usize = 4;

/// An LRU cache of pages with write-back eviction.
pub struct PageCache<K> {
    pages: LruCache<u64, Page<K>>,
    pool: BufferPool,
}

impl<K: FixedLengthKey> PageCache<K> {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            pages: LruCache::new(capacity),
            pool: BufferPool::new(SPARE_BUFFERS),
        }
    }

    /// The page at `file_offset`, loading it on a miss.
    pub fn fetch<S: PageStore + ?Sized>(
        &mut self,
        store: &mut S,
        file_offset: u64,
    ) -> Result<&mut Page<K>, IndexError> {
        if !self.pages.contains(&file_offset) {
            let page = self.load(store, file_offset)?;
            self.insert(store, page)?;
        }
        self.pages
            .get_mut(&file_offset)
            .ok_or(IndexError::CacheMiss { file_offset })
    }

    /// Remove the page at `file_offset` from the cache without flushing it,
    /// loading it from storage if it is not resident.
    pub fn take<S: PageStore + ?Sized>(
        &mut self,
        store: &mut S,
        file_offset: u64,
    ) -> Result<Page<K>, IndexError> {
        match self.pages.pop(&file_offset) {
            Some(page) => Ok(page),
            None => self.load(store, file_offset),
        }
    }

    /// Add a page, evicting the least recently used one if the cache is full.
    pub fn insert<S: PageStore + ?Sized>(
        &mut self,
        store: &mut S,
        page: Page<K>,
    ) -> Result<(), IndexError> {
        self.reserve(store)?;
        let file_offset = page.file_offset();
        if let Some((evicted_offset, mut evicted)) = self.pages.push(file_offset, page) {
            debug_assert_ne!(evicted_offset, file_offset, "page cached twice");
            evicted.flush(store)?;
            self.pool.give_back(evicted.into_buffer());
        }
        Ok(())
    }

    /// Make room for one more page.
    ///
    /// If flushing the evicted page fails, it stays cached and the error is
    /// returned.
    pub fn reserve<S: PageStore + ?Sized>(&mut self, store: &mut S) -> Result<(), IndexError> {
        if self.pages.len() < self.pages.cap().get() {
            return Ok(());
        }
        if let Some((file_offset, mut page)) = self.pages.pop_lru() {
            tracing::trace!(file_offset, dirty = page.is_dirty(), "evicting page");
            if let Err(e) = page.flush(store) {
                let displaced = self.pages.push(file_offset, page);
                debug_assert!(displaced.is_none(), "restored page displaced another");
                return Err(e.into());
            }
            self.pool.give_back(page.into_buffer());
        }
        Ok(())
    }

    /// Drop the page at `file_offset` without flushing it.
    pub fn remove(&mut self, file_offset: u64) {
        if let Some(page) = self.pages.pop(&file_offset) {
            self.pool.give_back(page.into_buffer());
        }
    }

    /// Return a page that is no longer needed to the buffer pool.
    pub fn recycle(&mut self, page: Page<K>) {
        self.pool.give_back(page.into_buffer());
    }

    /// A zeroed buffer for a new page.
    pub fn lease_buffer(&mut self) -> PageBuffer {
        self.pool.lease_zeroed()
    }

    /// Write every dirty page back, keeping them cached.
    pub fn flush_all<S: PageStore + ?Sized>(&mut self, store: &mut S) -> Result<(), IndexError> {
        for (_, page) in self.pages.iter_mut() {
            page.flush(store)?;
        }
        Ok(())
    }

    /// Drop every page without flushing.
    pub fn clear(&mut self) {
        while let Some((_, page)) = self.pages.pop_lru() {
            self.pool.give_back(page.into_buffer());
        }
    }

    #[must_use]
    pub fn contains(&self, file_offset: u64) -> bool {
        self.pages.contains(&file_offset)
    }

    /// Number of cached pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    fn load<S: PageStore + ?Sized>(
        &mut self,
        store: &mut S,
        file_offset: u64,
    ) -> Result<Page<K>, IndexError> {
        let buffer = self.pool.lease();
        Page::load(store, file_offset, buffer).map_err(|e| IndexError::from_page(file_offset, e))
    }
}

impl<K> std::fmt::Debug for PageCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("len", &self.pages.len())
            .field("cap", &self.pages.cap())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::io::PAGE_SIZE_U64;
    use crate::memory::{FaultConfig, MemoryStore};

    fn cache(capacity: usize) -> PageCache<u32> {
        PageCache::new(NonZeroUsize::new(capacity).expect("non-zero"))
    }

    /// A store with `pages` zeroed pages.
    fn store(pages: usize) -> MemoryStore {
        let mut store = MemoryStore::new(3);
        for _ in 0..pages {
            store.grow().expect("grow");
        }
        store
    }

    #[test]
    fn test_fetch_loads_on_miss_only() {
        let mut store = store(1);
        let mut cache = cache(2);

        cache.fetch(&mut store, 0).expect("fetch");
        cache.fetch(&mut store, 0).expect("fetch");
        assert_eq!(store.stats().reads, 1);
        assert!(cache.contains(0));
    }

    #[test]
    fn test_eviction_writes_dirty_page_back() {
        let mut store = store(3);
        let mut cache = cache(2);

        cache
            .fetch(&mut store, 0)
            .expect("fetch")
            .insert(Entry::new(7, 70));
        cache.fetch(&mut store, PAGE_SIZE_U64).expect("fetch");
        cache.fetch(&mut store, 2 * PAGE_SIZE_U64).expect("fetch");

        assert!(!cache.contains(0));
        assert_eq!(cache.len(), 2);
        assert_eq!(store.stats().writes, 1);

        let page = cache.fetch(&mut store, 0).expect("reload");
        assert!(page.contains(&Entry::new(7, 70)));
    }

    #[test]
    fn test_failed_eviction_keeps_page() {
        let mut store = store(2);
        let mut cache = cache(1);

        cache
            .fetch(&mut store, 0)
            .expect("fetch")
            .insert(Entry::new(1, 1));
        store.set_fault_config(FaultConfig::failing_writes());

        let result = cache.fetch(&mut store, PAGE_SIZE_U64);
        assert!(matches!(result, Err(IndexError::Storage(_))));
        assert!(cache.contains(0));
        assert_eq!(cache.len(), 1);

        store.set_fault_config(FaultConfig::no_faults());
        let kept = cache.fetch(&mut store, 0).expect("refetch");
        assert!(kept.is_dirty());
        assert!(kept.contains(&Entry::new(1, 1)));
    }

    #[test]
    fn test_take_and_remove_skip_flush() {
        let mut store = store(2);
        let mut cache = cache(2);

        cache
            .fetch(&mut store, 0)
            .expect("fetch")
            .insert(Entry::new(1, 1));
        let taken = cache.take(&mut store, 0).expect("take");
        assert!(taken.is_dirty());
        assert!(!cache.contains(0));

        // Not resident: take loads it.
        let loaded = cache.take(&mut store, PAGE_SIZE_U64).expect("take");
        assert!(!loaded.is_dirty());

        cache.insert(&mut store, taken).expect("insert");
        cache.remove(0);
        cache.flush_all(&mut store).expect("flush");
        assert_eq!(store.stats().writes, 0);
    }

    #[test]
    fn test_clear_discards_pages() {
        let mut store = store(1);
        let mut cache = cache(2);
        cache
            .fetch(&mut store, 0)
            .expect("fetch")
            .insert(Entry::new(1, 1));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(store.stats().writes, 0);
    }

    #[test]
    fn test_corrupt_page_reported_with_offset() {
        let mut store = store(2);
        store.bytes_mut()[crate::page::PAGE_SIZE..][..4].copy_from_slice(&i32::MAX.to_le_bytes());
        let mut cache = cache(2);

        let result = cache.fetch(&mut store, PAGE_SIZE_U64);
        assert!(matches!(
            result,
            Err(IndexError::Corruption {
                file_offset: PAGE_SIZE_U64,
                ..
            })
        ));
    }
}
