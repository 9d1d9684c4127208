//! The index engine.
//!
//! An `Index` ties together the page store, the directory of page ranges, the
//! page cache and the free list. Every operation routes an entry to a page
//! through the directory, then edits the cached copy of that page. Pages are
//! written back when they are evicted, on `flush`, on `close`, and (best
//! effort) on drop.
//!
//! # Invariants
//!
//! - the directory holds one descriptor per non-empty page, keyed by a minimum
//!   that is `<=` every entry in the page and `>` every entry in the page
//!   before it
//! - each descriptor's `entry_count` matches the page's live entries
//! - `count` is the sum of all descriptor counts
//! - every page of the store is either in the directory or on the free list

use std::num::NonZeroUsize;
use std::path::Path;

use crate::cache::PageCache;
use crate::config::IndexOptions;
use crate::directory::{PageDescriptor, PageDirectory};
use crate::entry::Entry;
use crate::file::FileStore;
use crate::free_list::FreeList;
use crate::io::{PAGE_SIZE_U64, PageStore, StorageError};
use crate::key::FixedLengthKey;
use crate::page::{HEADER_SIZE, Page, PageError, empty_header, read_count};

/// Smallest page capacity that leaves room to split and merge.
const MIN_ENTRIES_PER_PAGE: usize = 4;

/// Errors returned by index operations.
#[derive(Debug)]
pub enum IndexError {
    /// The key type is too wide (or has zero width) for the page layout.
    KeySize { width: usize },
    /// A split factor outside `(0.1, 1.0)`.
    InvalidSplitFactor(f64),
    /// The page cache must hold at least two pages.
    InvalidCacheCapacity,
    /// The backing store failed.
    Storage(StorageError),
    /// A page failed validation.
    Corruption {
        file_offset: u64,
        source: PageError,
    },
    /// The store length is not a whole number of pages.
    MisalignedStore { len: u64 },
    /// A page that should have been cached was not.
    CacheMiss { file_offset: u64 },
}

impl IndexError {
    /// Attribute a page error to the page at `file_offset`.
    pub(crate) fn from_page(file_offset: u64, e: PageError) -> Self {
        match e {
            PageError::Storage(e) => Self::Storage(e),
            source => Self::Corruption {
                file_offset,
                source,
            },
        }
    }
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeySize { width } => write!(f, "unsupported key width: {width} bytes"),
            Self::InvalidSplitFactor(factor) => {
                write!(f, "split factor {factor} outside (0.1, 1.0)")
            }
            Self::InvalidCacheCapacity => write!(f, "page cache must hold at least two pages"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Corruption {
                file_offset,
                source,
            } => write!(f, "corrupt page at offset {file_offset}: {source}"),
            Self::MisalignedStore { len } => {
                write!(f, "store length {len} is not a multiple of the page size")
            }
            Self::CacheMiss { file_offset } => {
                write!(f, "page at offset {file_offset} missing from cache")
            }
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Corruption { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StorageError> for IndexError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// A disk-backed B-tree index from fixed-length keys to record offsets.
pub struct Index<K: FixedLengthKey, S: PageStore = FileStore> {
    store: S,
    directory: PageDirectory<K>,
    cache: PageCache<K>,
    free_list: FreeList,
    count: usize,
    options: IndexOptions,
}

impl<K: FixedLengthKey> Index<K, FileStore> {
    /// Open the index file at `path`, creating it if it does not exist.
    pub fn open(path: &Path, options: IndexOptions) -> Result<Self, IndexError> {
        let store = FileStore::open(path)?;
        Self::with_store(store, options)
    }
}

impl<K: FixedLengthKey, S: PageStore> Index<K, S> {
    /// Open an index over `store`, rebuilding the directory and free list from
    /// the page headers.
    pub fn with_store(store: S, options: IndexOptions) -> Result<Self, IndexError> {
        let capacity = validate::<K>(&options)?;
        let mut index = Self {
            store,
            directory: PageDirectory::new(),
            cache: PageCache::new(capacity),
            free_list: FreeList::new(),
            count: 0,
            options,
        };
        index.scan()?;

        tracing::debug!(
            pages = index.directory.len(),
            free_pages = index.free_list.len(),
            entries = index.count,
            "opened index"
        );
        Ok(index)
    }

    /// Write all cached changes back and close the store.
    pub fn close(mut self) -> Result<(), IndexError> {
        self.flush()
    }

    /// Write all cached changes back and sync the store.
    pub fn flush(&mut self) -> Result<(), IndexError> {
        self.cache.flush_all(&mut self.store)?;
        self.store.sync()?;
        Ok(())
    }

    /// Remove every entry and truncate the store.
    ///
    /// Cached pages are discarded without being written. If the store cannot
    /// be cleared, the index is left as it was.
    pub fn clear(&mut self) -> Result<(), IndexError> {
        self.store.clear()?;
        self.cache.clear();
        self.directory.clear();
        self.free_list.clear();
        self.count = 0;
        tracing::debug!("cleared index");
        Ok(())
    }

    /// Add the pair `(key, offset)`.
    ///
    /// Returns `false` if the pair is already present.
    pub fn insert(&mut self, key: K, offset: i32) -> Result<bool, IndexError> {
        let entry = Entry::new(key, offset);
        let Some(target) = self.directory.floor_or_min(&entry) else {
            self.create_first_page(entry)?;
            self.count += 1;
            return Ok(true);
        };

        let page = self.cache.fetch(&mut self.store, target.file_offset)?;
        if page.contains(&entry) {
            return Ok(false);
        }

        if page.is_full() {
            self.split(&target, entry)?;
        } else {
            page.insert(entry.clone());
            let len = page.len();
            self.directory.set_count(&target.min, len);
            // Only the first page can receive an entry below its minimum.
            if entry < target.min {
                self.directory.rekey(&target.min, entry);
            }
        }
        self.count += 1;
        Ok(true)
    }

    /// Remove the pair `(key, offset)`.
    ///
    /// Returns `false` if the pair is not present. On error nothing has been
    /// removed. Merging with the next page is best effort and never fails the
    /// delete.
    pub fn delete(&mut self, key: K, offset: i32) -> Result<bool, IndexError> {
        let entry = Entry::new(key, offset);
        let Some(target) = self.directory.floor_or_min(&entry) else {
            return Ok(false);
        };

        let page = self.cache.fetch(&mut self.store, target.file_offset)?;
        if !page.contains(&entry) {
            return Ok(false);
        }

        // A page losing its last entry is zeroed on disk before it changes.
        if page.len() == 1 {
            self.store.write_at(target.file_offset, &empty_header())?;
            self.forget_page(&target.min, target.file_offset);
            self.count -= 1;
            return Ok(true);
        }

        let deleted = page.delete(&entry);
        debug_assert!(deleted, "live entry not deleted");
        let remaining = page.len();
        self.count -= 1;
        self.directory.set_count(&target.min, remaining);

        if remaining < self.max_entries_per_page() / 4 {
            if let Err(e) = self.merge_successor(&target, remaining) {
                tracing::warn!(file_offset = target.file_offset, "skipped page merge: {e}");
            }
        }
        Ok(true)
    }

    /// Entries with `begin <= key <= end`, in ascending order.
    pub fn search_range(&mut self, begin: &K, end: &K) -> Result<Vec<Entry<K>>, IndexError> {
        let mut out = Vec::new();
        if begin > end {
            return Ok(out);
        }

        let mut next = self
            .directory
            .floor_or_min(&Entry::lower_bound(begin.clone()));
        while let Some(descriptor) = next {
            if descriptor.min.key > *end {
                break;
            }
            let page = self.cache.fetch(&mut self.store, descriptor.file_offset)?;
            page.search_range(begin, end, &mut out);
            next = self.directory.successor(&descriptor.min);
        }
        Ok(out)
    }

    /// Every offset stored under `key`, ascending.
    pub fn search(&mut self, key: &K) -> Result<Vec<i32>, IndexError> {
        Ok(self
            .search_range(key, key)?
            .into_iter()
            .map(|entry| entry.offset)
            .collect())
    }

    /// Every entry in the index, ascending.
    pub fn all_entries(&mut self) -> Result<Vec<Entry<K>>, IndexError> {
        let mut out = Vec::with_capacity(self.count);
        for descriptor in self.directory.iter() {
            if descriptor.entry_count == 0 {
                continue;
            }
            let page = self.cache.fetch(&mut self.store, descriptor.file_offset)?;
            page.all_entries(&mut out);
        }
        Ok(out)
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Entries that fit in one page for this key type.
    #[must_use]
    pub const fn max_entries_per_page(&self) -> usize {
        Page::<K>::MAX_ENTRIES
    }

    /// Number of pages holding entries.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.directory.len()
    }

    /// Number of reclaimed pages waiting for reuse.
    #[must_use]
    pub fn free_page_count(&self) -> usize {
        self.free_list.len()
    }

    /// Descriptors of the pages holding entries, in key order.
    pub fn pages(&self) -> impl Iterator<Item = PageDescriptor<K>> + '_ {
        self.directory.iter()
    }

    #[must_use]
    pub const fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Rebuild the directory and free list from the page headers.
    fn scan(&mut self) -> Result<(), IndexError> {
        let len = self.store.len();
        if len % PAGE_SIZE_U64 != 0 {
            return Err(IndexError::MisalignedStore { len });
        }

        // The count, the checksum and the first slot.
        let mut head = vec![0u8; HEADER_SIZE + Entry::<K>::WIDTH];
        for page in 0..len / PAGE_SIZE_U64 {
            let file_offset = page * PAGE_SIZE_U64;
            self.store.read_at(file_offset, &mut head)?;
            let entry_count = read_count(&head, Page::<K>::MAX_ENTRIES)
                .map_err(|e| IndexError::from_page(file_offset, e))?;

            if entry_count == 0 {
                self.free_list.release(file_offset);
                continue;
            }

            let min = Entry::read_from(&head[HEADER_SIZE..]);
            let inserted = self.directory.insert(PageDescriptor {
                min,
                file_offset,
                entry_count,
            });
            if !inserted {
                return Err(IndexError::Corruption {
                    file_offset,
                    source: PageError::DuplicateMinimum,
                });
            }
            self.count += entry_count;
        }
        Ok(())
    }

    /// A page offset for a new page, reusing a free one when possible.
    fn allocate_page(&mut self) -> Result<u64, IndexError> {
        match self.free_list.allocate() {
            Some(file_offset) => Ok(file_offset),
            None => Ok(self.store.grow()?),
        }
    }

    fn create_first_page(&mut self, entry: Entry<K>) -> Result<(), IndexError> {
        self.cache.reserve(&mut self.store)?;
        let file_offset = self.allocate_page()?;

        let mut page = Page::new(self.cache.lease_buffer(), file_offset);
        page.insert(entry.clone());
        self.directory.insert(PageDescriptor {
            min: entry,
            file_offset,
            entry_count: 1,
        });
        self.cache.insert(&mut self.store, page)
    }

    /// Split the full page described by `target` and add `entry` to the half
    /// it belongs in.
    fn split(&mut self, target: &PageDescriptor<K>, entry: Entry<K>) -> Result<(), IndexError> {
        let factor = if self.directory.is_last(&target.min) {
            self.options.tail_split_factor
        } else {
            self.options.split_factor
        };

        // `target` is the most recently used page, so this evicts another one.
        self.cache.reserve(&mut self.store)?;
        let new_file_offset = self.allocate_page()?;
        let buffer = self.cache.lease_buffer();

        let left = self.cache.fetch(&mut self.store, target.file_offset)?;
        let right = left.split(entry.clone(), new_file_offset, factor, buffer);
        let left_len = left.len();
        let right_len = right.len();
        let Some(right_min) = right.first_entry() else {
            unreachable!("split left the new page empty");
        };

        let left_min = if entry < target.min {
            self.directory.rekey(&target.min, entry.clone());
            entry
        } else {
            target.min.clone()
        };
        self.directory.set_count(&left_min, left_len);
        self.directory.insert(PageDescriptor {
            min: right_min,
            file_offset: new_file_offset,
            entry_count: right_len,
        });
        self.cache.insert(&mut self.store, right)?;

        tracing::debug!(
            left = target.file_offset,
            right = new_file_offset,
            left_len,
            right_len,
            factor,
            "split page"
        );
        Ok(())
    }

    /// Fold the page after `target` into it if both are sparse enough.
    fn merge_successor(
        &mut self,
        target: &PageDescriptor<K>,
        remaining: usize,
    ) -> Result<(), IndexError> {
        let Some(next) = self.directory.successor(&target.min) else {
            return Ok(());
        };
        if remaining + next.entry_count >= self.max_entries_per_page() / 2 {
            return Ok(());
        }

        // The right page is zeroed on disk before either page changes.
        let mut right = self.cache.take(&mut self.store, next.file_offset)?;
        if let Err(e) = self.store.write_at(next.file_offset, &empty_header()) {
            self.restore(right)?;
            return Err(e.into());
        }

        let left = self.cache.fetch(&mut self.store, target.file_offset)?;
        left.merge(&mut right);
        let merged = left.len();
        self.cache.recycle(right);
        self.directory.set_count(&target.min, merged);
        self.forget_page(&next.min, next.file_offset);

        tracing::debug!(
            left = target.file_offset,
            right = next.file_offset,
            merged,
            "merged pages"
        );
        Ok(())
    }

    /// Put back a page taken out of the cache.
    fn restore(&mut self, page: Page<K>) -> Result<(), IndexError> {
        if page.is_dirty() {
            self.cache.insert(&mut self.store, page)
        } else {
            self.cache.recycle(page);
            Ok(())
        }
    }

    /// Drop a page whose header is already zeroed on disk.
    fn forget_page(&mut self, min: &Entry<K>, file_offset: u64) {
        self.cache.remove(file_offset);
        self.directory.remove(min);
        self.free_list.release(file_offset);
        tracing::debug!(file_offset, "freed page");
    }
}

impl<K: FixedLengthKey, S: PageStore> Drop for Index<K, S> {
    fn drop(&mut self) {
        if let Err(e) = self.cache.flush_all(&mut self.store) {
            tracing::warn!("failed to flush index on drop: {e}");
        }
    }
}

impl<K: FixedLengthKey, S: PageStore> std::fmt::Debug for Index<K, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("count", &self.count)
            .field("pages", &self.directory.len())
            .field("free_pages", &self.free_list.len())
            .field("cache", &self.cache)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Check `options` and the key type, returning the cache capacity.
fn validate<K: FixedLengthKey>(options: &IndexOptions) -> Result<NonZeroUsize, IndexError> {
    if K::WIDTH == 0 || Page::<K>::MAX_ENTRIES < MIN_ENTRIES_PER_PAGE {
        return Err(IndexError::KeySize { width: K::WIDTH });
    }
    for factor in [options.split_factor, options.tail_split_factor] {
        let in_range = factor > 0.1 && factor < 1.0;
        if !in_range {
            return Err(IndexError::InvalidSplitFactor(factor));
        }
    }
    match NonZeroUsize::new(options.cache_capacity) {
        Some(capacity) if capacity.get() >= 2 => Ok(capacity),
        _ => Err(IndexError::InvalidCacheCapacity),
    }
}
