//! Routing from entries to pages.
//!
//! The directory orders page descriptors by each page's minimum entry. The
//! page that should hold an entry is the one with the greatest minimum that
//! is `<=` the entry; an entry below every minimum routes to the first page.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::entry::Entry;

/// Metadata describing one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor<K> {
    /// Smallest entry the page holds (or held; it is only ever lowered).
    pub min: Entry<K>,
    /// Offset of the page in the backing store.
    pub file_offset: u64,
    /// Live entries in the page, counting pending edits.
    pub entry_count: usize,
}

#[derive(Debug, Clone, Copy)]
struct PageSlot {
    file_offset: u64,
    entry_count: usize,
}

/// Ordered index over page descriptors.
#[derive(Debug)]
pub struct PageDirectory<K> {
    pages: BTreeMap<Entry<K>, PageSlot>,
}

impl<K: Ord + Clone> PageDirectory<K> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// The page with the greatest minimum `<= entry`, or the first page.
    #[must_use]
    pub fn floor_or_min(&self, entry: &Entry<K>) -> Option<PageDescriptor<K>> {
        self.pages
            .range(..=entry)
            .next_back()
            .or_else(|| self.pages.first_key_value())
            .map(to_descriptor)
    }

    /// The page after the one whose minimum is `min`.
    #[must_use]
    pub fn successor(&self, min: &Entry<K>) -> Option<PageDescriptor<K>> {
        self.pages
            .range((Bound::Excluded(min), Bound::Unbounded))
            .next()
            .map(to_descriptor)
    }

    /// The first page in key order.
    #[must_use]
    pub fn min(&self) -> Option<PageDescriptor<K>> {
        self.pages.first_key_value().map(to_descriptor)
    }

    /// Whether the page whose minimum is `min` is the last page.
    #[must_use]
    pub fn is_last(&self, min: &Entry<K>) -> bool {
        self.pages
            .last_key_value()
            .is_some_and(|(last, _)| last == min)
    }

    /// Add a page. Returns `false` if a page with the same minimum exists.
    pub fn insert(&mut self, descriptor: PageDescriptor<K>) -> bool {
        if self.pages.contains_key(&descriptor.min) {
            return false;
        }
        self.pages.insert(
            descriptor.min,
            PageSlot {
                file_offset: descriptor.file_offset,
                entry_count: descriptor.entry_count,
            },
        );
        true
    }

    /// Remove the page whose minimum is `min`.
    pub fn remove(&mut self, min: &Entry<K>) -> Option<PageDescriptor<K>> {
        self.pages
            .remove_entry(min)
            .map(|(min, slot)| to_descriptor((&min, &slot)))
    }

    /// Record a new entry count for the page whose minimum is `min`.
    pub fn set_count(&mut self, min: &Entry<K>, entry_count: usize) {
        if let Some(slot) = self.pages.get_mut(min) {
            slot.entry_count = entry_count;
        }
    }

    /// Move the page whose minimum is `old` to the new minimum `new`.
    ///
    /// Only valid when no other page lies between `new` and `old`.
    pub fn rekey(&mut self, old: &Entry<K>, new: Entry<K>) {
        if let Some(slot) = self.pages.remove(old) {
            self.pages.insert(new, slot);
        }
    }

    /// Number of pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// All pages in key order.
    pub fn iter(&self) -> impl Iterator<Item = PageDescriptor<K>> + '_ {
        self.pages.iter().map(to_descriptor)
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}

impl<K: Ord + Clone> Default for PageDirectory<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn to_descriptor<K: Clone>((min, slot): (&Entry<K>, &PageSlot)) -> PageDescriptor<K> {
    PageDescriptor {
        min: min.clone(),
        file_offset: slot.file_offset,
        entry_count: slot.entry_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(key: u32, file_offset: u64) -> PageDescriptor<u32> {
        PageDescriptor {
            min: Entry::new(key, 0),
            file_offset,
            entry_count: 1,
        }
    }

    fn directory() -> PageDirectory<u32> {
        let mut dir = PageDirectory::new();
        assert!(dir.insert(descriptor(10, 0)));
        assert!(dir.insert(descriptor(20, 100)));
        assert!(dir.insert(descriptor(30, 200)));
        dir
    }

    #[test]
    fn test_floor_or_min_routing() {
        let dir = directory();
        let route = |key| dir.floor_or_min(&Entry::new(key, 5)).map(|d| d.file_offset);

        assert_eq!(route(5), Some(0));
        assert_eq!(route(10), Some(0));
        assert_eq!(route(19), Some(0));
        assert_eq!(route(20), Some(100));
        assert_eq!(route(99), Some(200));

        // Offset is part of the ordering: (20, MIN) sorts before (20, 0).
        let below = dir.floor_or_min(&Entry::lower_bound(20)).map(|d| d.file_offset);
        assert_eq!(below, Some(0));
    }

    #[test]
    fn test_empty_directory_routes_nowhere() {
        let dir = PageDirectory::<u32>::new();
        assert!(dir.floor_or_min(&Entry::new(1, 1)).is_none());
        assert!(dir.min().is_none());
        assert!(dir.is_empty());
    }

    #[test]
    fn test_successor_and_last() {
        let dir = directory();
        let first = dir.min().expect("first page");
        let second = dir.successor(&first.min).expect("second page");
        let third = dir.successor(&second.min).expect("third page");

        assert_eq!(second.file_offset, 100);
        assert!(dir.is_last(&third.min));
        assert!(!dir.is_last(&second.min));
        assert!(dir.successor(&third.min).is_none());
    }

    #[test]
    fn test_insert_rejects_duplicate_minimum() {
        let mut dir = directory();
        assert!(!dir.insert(descriptor(20, 999)));
        assert_eq!(dir.len(), 3);
    }

    #[test]
    fn test_set_count_rekey_and_remove() {
        let mut dir = directory();
        let first = Entry::new(10, 0);

        dir.set_count(&first, 42);
        dir.rekey(&first, Entry::new(1, 0));
        let min = dir.min().expect("first page");
        assert_eq!(min.min, Entry::new(1, 0));
        assert_eq!(min.entry_count, 42);
        assert_eq!(min.file_offset, 0);

        let removed = dir.remove(&Entry::new(20, 0)).expect("removed");
        assert_eq!(removed.file_offset, 100);
        assert_eq!(dir.iter().map(|d| d.file_offset).collect::<Vec<_>>(), vec![0, 200]);
    }
}
