//! Reclaimed page slots.
//!
//! Pages that become empty are never removed from the file. Their offsets go
//! on this stack and are handed out again before the file is grown.

/// A stack of free page offsets.
#[derive(Debug, Default)]
pub struct FreeList {
    offsets: Vec<u64>,
}

impl FreeList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            offsets: Vec::new(),
        }
    }

    /// Mark the page at `offset` as free.
    pub fn release(&mut self, offset: u64) {
        debug_assert!(!self.contains(offset), "page {offset} released twice");
        self.offsets.push(offset);
    }

    /// Take a free page offset, most recently released first.
    pub fn allocate(&mut self) -> Option<u64> {
        self.offsets.pop()
    }

    #[must_use]
    pub fn contains(&self, offset: u64) -> bool {
        self.offsets.contains(&offset)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
    }
}
