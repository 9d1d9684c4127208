//! Index entries: a key paired with a record offset.

use crate::key::FixedLengthKey;

/// Serialized width of the record offset that follows each key.
pub const OFFSET_WIDTH: usize = 4;

/// A `(key, offset)` pair.
///
/// Ordered by key, then by offset. Several entries may share a key; the
/// offset tells them apart and identifies the entry for deletion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entry<K> {
    pub key: K,
    pub offset: i32,
}

impl<K> Entry<K> {
    #[must_use]
    pub const fn new(key: K, offset: i32) -> Self {
        Self { key, offset }
    }
}

impl<K: FixedLengthKey> Entry<K> {
    /// Serialized width of one entry slot.
    pub const WIDTH: usize = K::WIDTH + OFFSET_WIDTH;

    /// The smallest entry with the given key.
    #[must_use]
    pub const fn lower_bound(key: K) -> Self {
        Self::new(key, i32::MIN)
    }

    /// Serialize into `buf`, which is exactly `Self::WIDTH` bytes long.
    pub fn write_to(&self, buf: &mut [u8]) {
        let (key, offset) = buf.split_at_mut(K::WIDTH);
        self.key.write_to(key);
        offset.copy_from_slice(&self.offset.to_le_bytes());
    }

    /// Deserialize from `buf`, which is exactly `Self::WIDTH` bytes long.
    #[must_use]
    pub fn read_from(buf: &[u8]) -> Self {
        let (key, offset) = buf.split_at(K::WIDTH);
        Self {
            key: K::read_from(key),
            offset: i32::from_le_bytes([offset[0], offset[1], offset[2], offset[3]]),
        }
    }
}
