//! Fixed-length key types.
//!
//! Every key stored in the index serializes to exactly `WIDTH` bytes. Pages
//! keep owned copies of keys (via `Clone`), never references into another
//! buffer, so a key read out of one page can outlive that page's buffer.
//!
//! Ordering is the key's `Ord` implementation on the decoded value. The byte
//! encoding does not need to sort the same way, because the index never
//! compares raw bytes.

use std::fmt;

/// A key that serializes to a fixed number of bytes.
///
/// # Invariants
///
/// - `write_to` writes exactly `WIDTH` bytes
/// - `read_from(write_to(k)) == k`
/// - `Ord` is a total order consistent with `Eq`
pub trait FixedLengthKey: Clone + Ord + fmt::Debug {
    /// Serialized width in bytes.
    const WIDTH: usize;

    /// Serialize into `buf`, which is exactly `WIDTH` bytes long.
    fn write_to(&self, buf: &mut [u8]);

    /// Deserialize from `buf`, which is exactly `WIDTH` bytes long.
    fn read_from(buf: &[u8]) -> Self;
}

macro_rules! impl_int_key {
    ($($ty:ty),*) => {
        $(
            impl FixedLengthKey for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn write_to(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                fn read_from(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(buf);
                    Self::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_int_key!(u16, u32, i32, u64, i64);

impl<const N: usize> FixedLengthKey for [u8; N] {
    const WIDTH: usize = N;

    fn write_to(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn read_from(buf: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(buf);
        bytes
    }
}

/// A string key stored in exactly `N` bytes.
///
/// Longer input is truncated at the last char boundary that fits; shorter
/// input is zero padded. Trailing zero bytes are not part of the value, so
/// `"ab"` and `"ab\0"` are the same key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedString<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedString<N> {
    /// Build a key from `text`, truncating to at most `N` bytes.
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut end = text.len().min(N);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; N];
        bytes[..end].copy_from_slice(&text.as_bytes()[..end]);
        Self { bytes }
    }

    /// The stored text without padding.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let len = self.bytes.iter().position(|&b| b == 0).unwrap_or(N);
        // Bytes only ever come from a `&str` cut at a char boundary, or from
        // disk; invalid UTF-8 from disk degrades to the valid prefix.
        match std::str::from_utf8(&self.bytes[..len]) {
            Ok(text) => text,
            Err(e) => std::str::from_utf8(&self.bytes[..e.valid_up_to()]).unwrap_or_default(),
        }
    }
}

impl<const N: usize> fmt::Debug for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> From<&str> for FixedString<N> {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl<const N: usize> FixedLengthKey for FixedString<N> {
    const WIDTH: usize = N;

    fn write_to(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.bytes);
    }

    fn read_from(buf: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(buf);
        Self { bytes }
    }
}

/// Two keys compared lexicographically: `first`, then `second`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompoundKey<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> CompoundKey<A, B> {
    #[must_use]
    pub const fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: FixedLengthKey, B: FixedLengthKey> FixedLengthKey for CompoundKey<A, B> {
    const WIDTH: usize = A::WIDTH + B::WIDTH;

    fn write_to(&self, buf: &mut [u8]) {
        let (head, tail) = buf.split_at_mut(A::WIDTH);
        self.first.write_to(head);
        self.second.write_to(tail);
    }

    fn read_from(buf: &[u8]) -> Self {
        let (head, tail) = buf.split_at(A::WIDTH);
        Self {
            first: A::read_from(head),
            second: B::read_from(tail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<K: FixedLengthKey>(key: &K) -> K {
        let mut buf = vec![0u8; K::WIDTH];
        key.write_to(&mut buf);
        K::read_from(&buf)
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(<u16 as FixedLengthKey>::WIDTH, 2);
        assert_eq!(<u32 as FixedLengthKey>::WIDTH, 4);
        assert_eq!(<i32 as FixedLengthKey>::WIDTH, 4);
        assert_eq!(<i64 as FixedLengthKey>::WIDTH, 8);
        assert_eq!(roundtrip(&-42i64), -42);
        assert_eq!(roundtrip(&u32::MAX), u32::MAX);
    }

    #[test]
    fn test_fixed_string_truncates_at_char_boundary() {
        // "é" is two bytes; a 3-byte key cannot hold "aé" + "b".
        let key = FixedString::<3>::new("aéb");
        assert_eq!(key.as_str(), "aé");

        let key = FixedString::<2>::new("aé");
        assert_eq!(key.as_str(), "a");
    }

    #[test]
    fn test_fixed_string_padding_and_order() {
        let short = FixedString::<8>::new("ab");
        let long = FixedString::<8>::new("abc");
        assert!(short < long);
        assert_eq!(short, FixedString::<8>::new("ab\0"));
        assert_eq!(roundtrip(&long).as_str(), "abc");
    }

    #[test]
    fn test_compound_key_order_and_encoding() {
        let a = CompoundKey::new(1u32, FixedString::<4>::new("zz"));
        let b = CompoundKey::new(2u32, FixedString::<4>::new("aa"));
        assert!(a < b);
        assert_eq!(<CompoundKey<u32, FixedString<4>> as FixedLengthKey>::WIDTH, 8);
        assert_eq!(roundtrip(&b), b);
    }
}
