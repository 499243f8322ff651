use std::cmp::Ordering;

/// Ordering over serialized index keys. The B+ tree stores keys as
/// fixed-width byte strings and delegates every comparison here, so a
/// comparator defines the key type as far as the tree is concerned.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Compares 4-byte keys as little-endian u32 values. Truncated keys
/// order among themselves by length, before any full-width key.
pub struct IntegerComparator;

impl IntegerComparator {
    fn decode(bytes: &[u8]) -> Option<u32> {
        let word: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(word))
    }
}

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (Self::decode(a), Self::decode(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a.len().cmp(&b.len()),
        }
    }
}

/// Lexicographic byte order. Big-endian encoded integers of any width
/// sort correctly under this comparator.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}
