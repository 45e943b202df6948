//! Key hashes
//!
//! A key hash is an 8-byte value, layout-compatible with a hash bucket
//! entry. The low 48 bits index into the hash table; the 14 bits above them
//! are the tag, a fast discriminator between different key hashes that land
//! in the same bucket. This crate never computes hashes itself; callers
//! supply the 64-bit hash code.

use std::fmt;

use crate::utility::is_power_of_two;

/// Hash of a key, plus tag bits for fast in-bucket comparison.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KeyHash(u64);

impl KeyHash {
    /// Number of tag bits
    pub const TAG_BITS: u32 = 14;

    const TAG_SHIFT: u32 = 48;
    const TAG_MASK: u64 = (1 << Self::TAG_BITS) - 1;

    /// Create a key hash from a 64-bit hash code
    #[inline]
    pub const fn new(code: u64) -> Self {
        Self(code)
    }

    /// Get the raw control value
    #[inline]
    pub const fn control(&self) -> u64 {
        self.0
    }

    /// Get the tag, the in-bucket discriminator for this hash
    #[inline]
    pub const fn tag(&self) -> u16 {
        ((self.0 >> Self::TAG_SHIFT) & Self::TAG_MASK) as u16
    }

    /// Truncate the hash to index into a hash table of `table_size` buckets.
    ///
    /// `table_size` must be a power of two.
    #[inline]
    pub fn table_index(&self, table_size: u64) -> usize {
        debug_assert!(is_power_of_two(table_size));
        (self.0 & (table_size - 1)) as usize
    }
}

impl From<u64> for KeyHash {
    #[inline]
    fn from(code: u64) -> Self {
        Self(code)
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHash")
            .field("control", &self.0)
            .field("tag", &self.tag())
            .finish()
    }
}
