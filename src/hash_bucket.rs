//! Hash bucket entries for the in-memory index
//!
//! An entry is packed into a single 8-byte word so the hash table can read
//! and update slots with plain atomic operations:
//!
//! - bits 0..=47: logical address of the record
//! - bits 48..=61: tag (fast in-bucket hash discriminator)
//! - bit 62: reserved
//! - bit 63: tentative (entry is being inserted)
//!
//! An entry is semantically a weak reference to a record, not ownership of
//! it. Continuations that observe an entry hold only a non-owning
//! back-reference to its [`AtomicHashBucketEntry`] slot; the slot itself is
//! owned by the hash table.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::address::Address;
use crate::constants::CACHE_LINE_BYTES;

/// Entry stored in a hash bucket slot
#[repr(transparent)]
#[derive(Clone, Copy, Default)]
pub struct HashBucketEntry(u64);

impl HashBucketEntry {
    /// Invalid/empty entry value
    pub const INVALID: Self = Self(0);

    /// Number of bits for the tag
    pub const TAG_BITS: u32 = 14;

    const ADDRESS_MASK: u64 = (1 << 48) - 1;
    const TAG_SHIFT: u32 = 48;
    const TAG_MASK: u64 = (1 << Self::TAG_BITS) - 1;
    const TENTATIVE_BIT: u64 = 1 << 63;

    /// Create a new entry
    #[inline]
    pub const fn new(address: Address, tag: u16, tentative: bool) -> Self {
        let mut control = address.control() & Self::ADDRESS_MASK;
        control |= ((tag as u64) & Self::TAG_MASK) << Self::TAG_SHIFT;
        if tentative {
            control |= Self::TENTATIVE_BIT;
        }
        Self(control)
    }

    /// Create an entry from a raw control value
    #[inline]
    pub const fn from_control(control: u64) -> Self {
        Self(control)
    }

    /// Check if this entry is unused/invalid
    #[inline]
    pub const fn is_unused(&self) -> bool {
        self.0 == 0
    }

    /// Get the address portion of the entry
    #[inline]
    pub const fn address(&self) -> Address {
        Address::from_control(self.0 & Self::ADDRESS_MASK)
    }

    /// Get the tag portion of the entry
    #[inline]
    pub const fn tag(&self) -> u16 {
        ((self.0 >> Self::TAG_SHIFT) & Self::TAG_MASK) as u16
    }

    /// Check if the entry is tentative (being inserted)
    #[inline]
    pub const fn is_tentative(&self) -> bool {
        (self.0 & Self::TENTATIVE_BIT) != 0
    }

    /// Get the raw control value
    #[inline]
    pub const fn control(&self) -> u64 {
        self.0
    }
}

impl PartialEq for HashBucketEntry {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for HashBucketEntry {}

impl std::fmt::Debug for HashBucketEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashBucketEntry")
            .field("address", &self.address())
            .field("tag", &self.tag())
            .field("tentative", &self.is_tentative())
            .finish()
    }
}

/// Atomic hash bucket slot, supporting compare-and-swap
#[repr(transparent)]
pub struct AtomicHashBucketEntry {
    control: AtomicU64,
}

impl AtomicHashBucketEntry {
    /// Create a new atomic entry
    #[inline]
    pub const fn new(entry: HashBucketEntry) -> Self {
        Self {
            control: AtomicU64::new(entry.0),
        }
    }

    /// Create a new invalid/empty entry
    #[inline]
    pub const fn invalid() -> Self {
        Self {
            control: AtomicU64::new(0),
        }
    }

    /// Load the entry atomically
    #[inline]
    pub fn load(&self, ordering: Ordering) -> HashBucketEntry {
        HashBucketEntry(self.control.load(ordering))
    }

    /// Store an entry atomically
    #[inline]
    pub fn store(&self, entry: HashBucketEntry, ordering: Ordering) {
        self.control.store(entry.0, ordering);
    }

    /// Compare and exchange
    #[inline]
    pub fn compare_exchange(
        &self,
        current: HashBucketEntry,
        new: HashBucketEntry,
        success: Ordering,
        failure: Ordering,
    ) -> Result<HashBucketEntry, HashBucketEntry> {
        self.control
            .compare_exchange(current.0, new.0, success, failure)
            .map(HashBucketEntry)
            .map_err(HashBucketEntry)
    }

    /// Compare and exchange (weak version)
    #[inline]
    pub fn compare_exchange_weak(
        &self,
        current: HashBucketEntry,
        new: HashBucketEntry,
        success: Ordering,
        failure: Ordering,
    ) -> Result<HashBucketEntry, HashBucketEntry> {
        self.control
            .compare_exchange_weak(current.0, new.0, success, failure)
            .map(HashBucketEntry)
            .map_err(HashBucketEntry)
    }
}

impl Default for AtomicHashBucketEntry {
    fn default() -> Self {
        Self::invalid()
    }
}

impl std::fmt::Debug for AtomicHashBucketEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicHashBucketEntry")
            .field("entry", &self.load(Ordering::Relaxed))
            .finish()
    }
}

/// One cache line of atomic slots, the unit the hash table hands out.
#[repr(C, align(64))]
pub struct HashBucket {
    /// Hash bucket slots
    pub entries: [AtomicHashBucketEntry; Self::NUM_ENTRIES],
}

impl HashBucket {
    /// Number of slots per bucket
    pub const NUM_ENTRIES: usize = 8;

    /// Create a new empty hash bucket
    pub const fn new() -> Self {
        Self {
            entries: [
                AtomicHashBucketEntry::invalid(),
                AtomicHashBucketEntry::invalid(),
                AtomicHashBucketEntry::invalid(),
                AtomicHashBucketEntry::invalid(),
                AtomicHashBucketEntry::invalid(),
                AtomicHashBucketEntry::invalid(),
                AtomicHashBucketEntry::invalid(),
                AtomicHashBucketEntry::invalid(),
            ],
        }
    }
}

impl Default for HashBucket {
    fn default() -> Self {
        Self::new()
    }
}

// A bucket must fit exactly in a cache line.
const _: () = assert!(mem::size_of::<HashBucket>() == CACHE_LINE_BYTES);
