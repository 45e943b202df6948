//! Logical addresses into the append-only log
//!
//! An address identifies a page and an offset within that page. It uses 48
//! bits: 25 bits for the offset and 23 bits for the page number; the
//! remaining 16 bits of the word are reserved for the hash table.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// A logical address into the append-only log.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Hash)]
pub struct Address(u64);

impl Address {
    /// An invalid address, used when an address field needs to be initialized
    /// before a valid value is known.
    ///
    /// Note: set to 1, not 0, so that an invalid hash bucket entry (all
    /// zeros) is distinguishable from a valid entry that points to an
    /// invalid address.
    pub const INVALID: Self = Self(1);

    /// Total number of address bits used
    pub const ADDRESS_BITS: u32 = 48;

    /// Number of bits used for the offset within a page
    pub const OFFSET_BITS: u32 = 25;

    /// Number of bits used for the page number
    pub const PAGE_BITS: u32 = Self::ADDRESS_BITS - Self::OFFSET_BITS;

    /// Maximum valid offset within a page
    pub const MAX_OFFSET: u32 = (1 << Self::OFFSET_BITS) - 1;

    /// Maximum valid page number
    pub const MAX_PAGE: u32 = (1 << Self::PAGE_BITS) - 1;

    /// Maximum valid address value
    pub const MAX_ADDRESS: u64 = (1 << Self::ADDRESS_BITS) - 1;

    /// Create a new address from page and offset
    #[inline]
    pub const fn new(page: u32, offset: u32) -> Self {
        debug_assert!(page <= Self::MAX_PAGE);
        debug_assert!(offset <= Self::MAX_OFFSET);
        Self(((page as u64) << Self::OFFSET_BITS) | (offset as u64))
    }

    /// Create an address from a raw control value
    #[inline]
    pub const fn from_control(control: u64) -> Self {
        Self(control)
    }

    /// Get the page number
    #[inline]
    pub const fn page(&self) -> u32 {
        ((self.0 >> Self::OFFSET_BITS) & ((1 << Self::PAGE_BITS) - 1)) as u32
    }

    /// Get the offset within the page
    #[inline]
    pub const fn offset(&self) -> u32 {
        (self.0 & ((1 << Self::OFFSET_BITS) - 1)) as u32
    }

    /// Get the raw control value
    #[inline]
    pub const fn control(&self) -> u64 {
        self.0
    }

    /// Check if this is the invalid address
    #[inline]
    pub const fn is_invalid(&self) -> bool {
        self.0 == Self::INVALID.0
    }

    /// Check if this is a valid address
    #[inline]
    pub const fn is_valid(&self) -> bool {
        !self.is_invalid()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("page", &self.page())
            .field("offset", &self.offset())
            .field("control", &self.0)
            .finish()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page(), self.offset())
    }
}

impl PartialEq for Address {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Address {}

impl PartialOrd for Address {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add<u64> for Address {
    type Output = Self;

    #[inline]
    fn add(self, delta: u64) -> Self::Output {
        debug_assert!(delta < u32::MAX as u64);
        Self(self.0 + delta)
    }
}

impl Sub for Address {
    type Output = u64;

    #[inline]
    fn sub(self, other: Self) -> Self::Output {
        self.0 - other.0
    }
}

impl From<u64> for Address {
    #[inline]
    fn from(control: u64) -> Self {
        Self(control)
    }
}

impl From<Address> for u64 {
    #[inline]
    fn from(addr: Address) -> Self {
        addr.0
    }
}

/// Atomic version of [`Address`] for thread-safe operations
#[repr(transparent)]
pub struct AtomicAddress {
    control: AtomicU64,
}

impl AtomicAddress {
    /// Create a new atomic address
    #[inline]
    pub const fn new(address: Address) -> Self {
        Self {
            control: AtomicU64::new(address.0),
        }
    }

    /// Load the address atomically
    #[inline]
    pub fn load(&self, ordering: AtomicOrdering) -> Address {
        Address(self.control.load(ordering))
    }

    /// Store an address atomically
    #[inline]
    pub fn store(&self, address: Address, ordering: AtomicOrdering) {
        self.control.store(address.0, ordering);
    }

    /// Compare and exchange the address atomically
    #[inline]
    pub fn compare_exchange(
        &self,
        current: Address,
        new: Address,
        success: AtomicOrdering,
        failure: AtomicOrdering,
    ) -> Result<Address, Address> {
        self.control
            .compare_exchange(current.0, new.0, success, failure)
            .map(Address)
            .map_err(Address)
    }
}

impl Default for AtomicAddress {
    fn default() -> Self {
        Self::new(Address::default())
    }
}

impl fmt::Debug for AtomicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.load(AtomicOrdering::Relaxed);
        f.debug_struct("AtomicAddress")
            .field("address", &addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_new() {
        let addr = Address::new(10, 1000);
        assert_eq!(addr.page(), 10);
        assert_eq!(addr.offset(), 1000);
    }

    #[test]
    fn test_address_invalid() {
        assert!(Address::INVALID.is_invalid());
        assert!(!Address::new(0, 0).is_invalid());
        assert!(Address::new(0, 100).is_valid());
    }

    #[test]
    fn test_address_ordering() {
        let a1 = Address::new(1, 100);
        let a2 = Address::new(1, 200);
        let a3 = Address::new(2, 0);

        assert!(a1 < a2);
        assert!(a2 < a3);
    }

    #[test]
    fn test_address_arithmetic() {
        let addr = Address::new(0, 100);
        let addr2 = addr + 50;
        assert_eq!(addr2.offset(), 150);
        assert_eq!(addr2 - addr, 50);
    }

    #[test]
    fn test_atomic_address() {
        let atomic = AtomicAddress::new(Address::new(5, 500));

        let loaded = atomic.load(AtomicOrdering::Relaxed);
        assert_eq!(loaded.page(), 5);
        assert_eq!(loaded.offset(), 500);

        atomic.store(Address::new(10, 1000), AtomicOrdering::Relaxed);
        assert_eq!(atomic.load(AtomicOrdering::Relaxed), Address::new(10, 1000));
    }

    #[test]
    fn test_atomic_address_cas() {
        let atomic = AtomicAddress::new(Address::new(1, 1));
        let result = atomic.compare_exchange(
            Address::new(1, 1),
            Address::new(2, 2),
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
        );
        assert!(result.is_ok());
        assert_eq!(atomic.load(AtomicOrdering::Acquire), Address::new(2, 2));
    }
}
