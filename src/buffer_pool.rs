//! Pinned, sector-aligned buffers for direct record I/O
//!
//! A [`PinnedBuffer`] is exclusively owned: it is never duplicated, only
//! moved. When a continuation is deep-copied, the buffer is moved into the
//! copy and the source handle is left empty. Dropping a buffer returns it to
//! its pool (if the pool is still alive), so the release half of the
//! `acquire`/`release` contract is implicit.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::utility::is_power_of_two;

/// Raw sector-aligned allocation.
struct RawBuffer {
    ptr: NonNull<u8>,
    size: usize,
    alignment: usize,
}

impl RawBuffer {
    fn zeroed(alignment: usize, size: usize) -> Option<Self> {
        debug_assert!(is_power_of_two(alignment as u64));
        debug_assert!(size > 0);

        let layout = Layout::from_size_align(size, alignment).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            size,
            alignment,
        })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        // Matches the layout used in `zeroed`.
        let layout = Layout::from_size_align(self.size, self.alignment)
            .expect("layout was valid at allocation time");
        unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
}

// Safety: RawBuffer exclusively owns its allocation.
unsafe impl Send for RawBuffer {}
unsafe impl Sync for RawBuffer {}

/// A pinned buffer checked out from a [`PinnedBufferPool`].
///
/// Returns to the pool on drop. A buffer handle may be empty after its
/// contents were moved into a deep copy; `is_empty` reports that state.
pub struct PinnedBuffer {
    raw: Option<RawBuffer>,
    pool: Option<Weak<PoolShared>>,
}

impl PinnedBuffer {
    /// Create a standalone buffer not backed by a pool
    pub fn standalone(size: usize, alignment: usize) -> Option<Self> {
        RawBuffer::zeroed(alignment, size).map(|raw| Self {
            raw: Some(raw),
            pool: None,
        })
    }

    /// Get a slice of the buffer (empty if the handle is empty)
    pub fn as_slice(&self) -> &[u8] {
        self.raw.as_ref().map_or(&[], |b| b.as_slice())
    }

    /// Get a mutable slice of the buffer
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.raw.as_mut().map_or(&mut [], |b| b.as_mut_slice())
    }

    /// Get the buffer size in bytes
    pub fn len(&self) -> usize {
        self.raw.as_ref().map_or(0, |b| b.size)
    }

    /// Check if the handle is empty (no allocation behind it)
    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Get the buffer alignment (0 if the handle is empty)
    pub fn alignment(&self) -> usize {
        self.raw.as_ref().map_or(0, |b| b.alignment)
    }
}

impl Drop for PinnedBuffer {
    fn drop(&mut self) {
        if let Some(weak) = self.pool.take() {
            if let Some(pool) = weak.upgrade() {
                if let Some(raw) = self.raw.take() {
                    pool.release(raw);
                }
            }
        }
    }
}

impl std::fmt::Debug for PinnedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedBuffer")
            .field("len", &self.len())
            .field("empty", &self.is_empty())
            .finish()
    }
}

struct PoolShared {
    free: Mutex<Vec<RawBuffer>>,
    buffer_size: usize,
    alignment: usize,
    max_pooled: usize,
}

impl PoolShared {
    fn release(&self, raw: RawBuffer) {
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(raw);
        }
        // Otherwise the allocation is simply freed.
    }
}

/// Pool of sector-aligned buffers for direct record I/O.
///
/// Pre-allocates buffers and reuses them to avoid repeated aligned
/// allocation on the read path.
pub struct PinnedBufferPool {
    shared: Arc<PoolShared>,
}

impl PinnedBufferPool {
    /// Create a new buffer pool
    ///
    /// # Arguments
    /// * `buffer_size` - Size of each buffer in bytes
    /// * `alignment` - Required alignment (typically the sector size, 512 or 4096)
    /// * `initial_count` - Number of buffers to pre-allocate
    /// * `max_pooled` - Maximum number of free buffers retained
    pub fn new(
        buffer_size: usize,
        alignment: usize,
        initial_count: usize,
        max_pooled: usize,
    ) -> Self {
        let mut free = Vec::with_capacity(initial_count);
        for _ in 0..initial_count {
            if let Some(raw) = RawBuffer::zeroed(alignment, buffer_size) {
                free.push(raw);
            }
        }

        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                buffer_size,
                alignment,
                max_pooled,
            }),
        }
    }

    /// Acquire a buffer from the pool, allocating a new one if none is free.
    ///
    /// Returns `None` only if the allocation itself fails.
    pub fn acquire(&self) -> Option<PinnedBuffer> {
        let raw = {
            let mut free = self.shared.free.lock();
            free.pop()
        };

        let raw = match raw {
            Some(raw) => raw,
            None => RawBuffer::zeroed(self.shared.alignment, self.shared.buffer_size)?,
        };

        Some(PinnedBuffer {
            raw: Some(raw),
            pool: Some(Arc::downgrade(&self.shared)),
        })
    }

    /// Number of currently pooled free buffers
    pub fn available(&self) -> usize {
        self.shared.free.lock().len()
    }

    /// Configured buffer size
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Configured alignment
    pub fn alignment(&self) -> usize {
        self.shared.alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation() {
        let pool = PinnedBufferPool::new(4096, 512, 4, 8);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.buffer_size(), 4096);
        assert_eq!(pool.alignment(), 512);
    }

    #[test]
    fn test_acquire_and_release_on_drop() {
        let pool = PinnedBufferPool::new(4096, 512, 2, 4);
        assert_eq!(pool.available(), 2);

        {
            let buf = pool.acquire().unwrap();
            assert_eq!(buf.len(), 4096);
            assert_eq!(pool.available(), 1);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_pool_grows_on_demand() {
        let pool = PinnedBufferPool::new(4096, 512, 1, 4);
        let _a = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);
        let _b = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_pool_retention_limit() {
        let pool = PinnedBufferPool::new(4096, 512, 0, 2);

        let bufs: Vec<_> = (0..5).filter_map(|_| pool.acquire()).collect();
        assert_eq!(pool.available(), 0);

        drop(bufs);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_buffer_alignment_and_zeroing() {
        let pool = PinnedBufferPool::new(1024, 512, 1, 2);
        let mut buf = pool.acquire().unwrap();
        assert_eq!(buf.as_slice().as_ptr() as usize % 512, 0);
        assert!(buf.as_slice().iter().all(|&b| b == 0));

        buf.as_mut_slice()[0] = 42;
        assert_eq!(buf.as_slice()[0], 42);
    }

    #[test]
    fn test_standalone_buffer() {
        let buf = PinnedBuffer::standalone(1024, 64).unwrap();
        assert_eq!(buf.len(), 1024);
        assert!(!buf.is_empty());
        assert_eq!(buf.alignment(), 64);
    }

    #[test]
    fn test_drop_after_pool_gone() {
        let pool = PinnedBufferPool::new(256, 64, 1, 2);
        let buf = pool.acquire().unwrap();
        drop(pool);
        // Buffer outlives the pool; dropping it must simply free the memory.
        drop(buf);
    }
}
