//! Power-of-two sized, reference-counted buffer pool.
//!
//! Buffers underpin every I/O path in the crate: the wire framer borrows them
//! to build outbound messages, the stream abstraction borrows them to read
//! inbound ones. Pooling keeps steady-state allocation bounded under load.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Sub-pools are indexed `0..=CEILING_EXP`, sub-pool `i` producing buffers of
/// capacity `2^i`. `2^24` bytes (16 MiB) is the largest pooled size; larger
/// requests are served one-shot and never returned to a sub-pool.
pub const CEILING_EXP: u32 = 24;
pub const CEILING_BYTES: usize = 1 << CEILING_EXP;

/// Rounds `n` up to the next power of two. `roundUpToPow2(n) >= n` always,
/// and `roundUpToPow2(n) < 2n` except at `n == 1` where they're equal.
pub fn round_up_to_pow2(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    n.next_power_of_two()
}

#[derive(Debug)]
struct SubPool {
    idle: Mutex<Vec<Vec<u8>>>,
}

impl SubPool {
    fn new() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
        }
    }

    fn take(&self, capacity: usize) -> Vec<u8> {
        let mut idle = self.idle.lock().expect("buffer sub-pool mutex poisoned");
        idle.pop().unwrap_or_else(|| vec![0u8; capacity])
    }

    fn give_back(&self, mut backing: Vec<u8>, capacity: usize) {
        backing.clear();
        backing.resize(capacity, 0);
        let mut idle = self.idle.lock().expect("buffer sub-pool mutex poisoned");
        idle.push(backing);
    }
}

/// Shared state behind every handle to the same logical buffer. The backing
/// storage lives here, not on `Buffer` itself, so that the handle which
/// happens to drop last (not necessarily the one created by `acquire`) is the
/// one that returns it to its sub-pool.
struct Inner {
    backing: Mutex<Option<Vec<u8>>>,
    capacity: usize,
    home: Option<(Arc<BufferPool>, u32)>,
    refs: AtomicUsize,
}

/// A reference-counted byte region. Little-endian by convention (all wire
/// integer fields are written/read with explicit `_le` methods regardless of
/// host endianness). `position`/`limit` delimit the logically valid window;
/// `capacity` is always a power of two for pooled buffers.
pub struct Buffer {
    inner: Arc<Inner>,
    position: usize,
    limit: usize,
}

impl Buffer {
    fn new_pooled(backing: Vec<u8>, limit: usize, pool: Arc<BufferPool>, sub_pool_index: u32) -> Self {
        let capacity = backing.len();
        Self {
            inner: Arc::new(Inner {
                backing: Mutex::new(Some(backing)),
                capacity,
                home: Some((pool, sub_pool_index)),
                refs: AtomicUsize::new(1),
            }),
            position: 0,
            limit,
        }
    }

    fn new_one_shot(capacity: usize, limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                backing: Mutex::new(Some(vec![0u8; capacity])),
                capacity,
                home: None,
                refs: AtomicUsize::new(1),
            }),
            position: 0,
            limit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_position(&mut self, position: usize) {
        assert!(position <= self.limit, "position beyond limit");
        self.position = position;
    }

    pub fn set_limit(&mut self, limit: usize) {
        assert!(limit <= self.inner.capacity, "limit beyond capacity");
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
    }

    /// Runs `f` against the valid `[0, limit)` window while the backing
    /// mutex is held, so a concurrent `retain()`'d handle can't mutate it
    /// underneath the borrow. `f` must not try to reacquire this buffer's
    /// lock (e.g. via another `with_slice`/`with_mut_slice` call on a
    /// handle sharing the same `Inner`).
    pub fn with_slice<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.inner.backing.lock().expect("buffer mutex poisoned");
        let backing = guard.as_ref().expect("buffer used after release");
        f(&backing[..self.limit])
    }

    pub fn with_mut_slice<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.inner.backing.lock().expect("buffer mutex poisoned");
        let backing = guard.as_mut().expect("buffer used after release");
        f(&mut backing[..self.limit])
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.with_slice(|slice| slice.to_vec())
    }

    /// Remaining unread/unwritten bytes between `position` and `limit`.
    pub fn remaining(&self) -> Vec<u8> {
        self.with_slice(|slice| slice[self.position..].to_vec())
    }

    /// Increments the reference count and returns a new handle sharing the
    /// same backing storage. Only the final release (of the original handle
    /// and every retained one) returns the buffer to its sub-pool.
    pub fn retain(&self) -> Buffer {
        self.inner.refs.fetch_add(1, Ordering::AcqRel);
        Buffer {
            inner: self.inner.clone(),
            position: self.position,
            limit: self.limit,
        }
    }

    #[cfg(test)]
    fn is_pooled(&self) -> bool {
        self.inner.home.is_some()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let previous = self.inner.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous >= 1, "buffer reference count released below zero");
        if previous != 1 {
            return;
        }
        if let Some((pool, idx)) = &self.inner.home {
            if let Some(backing) = self.inner.backing.lock().expect("buffer mutex poisoned").take() {
                pool.sub_pools[*idx as usize].give_back(backing, self.inner.capacity);
            }
        }
    }
}

/// The pool itself: an array of sub-pools indexed by `log2(capacity)`.
/// Sub-pools are unbounded (pruning disabled per spec) but bounded in
/// practice by application back-pressure.
#[derive(Debug)]
pub struct BufferPool {
    sub_pools: Vec<SubPool>,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        let sub_pools = (0..=CEILING_EXP).map(|_| SubPool::new()).collect();
        Arc::new(Self { sub_pools })
    }

    /// Acquires a buffer able to hold at least `size` bytes. Requests within
    /// `[0, CEILING_BYTES]` draw from (or create into) the matching sub-pool;
    /// larger requests are one-shot and not pooled. The returned buffer
    /// always has `position == 0` and `limit == size`, regardless of what the
    /// backing region previously held.
    pub fn acquire(self: &Arc<Self>, size: usize) -> Buffer {
        if size > CEILING_BYTES {
            return Buffer::new_one_shot(size, size);
        }
        if size == 0 {
            return Buffer::new_pooled(Vec::new(), 0, self.clone(), 0);
        }
        let capacity = round_up_to_pow2(size);
        let idx = capacity.trailing_zeros();
        let backing = self.sub_pools[idx as usize].take(capacity);
        Buffer::new_pooled(backing, size, self.clone(), idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_matches_invariants() {
        assert_eq!(round_up_to_pow2(1), 1);
        for n in [2usize, 3, 5, 17, 1023, 1 << 20] {
            let r = round_up_to_pow2(n);
            assert!(r >= n);
            assert!(r < 2 * n);
        }
    }

    #[test]
    fn acquire_yields_fresh_position_and_limit() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire(100);
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.limit(), 100);
        buf.set_position(50);
        drop(buf);

        let buf2 = pool.acquire(100);
        assert_eq!(buf2.position(), 0);
        assert_eq!(buf2.limit(), 100);
    }

    #[test]
    fn zero_size_buffer_is_supported() {
        let pool = BufferPool::new();
        let buf = pool.acquire(0);
        assert_eq!(buf.limit(), 0);
        assert_eq!(buf.to_vec().len(), 0);
    }

    #[test]
    fn oversized_request_is_not_pooled() {
        let pool = BufferPool::new();
        let buf = pool.acquire(CEILING_BYTES + 1);
        assert_eq!(buf.limit(), CEILING_BYTES + 1);
        assert!(!buf.is_pooled());
    }

    #[test]
    fn retain_and_release_returns_buffer_exactly_once() {
        let pool = BufferPool::new();
        let buf = pool.acquire(64);
        let idx = buf.capacity().trailing_zeros() as usize;
        assert!(pool.sub_pools[idx].idle.lock().unwrap().is_empty());

        let retained = buf.retain();
        drop(buf);
        // still one outstanding reference
        assert!(pool.sub_pools[idx].idle.lock().unwrap().is_empty());
        drop(retained);
        assert_eq!(pool.sub_pools[idx].idle.lock().unwrap().len(), 1);
    }

    #[test]
    fn writes_are_visible_through_retained_handle() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire(8);
        buf.with_mut_slice(|s| s.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]));
        let retained = buf.retain();
        drop(buf);
        assert_eq!(retained.to_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
