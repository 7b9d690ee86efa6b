// SPDX-License-Identifier: GPL-3.0-only

//! Bounded buffer pool
//!
//! A pool hands out at most `capacity` leases at a time. Each lease owns a
//! byte vector that goes back to the pool's free list when the lease is
//! dropped, so memory is reused across frames instead of reallocated. When
//! every slot is leased out, `acquire` fails and the producer drops the frame:
//! slow consumers degrade into frame loss, never into unbounded growth.
//!
//! The pool mutex is only held inside `acquire` and the lease drop, never
//! while a consumer is looking at a buffer.

use crate::util::lock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

struct PoolState {
    /// Reusable storage of returned leases
    free: Vec<Vec<u8>>,
    /// Leases currently handed out
    outstanding: usize,
}

struct PoolInner {
    name: String,
    capacity: usize,
    state: Mutex<PoolState>,
    acquired: AtomicU64,
    exhausted: AtomicU64,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub capacity: usize,
    pub outstanding: usize,
    /// Successful acquisitions since creation
    pub acquired: u64,
    /// Acquisitions refused because every slot was leased
    pub exhausted: u64,
}

/// A bounded pool of reusable byte buffers
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool with `capacity` slots (at least one)
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                capacity,
                state: Mutex::new(PoolState {
                    free: Vec::with_capacity(capacity),
                    outstanding: 0,
                }),
                acquired: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Lease a slot whose storage is `len` zeroed bytes
    ///
    /// Returns `None` when every slot is in use.
    pub fn acquire(&self, len: usize) -> Option<PoolLease> {
        let mut data = {
            let mut state = lock(&self.inner.state);
            if state.outstanding >= self.inner.capacity {
                drop(state);
                self.inner.exhausted.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            state.outstanding += 1;
            state.free.pop().unwrap_or_default()
        };
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);

        data.clear();
        data.resize(len, 0);
        Some(PoolLease {
            pool: Arc::clone(&self.inner),
            data,
        })
    }

    /// Lease a slot without storage (GPU frames still occupy a slot)
    pub fn acquire_slot(&self) -> Option<PoolLease> {
        self.acquire(0)
    }

    pub fn outstanding(&self) -> usize {
        lock(&self.inner.state).outstanding
    }

    pub fn available(&self) -> usize {
        self.inner.capacity - self.outstanding()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.inner.capacity,
            outstanding: self.outstanding(),
            acquired: self.inner.acquired.load(Ordering::Relaxed),
            exhausted: self.inner.exhausted.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// One leased pool slot
///
/// The slot returns to its pool when the lease is dropped, from any thread.
/// The pool outlives its owner for as long as leases exist, so storage stays
/// valid even after the stream that produced it has been closed.
pub struct PoolLease {
    pool: Arc<PoolInner>,
    data: Vec<u8>,
}

impl PoolLease {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Resize the storage, e.g. after writing variable-size compressed data
    pub fn resize(&mut self, len: usize) {
        self.data.resize(len, 0);
    }

    /// Replace the contents with `bytes`, reusing the allocation
    pub fn copy_from(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        let mut state = lock(&self.pool.state);
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.free.len() < self.pool.capacity {
            state.free.push(data);
        }
        trace!(pool = %self.pool.name, outstanding = state.outstanding, "Pool slot returned");
    }
}

impl fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolLease({}, {} bytes)", self.pool.name, self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_enforced() {
        let pool = BufferPool::new("test", 2);
        let a = pool.acquire(16).unwrap();
        let _b = pool.acquire(16).unwrap();
        assert!(pool.acquire(16).is_none());
        assert_eq!(pool.stats().exhausted, 1);

        drop(a);
        assert!(pool.acquire(16).is_some());
    }

    #[test]
    fn test_storage_is_reused() {
        let pool = BufferPool::new("reuse", 1);
        let lease = pool.acquire(4096).unwrap();
        let ptr = lease.as_slice().as_ptr();
        drop(lease);

        let lease = pool.acquire(1024).unwrap();
        assert_eq!(lease.as_slice().as_ptr(), ptr);
        assert_eq!(lease.len(), 1024);
        assert!(lease.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_release_from_other_thread() {
        let pool = BufferPool::new("threads", 1);
        let lease = pool.acquire(8).unwrap();
        std::thread::spawn(move || drop(lease)).join().unwrap();
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_lease_outlives_pool_handle() {
        let pool = BufferPool::new("orphan", 1);
        let mut lease = pool.acquire(3).unwrap();
        drop(pool);
        lease.copy_from(&[1, 2, 3, 4]);
        assert_eq!(lease.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let pool = BufferPool::new("clamped", 0);
        assert_eq!(pool.capacity(), 1);
        assert!(pool.acquire_slot().is_some());
    }
}
