//! Fixed-capacity pool of raw frame buffers.
//!
//! The device can only have `capacity` buffers in flight. A buffer that is
//! never released keeps its slot, so a consumer that holds on to frames
//! stalls the session once the pool is empty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::buffer::{FrameLayout, LockError, PixelStore};

/// Point-in-time view of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Maximum buffers in flight.
    pub capacity: usize,
    /// Buffers currently handed out.
    pub outstanding: usize,
    /// Successful pixel locks.
    pub locks: u64,
    /// Pixel unlocks.
    pub unlocks: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

#[derive(Debug)]
struct PoolInner {
    capacity: usize,
    state: Mutex<PoolState>,
    locks: AtomicU64,
    unlocks: AtomicU64,
}

/// Shared handle to a buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool allowing `capacity` buffers in flight.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                state: Mutex::new(PoolState::default()),
                locks: AtomicU64::new(0),
                unlocks: AtomicU64::new(0),
            }),
        }
    }

    /// Takes a zeroed buffer sized for `layout`, or `None` if the pool is exhausted.
    pub fn acquire(&self, layout: FrameLayout) -> Option<PooledStore> {
        let mut data = {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.outstanding >= self.inner.capacity {
                return None;
            }
            state.outstanding += 1;
            state.free.pop().unwrap_or_default()
        };

        data.clear();
        data.resize(layout.byte_len(), 0);

        Some(PooledStore {
            data,
            layout,
            locked: false,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Returns current usage counters.
    pub fn stats(&self) -> PoolStats {
        let outstanding = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outstanding;
        PoolStats {
            capacity: self.inner.capacity,
            outstanding,
            locks: self.inner.locks.load(Ordering::Relaxed),
            unlocks: self.inner.unlocks.load(Ordering::Relaxed),
        }
    }
}

/// A pixel store backed by a pool buffer. Dropping it returns the buffer.
#[derive(Debug)]
pub struct PooledStore {
    data: Vec<u8>,
    layout: FrameLayout,
    locked: bool,
    pool: Arc<PoolInner>,
}

impl PooledStore {
    /// Mutable access for the producer filling the frame.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl PixelStore for PooledStore {
    fn layout(&self) -> FrameLayout {
        self.layout
    }

    fn lock(&mut self) -> Result<(), LockError> {
        if self.locked {
            return Err(LockError("buffer is already locked".to_string()));
        }
        self.locked = true;
        self.pool.locks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn unlock(&mut self) {
        if self.locked {
            self.locked = false;
            self.pool.unlocks.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn base_address(&self) -> Option<&[u8]> {
        if self.locked {
            Some(&self.data)
        } else {
            None
        }
    }
}

impl Drop for PooledStore {
    fn drop(&mut self) {
        if self.locked {
            tracing::warn!("Pool buffer dropped while locked");
            self.unlock();
        }
        let data = std::mem::take(&mut self.data);
        let mut state = self.pool.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.outstanding = state.outstanding.saturating_sub(1);
        state.free.push(data);
    }
}
