use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use once_cell::sync::Lazy;

/// Free buffers kept around per pool. Anything returned beyond this is
/// simply dropped.
const MAX_FREE_BUFFERS: usize = 16;

static SHARED: Lazy<ChunkPool> = Lazy::new(ChunkPool::new);

/// Lends reusable byte buffers to the pull adapters.
///
/// Renting hands out a [`PooledBuffer`] guard; dropping the guard returns
/// the memory, so the return happens exactly once on every exit path,
/// including errors and a consumer that stops listening halfway.
///
/// The pool is purely an allocation optimisation. A buffer that is never
/// returned (for example because it was detached) is freed normally.
#[derive(Clone, Default)]
pub struct ChunkPool {
    inner: Arc<PoolInner>,
}

#[derive(Default)]
struct PoolInner {
    free_list: Mutex<Vec<Vec<u8>>>,
    rented: AtomicUsize,
    returned: AtomicUsize,
    reused: AtomicUsize,
    allocated: AtomicUsize,
}

/// Snapshot of the pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub rented: usize,
    pub returned: usize,
    pub reused: usize,
    pub allocated: usize,
}

impl PoolStats {
    /// Buffers currently out on loan.
    pub fn outstanding(&self) -> usize {
        self.rented.saturating_sub(self.returned)
    }
}

impl ChunkPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide pool used by the byte sources.
    pub fn shared() -> &'static ChunkPool {
        &SHARED
    }

    /// Rents a zero-filled buffer of exactly `size` bytes.
    pub fn rent(&self, size: usize) -> PooledBuffer {
        let reused = {
            let mut free_list = self
                .inner
                .free_list
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            free_list
                .iter()
                .position(|buf| buf.capacity() >= size)
                .map(|index| free_list.swap_remove(index))
        };

        let mut buffer = match reused {
            Some(buf) => {
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                log::trace!("pool: reusing buffer of {} bytes", buf.capacity());
                buf
            }
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                log::trace!("pool: allocating buffer of {} bytes", size);
                Vec::with_capacity(size)
            }
        };
        buffer.clear();
        buffer.resize(size, 0);
        self.inner.rented.fetch_add(1, Ordering::Relaxed);

        PooledBuffer {
            data: buffer,
            pool: Some(self.clone()),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            rented: self.inner.rented.load(Ordering::Relaxed),
            returned: self.inner.returned.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            allocated: self.inner.allocated.load(Ordering::Relaxed),
        }
    }

    fn give_back(&self, mut buffer: Vec<u8>) {
        self.inner.returned.fetch_add(1, Ordering::Relaxed);
        buffer.clear();
        let mut free_list = self
            .inner
            .free_list
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if free_list.len() < MAX_FREE_BUFFERS {
            free_list.push(buffer);
        }
    }
}

/// A buffer on loan from a [`ChunkPool`], returned when dropped.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Option<ChunkPool>,
}

impl PooledBuffer {
    /// Wraps memory that does not belong to any pool.
    pub fn detached(data: Vec<u8>) -> Self {
        Self { data, pool: None }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(std::mem::take(&mut self.data));
        }
    }
}
