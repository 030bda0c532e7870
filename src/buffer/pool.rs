//! Reusable byte buffers for socket reads and body segments.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared pool of fixed-size byte buffers.
///
/// Cloning the pool hands out another handle to the same free list.
#[derive(Clone, Debug)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buffer_size: usize,
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool handing out `buffer_size` byte buffers and retaining at
    /// most `capacity` returned buffers.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        assert!(buffer_size > 0, "buffer size must be non-zero");

        Self {
            inner: Arc::new(PoolInner {
                buffer_size,
                capacity,
                free: Mutex::new(Vec::with_capacity(capacity)),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Checks a zeroed buffer out of the pool, allocating when the free list
    /// is empty.
    pub fn rent(&self) -> PooledBuffer {
        let buf = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0; self.inner.buffer_size]);

        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);

        PooledBuffer {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Relaxed)
    }

    /// Number of buffers waiting on the free list.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    fn give_back(&self, mut buf: Vec<u8>) {
        self.inner.outstanding.fetch_sub(1, Ordering::Relaxed);

        // Grown buffers go back to the allocator.
        if buf.len() != self.inner.buffer_size {
            return;
        }

        let mut free = self.inner.free.lock();
        if free.len() < self.inner.capacity {
            buf.fill(0);
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new(4096, 64)
    }
}

/// A buffer on loan from a [`BufferPool`]; returned when dropped.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: BufferPool,
}

impl PooledBuffer {
    /// Doubles the buffer, keeping its contents.
    pub fn grow(&mut self) {
        if let Some(buf) = self.buf.as_mut() {
            let len = buf.len();
            buf.resize(len * 2, 0);
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_reused() {
        let pool = BufferPool::new(16, 2);
        {
            let mut a = pool.rent();
            a[0] = 7;
            assert_eq!(pool.outstanding(), 1);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.available(), 1);

        let b = pool.rent();
        assert_eq!(b.len(), 16);
        assert_eq!(b[0], 0);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn grown_buffers_are_not_retained() {
        let pool = BufferPool::new(8, 4);
        let mut buf = pool.rent();
        buf.grow();
        assert_eq!(buf.len(), 16);
        drop(buf);
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn free_list_is_bounded() {
        let pool = BufferPool::new(8, 1);
        let a = pool.rent();
        let b = pool.rent();
        drop(a);
        drop(b);
        assert_eq!(pool.available(), 1);
    }
}
