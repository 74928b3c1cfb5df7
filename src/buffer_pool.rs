//! Lock-free pool of receive buffers shared by every manager

use bytes::BytesMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;

/// Pool of reusable `BytesMut` buffers backed by crossbeam-queue
pub struct BufferPool {
    pool: crossbeam_queue::ArrayQueue<BytesMut>,
    buffer_size: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl BufferPool {
    pub fn new(max_size: usize, buffer_size: usize) -> Self {
        Self {
            pool: crossbeam_queue::ArrayQueue::new(max_size),
            buffer_size,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Get an empty buffer, reusing a pooled one when available
    pub fn try_get(&self) -> BytesMut {
        match self.pool.pop() {
            Some(buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(self.buffer_size)
            }
        }
    }

    /// Return a buffer; off-size buffers and overflow are dropped
    pub fn try_put(&self, mut buf: BytesMut) {
        if buf.capacity() >= self.buffer_size / 2 && buf.capacity() <= self.buffer_size * 2 {
            buf.clear();
            let _ = self.pool.push(buf);
        }
    }

    /// Pool statistics (hits, misses, pooled)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.pool.len(),
        )
    }
}

// Default recv_buffer_size lands in the large tier; tiny configured buffers in the small one.
static SMALL_BUFFER_POOL: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::new(256, 2048));
static LARGE_BUFFER_POOL: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::new(64, 65536));

/// Get a zero-filled buffer of exactly `size` bytes for a socket read.
pub fn recv_buffer(size: usize) -> BytesMut {
    let mut buf = if size <= 2048 {
        SMALL_BUFFER_POOL.try_get()
    } else {
        LARGE_BUFFER_POOL.try_get()
    };
    buf.resize(size, 0);
    buf
}

/// Hand a buffer from [`recv_buffer`] back for reuse.
pub fn recycle(buf: BytesMut) {
    if buf.capacity() <= 4096 {
        SMALL_BUFFER_POOL.try_put(buf);
    } else {
        LARGE_BUFFER_POOL.try_put(buf);
    }
}

/// Get buffer pool statistics for monitoring
pub fn buffer_pool_stats() -> Vec<(&'static str, (usize, usize, usize))> {
    vec![
        ("small", SMALL_BUFFER_POOL.stats()),
        ("large", LARGE_BUFFER_POOL.stats()),
    ]
}
