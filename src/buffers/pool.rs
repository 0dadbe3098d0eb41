use std::mem;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::buffers::view::BufferView;

/// A thread-safe bag of recycled byte buffers.
///
/// `allocate()` hands out a [`PooledBuffer`] whose drop returns the storage,
/// so a borrowed buffer cannot leave the pool's custody without going through
/// the return logic. There are no size classes: any returned buffer serves
/// any later allocation, and buffers keep whatever capacity they grew to.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> BufferPool {
        BufferPool {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Get a buffer with length 0. Capacity (and content beyond the length
    /// marker) is whatever the recycled buffer brought along.
    pub fn allocate(&self) -> PooledBuffer {
        let buf = {
            let mut buffers = self.inner.buffers.lock().expect("buffer pool poisoned");
            buffers.pop()
        };

        let buf = match buf {
            Some(buf) => {
                trace!("reusing buffer from pool");
                buf
            }
            None => {
                debug!("no buffer in pool: creating new buffer");
                Vec::new()
            }
        };

        PooledBuffer {
            inner: Recycled {
                buf,
                len: 0,
                pool: self.inner.clone(),
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn pooled_count(&self) -> usize {
        self.inner.buffers.lock().unwrap().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new()
    }
}

impl PoolInner {
    fn put(&self, buf: Vec<u8>) {
        trace!("returning buffer to pool");
        let mut buffers = self.buffers.lock().expect("buffer pool poisoned");
        buffers.push(buf);
    }
}

/// The storage behind a pooled buffer: a fully initialized `Vec<u8>` plus a
/// separate length marker, so reused buffers can be resized without
/// re-zeroing. Returns the storage to its pool when dropped.
pub(crate) struct Recycled {
    buf: Vec<u8>,
    len: usize,
    pool: Arc<PoolInner>,
}

impl Recycled {
    pub(crate) fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Drop for Recycled {
    fn drop(&mut self) {
        // storage that never allocated is not worth pooling
        if self.buf.capacity() > 0 {
            self.pool.put(mem::take(&mut self.buf));
        }
    }
}

/// Scoped handle to a pool-owned buffer with an independent capacity/length
/// split. Exactly one `PooledBuffer` exists per buffer; shared read access
/// requires freezing it into a [`BufferView`] first.
///
/// Bytes between a previous length and a new one after [`resize`] are
/// unspecified (they hold whatever an earlier user wrote): write before read.
///
/// [`resize`]: PooledBuffer::resize
pub struct PooledBuffer {
    inner: Recycled,
}

impl PooledBuffer {
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.buf.len()
    }

    /// Grow the underlying storage to at least `n` bytes. The length marker
    /// is unaffected.
    pub fn reserve(&mut self, n: usize) {
        if n > self.inner.buf.len() {
            self.inner.buf.resize(n, 0);
        }
    }

    /// Set the buffer length, growing the storage if needed. Shrinking only
    /// moves the length marker.
    pub fn resize(&mut self, n: usize) {
        self.reserve(n);
        self.inner.len = n;
    }

    pub fn clear(&mut self) {
        self.inner.len = 0;
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        let new_len = self.inner.len + data.len();
        self.reserve(new_len);
        self.inner.buf[self.inner.len..new_len].copy_from_slice(data);
        self.inner.len = new_len;
    }

    pub fn as_slice(&self) -> &[u8] {
        self.inner.data()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.inner.buf[..self.inner.len]
    }

    /// Give up mutable access and turn the buffer into a shared-ownership
    /// view covering its current length. The storage returns to the pool
    /// when the last view (or sub-view) is dropped.
    pub fn freeze(self) -> BufferView {
        let len = self.inner.len;
        BufferView::whole(Arc::new(self.inner), len)
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for PooledBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}
