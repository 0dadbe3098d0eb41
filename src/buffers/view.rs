use std::borrow::Borrow;
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, Range};
use std::sync::Arc;

use crate::buffers::pool::Recycled;

/// An immutable view into pool-owned storage.
///
/// The view shares ownership of the backing buffer: cloning it or slicing it
/// bumps the owner's reference count, and the storage only returns to its
/// pool once the last view is gone. Views never alias-check and never mutate.
#[derive(Clone)]
pub struct BufferView {
    owner: Arc<Recycled>,
    offset: usize,
    len: usize,
}

impl BufferView {
    pub(crate) fn whole(owner: Arc<Recycled>, len: usize) -> BufferView {
        BufferView {
            owner,
            offset: 0,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A sub-view of `range` (relative to this view) sharing the same owner.
    ///
    /// Panics if the range is out of bounds, like slice indexing does.
    pub fn slice(&self, range: Range<usize>) -> BufferView {
        assert!(
            range.start <= range.end && range.end <= self.len,
            "slice {}..{} out of bounds for view of {} bytes",
            range.start,
            range.end,
            self.len
        );
        BufferView {
            owner: self.owner.clone(),
            offset: self.offset + range.start,
            len: range.end - range.start,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.owner.data()[self.offset..self.offset + self.len]
    }
}

impl Deref for BufferView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for BufferView {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Borrow<[u8]> for BufferView {
    fn borrow(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Debug for BufferView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_slice().fmt(f)
    }
}

impl PartialEq for BufferView {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice().eq(other.as_slice())
    }
}

impl Eq for BufferView {}
