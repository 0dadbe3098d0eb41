//! Reusable byte buffers for the datagram path.
//!
//! The salient points are:
//!
//! * receive buffers are borrowed from a recycling [`pool::BufferPool`] and
//!   find their way back into it on every exit path
//! * a buffer that must outlive the receive call (because the reassembly
//!   keeps fragments of it) is frozen into shared-ownership
//!   [`view::BufferView`]s; the storage returns to the pool when the last
//!   view is dropped
//! * storage is grown eagerly-initialized once and reused without re-zeroing,
//!   trading initialization overhead for simplicity

pub mod pool;
pub mod view;
