//! Message-oriented communication over UDP: arbitrary-size messages are
//! transparently split into datagrams on the sender and reassembled on the
//! receiver, in whatever order the datagrams arrive.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *messages* (defined-length chunks
//!   of data) rather than streams of bytes or single datagrams
//! * A message either arrives completely or not at all - incomplete
//!   reassemblies are expired after a configurable age, and duplicated or
//!   malformed datagrams are rejected without disturbing intact ones
//! * Fragments of one message may arrive in any order; the reassembled
//!   message always has the sender's byte order
//! * Zero-copy where the datagram boundary allows it: send-side fragments
//!   reference the caller's buffers, receive-side fragments are
//!   shared-ownership views into pooled receive buffers
//! * Explicitly *not* a reliability layer: no retransmission, no
//!   acknowledgement, no flow or congestion control, no encryption. Lost
//!   datagrams mean a lost message, nothing more
//! * A 4-byte deployment-configured magic distinguishes this protocol's
//!   traffic from anything else arriving on the port
//!
//! ## Wire format
//!
//! Every datagram starts with a 24-byte header; all multi-byte fields are
//! little-endian:
//!
//! ```ascii
//!  0: magic (4 bytes)     deployment identifier, must match on both sides
//!  4: version (u8)        must be 5
//!  5: reserved (3 bytes)  sent as 0, never evaluated by receivers
//!  8: kind (u32)          1: fragment-info, 2: fragment, 3: non-fragmented
//! 12: id (i32)            matches fragments to their fragment-info;
//!                         -1 for non-fragmented datagrams
//! 16: num (u32)           fragment-info: total number of fragments
//!                         fragment: index of this fragment (0-based)
//!                         non-fragmented: 1
//! 20: len (u32)           fragment-info: total message length (no own body)
//!                         fragment / non-fragmented: body length
//! ```
//!
//! A message that fits into a single datagram is sent as one non-fragmented
//! datagram. Anything bigger becomes a fragment-info announcing fragment
//! count and total length, followed by the fragments. The receiver keeps one
//! reassembly record per `(sender endpoint, message id)`, so interleaved
//! messages from many senders do not interfere.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn example() -> fragudp::Result<()> {
//! use tokio::net::UdpSocket;
//!
//! let socket = fragudp::Socket::new(UdpSocket::bind("0.0.0.0:14000").await?, *b"ECAL");
//!
//! let destination = "10.0.0.5:14000".parse().unwrap();
//! socket.send_to(&[b"Hello World!".as_slice()], destination).await?;
//!
//! let (message, sender) = socket.receive_from().await?;
//! println!("{} bytes from {}", message.len(), sender);
//! # Ok(())
//! # }
//! ```

pub mod buffers;
pub mod config;
pub mod error;
pub mod protocol;
pub mod socket;
pub mod transport;

pub use buffers::pool::{BufferPool, PooledBuffer};
pub use buffers::view::BufferView;
pub use config::SocketConfig;
pub use error::{Error, Result};
pub use socket::{Socket, MAX_UDP_DATAGRAM_SIZE};
pub use transport::Transport;
