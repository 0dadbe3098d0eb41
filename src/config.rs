use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::header::Header;

/// Tunables of a framed socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Maximum size of a single UDP datagram this socket emits, header
    /// included. Messages that don't fit are fragmented.
    ///
    /// The default of 1448 keeps each datagram inside a full Ethernet frame
    /// with room to spare for optional IP headers. There is no MTU discovery:
    /// choosing this too big silently loses datagrams on constrained routes,
    /// choosing it too small wastes bandwidth. The value must leave room for
    /// at least one payload byte after the header.
    pub max_datagram_size: usize,

    /// How long an incomplete reassembly is kept alive. Records whose last
    /// activity is older than this are evicted before each incoming datagram
    /// is processed.
    pub max_reassembly_age: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            max_datagram_size: 1448,
            max_reassembly_age: Duration::from_secs(5),
        }
    }
}

impl SocketConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_datagram_size <= Header::SERIALIZED_LEN {
            return Err(Error::InvalidConfiguration(format!(
                "max_datagram_size of {} cannot hold the {}-byte header plus payload",
                self.max_datagram_size,
                Header::SERIALIZED_LEN,
            )));
        }
        Ok(())
    }
}
