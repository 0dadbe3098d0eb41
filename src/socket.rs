use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{span, trace, warn, Level};
use uuid::Uuid;

use crate::buffers::pool::BufferPool;
use crate::buffers::view::BufferView;
use crate::config::SocketConfig;
use crate::error::{Error, Result};
use crate::protocol::datagram_builder::{create_datagram_list, MessageIdSource};
use crate::protocol::header::{parse_common, PROTOCOL_VERSION};
use crate::protocol::reassembly::Reassembly;
use crate::transport::Transport;

/// The largest payload a UDP datagram can carry; receive buffers are sized
/// for it so no datagram is ever truncated.
pub const MAX_UDP_DATAGRAM_SIZE: usize = 65535;

/// A message-oriented socket on top of a datagram [`Transport`].
///
/// `send_to` fragments messages larger than the configured datagram size;
/// `receive_from` reassembles them on the other side. Malformed, duplicated
/// or unsupported datagrams are logged and dropped without interrupting the
/// receive loop; transport errors are returned.
///
/// The socket can be shared (all methods take `&self`), but concurrent
/// `receive_from` calls on the same socket compete for datagrams and should
/// be serialized by the caller.
pub struct Socket<T: Transport> {
    transport: T,
    pool: BufferPool,
    reassembly: Mutex<Reassembly>,
    message_ids: MessageIdSource,
    magic: [u8; 4],
    config: SocketConfig,
}

impl<T: Transport> Socket<T> {
    /// A framed socket with default settings (1448-byte datagrams, 5 second
    /// reassembly age). Sender and receiver must use the same magic bytes.
    pub fn new(transport: T, magic: [u8; 4]) -> Socket<T> {
        let pool = BufferPool::new();
        Socket {
            transport,
            reassembly: Mutex::new(Reassembly::new(pool.clone())),
            pool,
            message_ids: MessageIdSource::new(),
            magic,
            config: SocketConfig::default(),
        }
    }

    pub fn with_config(transport: T, magic: [u8; 4], config: SocketConfig) -> Result<Socket<T>> {
        config.validate()?;
        let mut socket = Socket::new(transport, magic);
        socket.config = config;
        Ok(socket)
    }

    pub fn set_max_datagram_size(&mut self, max_datagram_size: usize) {
        self.config.max_datagram_size = max_datagram_size;
    }

    pub fn get_max_datagram_size(&self) -> usize {
        self.config.max_datagram_size
    }

    pub fn set_max_reassembly_age(&mut self, max_reassembly_age: Duration) {
        self.config.max_reassembly_age = max_reassembly_age;
    }

    pub fn get_max_reassembly_age(&self) -> Duration {
        self.config.max_reassembly_age
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Send one message, given as a sequence of byte views that are
    /// transmitted as if concatenated.
    ///
    /// The message is split into datagrams as needed and the datagrams are
    /// transmitted strictly in list order; the first transport error aborts
    /// the remainder of the message and is returned. The socket stays usable
    /// afterwards, the receiver eventually evicts the partial message.
    ///
    /// Returns the total number of bytes handed to the transport, headers
    /// included.
    pub async fn send_to(
        &self,
        buffer_sequence: &[&[u8]],
        destination: SocketAddr,
    ) -> Result<usize> {
        let datagram_list = create_datagram_list(
            buffer_sequence,
            self.config.max_datagram_size,
            self.magic,
            &self.message_ids,
        )?;

        trace!(
            "sending {} datagram(s) to {}",
            datagram_list.len(),
            destination
        );

        let mut sent = 0;
        let mut send_buf = self.pool.allocate();
        for datagram in &datagram_list {
            datagram.write_into(&mut send_buf);
            sent += self
                .transport
                .send_to(send_buf.as_slice(), destination)
                .await?;
        }
        Ok(sent)
    }

    /// Receive datagrams until one of them completes a message, and return
    /// that message together with its sender.
    ///
    /// Datagrams that are malformed, duplicated, carry a foreign magic or an
    /// unsupported version are logged and skipped. Before each datagram is
    /// processed, reassembly state older than the configured age is evicted.
    pub async fn receive_from(&self) -> Result<(BufferView, SocketAddr)> {
        loop {
            let mut buffer = self.pool.allocate();
            buffer.resize(MAX_UDP_DATAGRAM_SIZE);

            let (bytes_received, from) = self.transport.recv_from(buffer.as_mut_slice()).await?;

            // On some platforms a blocking receive is only unblocked by a
            // socket shutdown, which manifests as a zero-byte datagram with a
            // default sender endpoint (and would do so on every subsequent
            // call). Treat it as the close it is instead of busy-looping.
            if bytes_received == 0 && is_default_endpoint(&from) {
                return Err(Error::SocketClosed);
            }

            buffer.resize(bytes_received);
            let datagram = buffer.freeze();

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "datagram_received", ?correlation_id);
            let _entered = span.enter();

            trace!("received {} byte datagram from {}", bytes_received, from);

            match self.handle_datagram(&datagram, from) {
                Ok(Some(message)) => return Ok((message, from)),
                Ok(None) => {} // fragment accepted, message not complete yet
                Err(e) if e.is_protocol_violation() => {
                    warn!("dropping datagram from {}: {}", from, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn close(&self) {
        self.transport.close();
    }

    fn handle_datagram(&self, datagram: &BufferView, from: SocketAddr) -> Result<Option<BufferView>> {
        let now = Instant::now();

        let mut reassembly = self.reassembly.lock().expect("reassembly state poisoned");

        if let Some(threshold) = now.checked_sub(self.config.max_reassembly_age) {
            reassembly.remove_older_than(threshold);
        }

        match parse_common(datagram, &self.magic)? {
            PROTOCOL_VERSION => reassembly.handle_datagram(datagram, from, now),
            other => Err(Error::UnsupportedProtocolVersion(other)),
        }
    }
}

fn is_default_endpoint(addr: &SocketAddr) -> bool {
    addr.ip().is_unspecified() && addr.port() == 0
}
