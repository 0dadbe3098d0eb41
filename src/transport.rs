use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::net::UdpSocket;

/// The datagram transport a framed socket runs on.
///
/// This is an abstraction over sending and receiving single UDP payloads,
/// introduced to keep the protocol independent of the concrete socket
/// implementation and to facilitate mocking the I/O part away for testing.
/// Implementations must not fragment, merge or reorder within a single call;
/// everything else (loss, duplication, reordering between calls) is the
/// protocol's problem.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one datagram. Returns the number of bytes accepted, which for a
    /// datagram transport is all of `buf` or an error.
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram into `buf`, returning the number of bytes
    /// written and the sender's endpoint.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Release the transport. Implementations whose blocking receive cannot
    /// be interrupted any other way deliver a zero-byte datagram with a
    /// default sender endpoint afterwards; the framed socket's receive loop
    /// recognizes that as a close.
    fn close(&self);
}

#[async_trait]
impl Transport for UdpSocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, to).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn close(&self) {
        // a tokio socket is closed by dropping it; pending receives are
        // cancelled by dropping their futures
    }
}
