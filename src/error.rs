use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// All failure kinds surfaced by this crate. None of them panic the process.
///
/// The receive path distinguishes two classes: protocol violations caused by
/// a single bad datagram (see [`Error::is_protocol_violation`]), which the
/// socket reports and then keeps receiving, and transport / lifecycle errors,
/// which terminate the current operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level I/O failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Unclassified internal failure.
    #[error("{0}")]
    Generic(String),

    /// The datagram carried a version byte this implementation does not
    /// decode. Version 6 is received but deliberately not decoded, so it ends
    /// up here as well.
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u8),

    /// A fragment-info arrived for a message that already has one, or a
    /// fragment arrived for a slot that is already filled.
    #[error("duplicate datagram: {0}")]
    DuplicateDatagram(String),

    /// Too short for its header, wrong magic bytes, unknown datagram kind,
    /// fragment index out of range, or a declared payload length exceeding
    /// the bytes actually received.
    #[error("malformed datagram: {0}")]
    MalformedDatagram(String),

    /// All fragments arrived but their sizes do not add up to the total
    /// length declared in the fragment-info.
    #[error("malformed reassembled message: {0}")]
    MalformedReassembledMessage(String),

    /// The socket was closed while a receive was in progress.
    #[error("socket closed")]
    SocketClosed,

    /// The transport is not bound to a local endpoint.
    #[error("socket not bound")]
    NotBound,

    /// A tunable has a value the protocol cannot work with.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl Error {
    /// True for errors caused by a single offending datagram. The receive
    /// loop reports these and keeps going; everything else aborts it.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedProtocolVersion(_)
                | Error::DuplicateDatagram(_)
                | Error::MalformedDatagram(_)
                | Error::MalformedReassembledMessage(_)
        )
    }
}
