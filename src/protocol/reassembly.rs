//! Receive path: collecting fragments per `(sender, message id)` until a
//! message is complete, in whatever order they arrive.

use std::net::SocketAddr;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::buffers::pool::BufferPool;
use crate::buffers::view::BufferView;
use crate::error::{Error, Result};
use crate::protocol::header::{DatagramKind, Header};

type MessageKey = (SocketAddr, i32);

/// State of one partially received message.
///
/// Invariants: `received_fragments` equals the number of filled slots; once
/// `info_received` is set, `fragments.len() == total_fragments` and never
/// changes; a filled slot is never overwritten.
struct FragmentedMessage {
    info_received: bool,
    total_fragments: u32,
    total_length: u32,
    received_fragments: u32,
    fragments: Vec<Option<BufferView>>,
    last_activity: Instant,
}

impl FragmentedMessage {
    fn new(now: Instant) -> FragmentedMessage {
        FragmentedMessage {
            info_received: false,
            total_fragments: 0,
            total_length: 0,
            received_fragments: 0,
            fragments: Vec::new(),
            last_activity: now,
        }
    }
}

/// Order-insensitive reassembly of fragmented messages, one record per
/// `(sender endpoint, message id)`.
///
/// The engine is purely CPU-bound and never suspends; it consumes a monotonic
/// clock through the `now` parameters instead of reading one itself. Stored
/// fragments are views sharing ownership of the datagram buffers that
/// delivered them, so the backing storage stays alive exactly as long as a
/// record references it.
pub struct Reassembly {
    fragmented_messages: FxHashMap<MessageKey, FragmentedMessage>,
    pool: BufferPool,
}

impl Reassembly {
    /// `pool` provides the buffers that completed messages are assembled
    /// into.
    pub fn new(pool: BufferPool) -> Reassembly {
        Reassembly {
            fragmented_messages: FxHashMap::default(),
            pool,
        }
    }

    /// Process one received datagram (header included, already validated for
    /// magic and version).
    ///
    /// Returns the completed message if this datagram was the last missing
    /// piece (or was non-fragmented), `None` if more fragments are pending.
    /// The datagram buffer is retained via shared-ownership slices where
    /// needed, never copied.
    pub fn handle_datagram(
        &mut self,
        datagram: &BufferView,
        from: SocketAddr,
        now: Instant,
    ) -> Result<Option<BufferView>> {
        if datagram.len() < Header::SERIALIZED_LEN {
            return Err(Error::MalformedDatagram(format!(
                "datagram of {} bytes is too small to contain the header",
                datagram.len()
            )));
        }

        let header = Header::deser(&mut datagram.as_slice())?;

        match DatagramKind::from_wire(header.kind) {
            Some(DatagramKind::FragmentInfo) => {
                self.handle_fragment_info(&header, from, now)
            }
            Some(DatagramKind::Fragment) => self.handle_fragment(&header, datagram, from, now),
            Some(DatagramKind::NonFragmented) => Self::handle_non_fragmented(&header, datagram),
            None => Err(Error::MalformedDatagram(format!(
                "unknown datagram kind {}",
                header.kind
            ))),
        }
    }

    fn handle_fragment_info(
        &mut self,
        header: &Header,
        from: SocketAddr,
        now: Instant,
    ) -> Result<Option<BufferView>> {
        let key = (from, header.id);
        let message = self
            .fragmented_messages
            .entry(key)
            .or_insert_with(|| FragmentedMessage::new(now));

        if message.info_received {
            return Err(Error::DuplicateDatagram(format!(
                "second fragment info for message {}",
                header.id
            )));
        }

        message.info_received = true;
        message.total_fragments = header.num;
        message.total_length = header.len;

        // From here on the fragment list has its final length. Growing keeps
        // fragments that arrived before the info; shrinking drops any with an
        // out-of-range index, so the received count is derived anew.
        message.fragments.resize(header.num as usize, None);
        message.received_fragments =
            message.fragments.iter().filter(|slot| slot.is_some()).count() as u32;

        message.last_activity = now;

        self.complete_if_ready(key)
    }

    fn handle_fragment(
        &mut self,
        header: &Header,
        datagram: &BufferView,
        from: SocketAddr,
        now: Instant,
    ) -> Result<Option<BufferView>> {
        let key = (from, header.id);
        let message = self
            .fragmented_messages
            .entry(key)
            .or_insert_with(|| FragmentedMessage::new(now));

        let index = header.num as usize;

        // Without the fragment info the fragment count is unknown, so the
        // list grows as needed. Once the info is there, its count is
        // authoritative.
        if !message.info_received && message.fragments.len() <= index {
            message.fragments.resize(index + 1, None);
        }

        if index >= message.fragments.len() {
            return Err(Error::MalformedDatagram(format!(
                "fragment index {} is invalid, should be smaller than {}",
                index,
                message.fragments.len()
            )));
        }

        if message.fragments[index].is_some() {
            return Err(Error::DuplicateDatagram(format!(
                "fragment {} of message {}",
                index, header.id
            )));
        }

        let bytes_available = datagram.len() - Header::SERIALIZED_LEN;
        if header.len as usize > bytes_available {
            return Err(Error::MalformedDatagram(format!(
                "fragment declares {} payload bytes, but only {} are available",
                header.len, bytes_available
            )));
        }

        message.fragments[index] = Some(
            datagram.slice(Header::SERIALIZED_LEN..Header::SERIALIZED_LEN + header.len as usize),
        );
        message.received_fragments += 1;
        message.last_activity = now;

        self.complete_if_ready(key)
    }

    fn handle_non_fragmented(header: &Header, datagram: &BufferView) -> Result<Option<BufferView>> {
        let bytes_available = datagram.len() - Header::SERIALIZED_LEN;
        if header.len as usize > bytes_available {
            return Err(Error::MalformedDatagram(format!(
                "datagram declares {} payload bytes, but only {} are available",
                header.len, bytes_available
            )));
        }

        Ok(Some(datagram.slice(
            Header::SERIALIZED_LEN..Header::SERIALIZED_LEN + header.len as usize,
        )))
    }

    /// Reassemble and remove the record once all fragments are present.
    fn complete_if_ready(&mut self, key: MessageKey) -> Result<Option<BufferView>> {
        let message = &self.fragmented_messages[&key];

        if !message.info_received || message.received_fragments != message.total_fragments {
            return Ok(None);
        }

        let actual_size: usize = message
            .fragments
            .iter()
            .flatten()
            .map(|fragment| fragment.len())
            .sum();
        if actual_size != message.total_length as usize {
            let expected = message.total_length;
            self.fragmented_messages.remove(&key);
            return Err(Error::MalformedReassembledMessage(format!(
                "should be {expected} bytes, but received {actual_size}"
            )));
        }

        let message = self
            .fragmented_messages
            .remove(&key)
            .expect("record was just looked up");

        let mut reassembled = self.pool.allocate();
        reassembled.resize(message.total_length as usize);

        let mut offset = 0;
        for fragment in message.fragments.iter().flatten() {
            reassembled.as_mut_slice()[offset..offset + fragment.len()].copy_from_slice(fragment);
            offset += fragment.len();
        }

        Ok(Some(reassembled.freeze()))
    }

    /// Drop every record whose last activity is older than `threshold`,
    /// releasing the datagram buffers its fragments kept alive.
    pub fn remove_older_than(&mut self, threshold: Instant) {
        let before = self.fragmented_messages.len();
        self.fragmented_messages
            .retain(|_, message| message.last_activity >= threshold);

        let evicted = before - self.fragmented_messages.len();
        if evicted > 0 {
            debug!("evicted {} incomplete reassembled message(s)", evicted);
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_message_count(&self) -> usize {
        self.fragmented_messages.len()
    }
}
