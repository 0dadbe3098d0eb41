//! Send path: slicing a message given as a scatter/gather buffer sequence
//! into a list of wire datagrams.

use std::cmp::min;
use std::sync::Mutex;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::buffers::pool::PooledBuffer;
use crate::error::{Error, Result};
use crate::protocol::header::Header;

/// One datagram ready for transmission: an owned, already encoded header
/// followed by payload views borrowed from the caller's buffer sequence.
///
/// The descriptor is scatter/gather shaped so transports with vectored send
/// can transmit it without copying; [`write_into`] flattens it for those
/// without.
///
/// [`write_into`]: Datagram::write_into
pub struct Datagram<'a> {
    header: [u8; Header::SERIALIZED_LEN],
    payload: Vec<&'a [u8]>,
}

impl<'a> Datagram<'a> {
    fn new(header: &Header, payload: Vec<&'a [u8]>) -> Datagram<'a> {
        let mut header_buf = [0u8; Header::SERIALIZED_LEN];
        header.ser(&mut header_buf.as_mut_slice());
        Datagram {
            header: header_buf,
            payload,
        }
    }

    /// Hand-craft a datagram, bypassing the builder's invariants. Lets tests
    /// produce the malformed shapes the builder refuses to.
    #[cfg(test)]
    pub(crate) fn new_for_test(header: &Header, body: &'a [u8]) -> Datagram<'a> {
        Datagram::new(header, vec![body])
    }

    /// The encoded 24-byte header.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// The payload views, in transmission order.
    pub fn payload(&self) -> &[&'a [u8]] {
        &self.payload
    }

    /// Total wire size: header plus payload.
    pub fn len(&self) -> usize {
        Header::SERIALIZED_LEN + self.payload.iter().map(|part| part.len()).sum::<usize>()
    }

    /// Flatten header and payload into `buf`, replacing its content.
    pub fn write_into(&self, buf: &mut PooledBuffer) {
        buf.clear();
        buf.extend_from_slice(&self.header);
        for part in &self.payload {
            buf.extend_from_slice(part);
        }
    }
}

/// Source of message ids for fragmented sends.
///
/// One instance per socket, advanced exactly once per fragmented message.
/// Ids are not required to be unique: a collision with a still-live
/// reassembly at the same sender is rejected by the receiver's duplicate
/// check, same as a duplicated datagram would be.
pub struct MessageIdSource {
    rng: Mutex<SmallRng>,
}

impl MessageIdSource {
    pub fn new() -> MessageIdSource {
        MessageIdSource {
            rng: Mutex::new(SmallRng::from_os_rng()),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_seed(seed: u64) -> MessageIdSource {
        MessageIdSource {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    fn next_id(&self) -> i32 {
        self.rng.lock().expect("message id rng poisoned").next_u32() as i32
    }
}

impl Default for MessageIdSource {
    fn default() -> Self {
        MessageIdSource::new()
    }
}

/// Split a message into the datagrams that carry it.
///
/// Zero-length views are dropped up front; they contribute no payload and
/// must never produce an empty fragment. A message that fits into a single
/// datagram (header included) is sent as one non-fragmented datagram,
/// everything else as a fragment-info followed by `ceil(total / payload)`
/// fragments. Only the last fragment may be short.
pub fn create_datagram_list<'a>(
    buffer_sequence: &[&'a [u8]],
    max_datagram_size: usize,
    magic: [u8; 4],
    ids: &MessageIdSource,
) -> Result<Vec<Datagram<'a>>> {
    if max_datagram_size <= Header::SERIALIZED_LEN {
        return Err(Error::InvalidConfiguration(format!(
            "max_datagram_size of {} cannot hold the {}-byte header plus payload",
            max_datagram_size,
            Header::SERIALIZED_LEN,
        )));
    }

    let views: Vec<&[u8]> = buffer_sequence
        .iter()
        .copied()
        .filter(|view| !view.is_empty())
        .collect();

    let total_size: usize = views.iter().map(|view| view.len()).sum();
    if total_size > u32::MAX as usize {
        return Err(Error::Generic(format!(
            "message of {total_size} bytes exceeds the wire format's length field"
        )));
    }

    if total_size + Header::SERIALIZED_LEN <= max_datagram_size {
        Ok(vec![create_non_fragmented_datagram(views, magic)])
    } else {
        Ok(create_fragmented_datagram_list(
            views,
            max_datagram_size,
            magic,
            ids.next_id(),
        ))
    }
}

fn create_non_fragmented_datagram(views: Vec<&[u8]>, magic: [u8; 4]) -> Datagram<'_> {
    let total_size: usize = views.iter().map(|view| view.len()).sum();
    Datagram::new(&Header::non_fragmented(magic, total_size as u32), views)
}

pub(crate) fn create_fragmented_datagram_list<'a>(
    views: Vec<&'a [u8]>,
    max_datagram_size: usize,
    magic: [u8; 4],
    message_id: i32,
) -> Vec<Datagram<'a>> {
    let payload_per_datagram = max_datagram_size - Header::SERIALIZED_LEN;
    let total_size: usize = views.iter().map(|view| view.len()).sum();
    let fragment_count = total_size.div_ceil(payload_per_datagram);

    let mut datagram_list = Vec::with_capacity(1 + fragment_count);
    datagram_list.push(Datagram::new(
        &Header::fragment_info(magic, message_id, fragment_count as u32, total_size as u32),
        Vec::new(),
    ));

    // Walk the views in order, splitting them across fragments as needed: one
    // view may span several fragments, and one fragment may aggregate bytes
    // from several views.
    let mut view_iter = views.into_iter();
    let mut current: &[u8] = &[];

    for index in 0..fragment_count {
        let mut body = Vec::new();
        let mut remaining = payload_per_datagram;

        while remaining > 0 {
            if current.is_empty() {
                match view_iter.next() {
                    Some(view) => current = view,
                    None => break,
                }
                continue;
            }

            let take = min(remaining, current.len());
            body.push(&current[..take]);
            current = &current[take..];
            remaining -= take;
        }

        let body_len: usize = body.iter().map(|part| part.len()).sum();
        datagram_list.push(Datagram::new(
            &Header::fragment(magic, message_id, index as u32, body_len as u32),
            body,
        ));
    }

    datagram_list
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::protocol::header::DatagramKind;

    use super::*;

    const MAGIC: [u8; 4] = *b"ECAL";

    fn flatten(datagram: &Datagram<'_>) -> Vec<u8> {
        let mut bytes = datagram.header().to_vec();
        for part in datagram.payload() {
            bytes.extend_from_slice(part);
        }
        bytes
    }

    fn header_of(datagram: &Datagram<'_>) -> Header {
        Header::deser(&mut datagram.header()).unwrap()
    }

    fn body_of(datagram: &Datagram<'_>) -> Vec<u8> {
        flatten(datagram)[Header::SERIALIZED_LEN..].to_vec()
    }

    #[test]
    fn test_non_fragmented_message() {
        let message = b"Hello World!";

        let datagram_list =
            create_datagram_list(&[message], 1000, MAGIC, &MessageIdSource::new()).unwrap();

        assert_eq!(datagram_list.len(), 1);
        assert_eq!(
            datagram_list[0].len(),
            message.len() + Header::SERIALIZED_LEN
        );

        let header = header_of(&datagram_list[0]);
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.version, 5);
        assert_eq!(header.kind, DatagramKind::NonFragmented as u32);
        assert_eq!(header.id, -1);
        assert_eq!(header.num, 1);
        assert_eq!(header.len, message.len() as u32);
        assert_eq!(body_of(&datagram_list[0]), message);
    }

    #[test]
    fn test_fragmented_message() {
        let message = b"In the beginning the Universe was created. \
                        This had made many people very angry and has been widely regarded as a bad move.";
        assert_eq!(message.len(), 122);

        let datagram_list =
            create_datagram_list(&[message], 100, MAGIC, &MessageIdSource::new()).unwrap();

        // 1 fragment info, 1 full fragment, 1 partial fragment
        assert_eq!(datagram_list.len(), 3);
        assert_eq!(datagram_list[0].len(), Header::SERIALIZED_LEN);
        assert_eq!(datagram_list[1].len(), 100);
        assert_eq!(datagram_list[2].len(), Header::SERIALIZED_LEN + 122 - 76);

        let info = header_of(&datagram_list[0]);
        assert_eq!(info.kind, DatagramKind::FragmentInfo as u32);
        assert_eq!(info.num, 2);
        assert_eq!(info.len, 122);

        let first = header_of(&datagram_list[1]);
        assert_eq!(first.kind, DatagramKind::Fragment as u32);
        assert_eq!(first.id, info.id);
        assert_eq!(first.num, 0);
        assert_eq!(first.len, 76);

        let second = header_of(&datagram_list[2]);
        assert_eq!(second.kind, DatagramKind::Fragment as u32);
        assert_eq!(second.id, info.id);
        assert_eq!(second.num, 1);
        assert_eq!(second.len, 46);

        let mut reassembled = body_of(&datagram_list[1]);
        reassembled.extend_from_slice(&body_of(&datagram_list[2]));
        assert_eq!(reassembled, message);
    }

    #[test]
    fn test_single_fragment_fragmentation() {
        let message: &[u8] = b"Hello World!";

        let datagram_list = create_fragmented_datagram_list(vec![message], 100, MAGIC, 42);

        assert_eq!(datagram_list.len(), 2);

        let info = header_of(&datagram_list[0]);
        assert_eq!(info.kind, DatagramKind::FragmentInfo as u32);
        assert_eq!(info.id, 42);
        assert_eq!(info.num, 1);
        assert_eq!(info.len, 12);

        let fragment = header_of(&datagram_list[1]);
        assert_eq!(fragment.kind, DatagramKind::Fragment as u32);
        assert_eq!(fragment.id, 42);
        assert_eq!(fragment.num, 0);
        assert_eq!(fragment.len, 12);
        assert_eq!(body_of(&datagram_list[1]), message);
    }

    #[rstest]
    #[case::no_views(&[])]
    #[case::one_empty_view(&[b"" as &[u8]])]
    #[case::several_empty_views(&[b"" as &[u8], b"", b""])]
    fn test_zero_byte_message(#[case] buffer_sequence: &[&[u8]]) {
        let datagram_list =
            create_datagram_list(buffer_sequence, 1000, MAGIC, &MessageIdSource::new()).unwrap();

        assert_eq!(datagram_list.len(), 1);
        assert_eq!(datagram_list[0].len(), Header::SERIALIZED_LEN);

        let header = header_of(&datagram_list[0]);
        assert_eq!(header.kind, DatagramKind::NonFragmented as u32);
        assert_eq!(header.len, 0);
    }

    #[rstest]
    #[case::small(&[b"Hello" as &[u8], b"", b" World!"], 1000)]
    #[case::fragmented(&[b"" as &[u8], b"In the beginning the Universe was created. ", b"", b"This had made many people very angry."], 50)]
    fn test_zero_length_views_are_transparent(
        #[case] buffer_sequence: &[&[u8]],
        #[case] max_datagram_size: usize,
    ) {
        let without_empty: Vec<&[u8]> = buffer_sequence
            .iter()
            .copied()
            .filter(|view| !view.is_empty())
            .collect();

        let ids = MessageIdSource::with_seed(7);
        let actual =
            create_datagram_list(buffer_sequence, max_datagram_size, MAGIC, &ids).unwrap();
        let ids = MessageIdSource::with_seed(7);
        let expected =
            create_datagram_list(&without_empty, max_datagram_size, MAGIC, &ids).unwrap();

        assert_eq!(actual.len(), expected.len());
        for (actual, expected) in actual.iter().zip(&expected) {
            assert_eq!(flatten(actual), flatten(expected));
        }
    }

    #[test]
    fn test_multi_view_message_splits_across_fragments() {
        let views: &[&[u8]] = &[
            b"In the beginning the Universe was created.",
            b" ",
            b"This had made many people very angry and has been widely regarded as a bad move.",
        ];
        let max_datagram_size = 70;
        let payload_per_datagram = max_datagram_size - Header::SERIALIZED_LEN;

        let datagram_list =
            create_datagram_list(views, max_datagram_size, MAGIC, &MessageIdSource::new()).unwrap();

        let total: usize = views.iter().map(|view| view.len()).sum();
        let expected_fragments = total.div_ceil(payload_per_datagram);
        assert_eq!(datagram_list.len(), 1 + expected_fragments);

        let mut reassembled = Vec::new();
        for (index, fragment) in datagram_list[1..].iter().enumerate() {
            let header = header_of(fragment);
            let body = body_of(fragment);
            assert_eq!(header.num, index as u32);
            assert_eq!(header.len as usize, body.len());
            assert!(body.len() <= payload_per_datagram);
            if index < expected_fragments - 1 {
                // every fragment but the last is full
                assert_eq!(body.len(), payload_per_datagram);
            }
            reassembled.extend_from_slice(&body);
        }

        let mut original = Vec::new();
        for view in views {
            original.extend_from_slice(view);
        }
        assert_eq!(reassembled, original);
    }

    #[rstest]
    #[case::zero(0)]
    #[case::header_only(Header::SERIALIZED_LEN)]
    fn test_max_datagram_size_too_small(#[case] max_datagram_size: usize) {
        let result = create_datagram_list(
            &[b"payload"],
            max_datagram_size,
            MAGIC,
            &MessageIdSource::new(),
        );
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_id_advances_once_per_fragmented_message() {
        let ids = MessageIdSource::with_seed(1);

        // a non-fragmented send must not draw an id
        let _ = create_datagram_list(&[b"tiny"], 1000, MAGIC, &ids).unwrap();

        let big = [0x5au8; 200];
        let first = create_datagram_list(&[&big], 100, MAGIC, &ids).unwrap();
        let second = create_datagram_list(&[&big], 100, MAGIC, &ids).unwrap();

        let reference = MessageIdSource::with_seed(1);
        assert_eq!(header_of(&first[0]).id, reference.next_id());
        assert_eq!(header_of(&second[0]).id, reference.next_id());
        assert_ne!(header_of(&first[0]).id, header_of(&second[0]).id);
    }
}
