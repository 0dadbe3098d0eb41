use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Magic bytes plus version byte: the prefix shared by all protocol versions.
pub const COMMON_PREFIX_LEN: usize = 5;

/// The version this crate speaks.
pub const PROTOCOL_VERSION: u8 = 5;

/// Validate the version-independent datagram prefix and extract the version
/// byte for dispatch.
///
/// The magic is deployment-configured; sender and receiver must agree on it.
pub fn parse_common(data: &[u8], magic: &[u8; 4]) -> Result<u8> {
    if data.len() < COMMON_PREFIX_LEN {
        return Err(Error::MalformedDatagram(format!(
            "datagram of {} bytes is too small to contain the common header",
            data.len()
        )));
    }
    if &data[..4] != magic {
        return Err(Error::MalformedDatagram("wrong magic bytes".to_string()));
    }
    Ok(data[4])
}

/// Wire values of the `kind` header field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DatagramKind {
    /// Carries total fragment count and total message length, no body.
    FragmentInfo = 1,
    /// Carries one slice of a fragmented message.
    Fragment = 2,
    /// Carries an entire message.
    NonFragmented = 3,
}

impl DatagramKind {
    pub fn from_wire(raw: u32) -> Option<DatagramKind> {
        match raw {
            1 => Some(DatagramKind::FragmentInfo),
            2 => Some(DatagramKind::Fragment),
            3 => Some(DatagramKind::NonFragmented),
            _ => None,
        }
    }
}

/// The fixed per-datagram header. All multi-byte fields are little-endian.
///
/// ```ascii
///  0: magic (4 bytes)       deployment identifier, not interpreted here
///  4: version (u8)          must be 5
///  5: reserved (3 bytes)    sent as 0, never evaluated on receive
///  8: kind (u32)            1 fragment-info / 2 fragment / 3 non-fragmented
/// 12: id (i32)              message id matching fragments to their info;
///                           -1 for non-fragmented datagrams
/// 16: num (u32)             fragment-info: total fragment count
///                           fragment: fragment index (0-based)
///                           non-fragmented: 1
/// 20: len (u32)             fragment-info: total message length
///                           fragment / non-fragmented: body length
/// ```
///
/// The codec is purely structural; semantic checks (kind dispatch, index
/// ranges, length plausibility) live in the datagram builder and the
/// reassembly.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u8,
    pub reserved: [u8; 3],
    pub kind: u32,
    pub id: i32,
    pub num: u32,
    pub len: u32,
}

impl Header {
    pub const SERIALIZED_LEN: usize = 24;

    pub fn fragment_info(magic: [u8; 4], id: i32, fragment_count: u32, total_len: u32) -> Header {
        Header {
            magic,
            version: PROTOCOL_VERSION,
            reserved: [0; 3],
            kind: DatagramKind::FragmentInfo as u32,
            id,
            num: fragment_count,
            len: total_len,
        }
    }

    pub fn fragment(magic: [u8; 4], id: i32, index: u32, len: u32) -> Header {
        Header {
            magic,
            version: PROTOCOL_VERSION,
            reserved: [0; 3],
            kind: DatagramKind::Fragment as u32,
            id,
            num: index,
            len,
        }
    }

    pub fn non_fragmented(magic: [u8; 4], len: u32) -> Header {
        Header {
            magic,
            version: PROTOCOL_VERSION,
            reserved: [0; 3],
            kind: DatagramKind::NonFragmented as u32,
            id: -1,
            num: 1,
            len,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.magic);
        buf.put_u8(self.version);
        buf.put_slice(&self.reserved);
        buf.put_u32_le(self.kind);
        buf.put_i32_le(self.id);
        buf.put_u32_le(self.num);
        buf.put_u32_le(self.len);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<Header> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(Error::MalformedDatagram(format!(
                "datagram of {} bytes is too small to contain the header",
                buf.remaining()
            )));
        }

        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        let version = buf.get_u8();
        let mut reserved = [0u8; 3];
        buf.copy_to_slice(&mut reserved);

        Ok(Header {
            magic,
            version,
            reserved,
            kind: buf.get_u32_le(),
            id: buf.get_i32_le(),
            num: buf.get_u32_le(),
            len: buf.get_u32_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::info(Header::fragment_info(*b"ECAL", 12345, 7, 9999))]
    #[case::fragment(Header::fragment(*b"ECAL", -77, 3, 1424))]
    #[case::non_fragmented(Header::non_fragmented(*b"ECAL", 0))]
    #[case::max_values(Header::fragment(*b"\xff\x00\xfeQ", i32::MIN, u32::MAX, u32::MAX))]
    fn test_ser_deser(#[case] header: Header) {
        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(buf.len(), Header::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        let deser = Header::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, header);
    }

    #[test]
    fn test_wire_layout_little_endian() {
        let header = Header {
            magic: *b"ECAL",
            version: 5,
            reserved: [0; 3],
            kind: 2,
            id: -2,
            num: 0x01020304,
            len: 0x0a0b0c0d,
        };

        let mut buf = BytesMut::new();
        header.ser(&mut buf);

        assert_eq!(
            buf.as_ref(),
            [
                b'E', b'C', b'A', b'L', // magic
                5,    // version
                0, 0, 0, // reserved
                2, 0, 0, 0, // kind
                0xfe, 0xff, 0xff, 0xff, // id = -2
                0x04, 0x03, 0x02, 0x01, // num
                0x0d, 0x0c, 0x0b, 0x0a, // len
            ]
        );
    }

    #[test]
    fn test_deser_too_short() {
        let mut b: &[u8] = &[0u8; Header::SERIALIZED_LEN - 1];
        assert!(matches!(
            Header::deser(&mut b),
            Err(Error::MalformedDatagram(_))
        ));
    }

    #[test]
    fn test_deser_preserves_reserved_and_unknown_kind() {
        // senders may start using the reserved bytes at some point; the codec
        // must pass them through without complaint
        let raw = [
            b'E', b'C', b'A', b'L', 5, 9, 8, 7, // nonzero reserved
            42, 0, 0, 0, // unknown kind
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        let mut b: &[u8] = &raw;
        let header = Header::deser(&mut b).unwrap();
        assert_eq!(header.reserved, [9, 8, 7]);
        assert_eq!(header.kind, 42);
        assert_eq!(DatagramKind::from_wire(header.kind), None);
    }

    #[rstest]
    #[case::info(1, Some(DatagramKind::FragmentInfo))]
    #[case::fragment(2, Some(DatagramKind::Fragment))]
    #[case::non_fragmented(3, Some(DatagramKind::NonFragmented))]
    #[case::unknown_zero(0, None)]
    #[case::unknown_high(4, None)]
    fn test_kind_from_wire(#[case] raw: u32, #[case] expected: Option<DatagramKind>) {
        assert_eq!(DatagramKind::from_wire(raw), expected);
    }

    #[rstest]
    #[case::version_5(&[b'E', b'C', b'A', b'L', 5], Ok(5))]
    #[case::version_6(&[b'E', b'C', b'A', b'L', 6], Ok(6))]
    #[case::empty(&[], Err(()))]
    #[case::too_short(&[b'E', b'C', b'A', b'L'], Err(()))]
    #[case::wrong_magic(&[b'X', b'C', b'A', b'L', 5], Err(()))]
    fn test_parse_common(#[case] data: &[u8], #[case] expected: std::result::Result<u8, ()>) {
        let actual = parse_common(data, b"ECAL");
        match expected {
            Ok(version) => assert_eq!(actual.unwrap(), version),
            Err(()) => assert!(matches!(actual, Err(Error::MalformedDatagram(_)))),
        }
    }
}
