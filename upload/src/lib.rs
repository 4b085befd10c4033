//! Serial upload framing.
//!
//! A frame is the ASCII marker `IOCP`, the payload length and its CRC-32 (both big-endian),
//! then the payload itself. The receiver stores whole words, so the payload is zero padded to a
//! multiple of four and the length counts the padding.

#![no_std]

use core::fmt;

use crc::{Crc, CRC_32_ISO_HDLC};

pub const MAGIC: [u8; 4] = *b"IOCP";
pub const HEADER_SIZE: usize = 8;
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const PADDING: [u8; 3] = [0; 3];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub len: u32,
    pub crc: u32,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0; HEADER_SIZE];
        raw[..4].copy_from_slice(&self.len.to_be_bytes());
        raw[4..].copy_from_slice(&self.crc.to_be_bytes());
        raw
    }

    pub fn decode(raw: [u8; HEADER_SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = raw;
        Self {
            len: u32::from_be_bytes([l0, l1, l2, l3]),
            crc: u32::from_be_bytes([c0, c1, c2, c3]),
        }
    }
}

/// A payload ready to go on the wire.
#[derive(Copy, Clone, Debug)]
pub struct Frame<'a> {
    pub header: Header,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// The pieces to send, in order.
    pub fn parts(&self) -> [&'a [u8]; 2] {
        let padding = (4 - self.payload.len() % 4) % 4;
        [self.payload, &PADDING[..padding]]
    }

    pub fn prefix(&self) -> [u8; MAGIC.len() + HEADER_SIZE] {
        let mut raw = [0; MAGIC.len() + HEADER_SIZE];
        raw[..MAGIC.len()].copy_from_slice(&MAGIC);
        raw[MAGIC.len()..].copy_from_slice(&self.header.encode());
        raw
    }
}

/// Returns `None` if the padded payload does not fit the 32-bit length field.
#[must_use]
pub fn encode(payload: &[u8]) -> Option<Frame<'_>> {
    let len = u32::try_from(payload.len().next_multiple_of(4)).ok()?;
    let mut digest = CRC32.digest();
    digest.update(payload);
    digest.update(&PADDING[..len as usize - payload.len()]);
    Some(Frame {
        header: Header {
            len,
            crc: digest.finalize(),
        },
        payload,
    })
}

pub fn checksum(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReceiveError {
    /// The input ended mid-frame.
    Closed,
    TooBig { len: u32, limit: u32 },
    CrcMismatch { expected: u32, actual: u32 },
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("input closed"),
            Self::TooBig { .. } => f.write_str(" ERROR! Upload too big!"),
            Self::CrcMismatch { .. } => f.write_str("CRC mismatch."),
        }
    }
}

/// Receives one frame. Bytes before the marker are skipped and each payload word goes to
/// `store(offset, word)`. Lengths above `limit` are refused before anything is stored.
pub fn receive(
    mut next: impl FnMut() -> Option<u8>,
    mut store: impl FnMut(u32, u32),
    limit: u32,
) -> Result<Header, ReceiveError> {
    let mut matched = 0;
    while matched < MAGIC.len() {
        let byte = next().ok_or(ReceiveError::Closed)?;
        matched = if byte == MAGIC[matched] {
            matched + 1
        } else {
            usize::from(byte == MAGIC[0])
        };
    }

    let mut word = || -> Result<[u8; 4], ReceiveError> {
        let mut raw = [0; 4];
        for byte in &mut raw {
            *byte = next().ok_or(ReceiveError::Closed)?;
        }
        Ok(raw)
    };

    let len = u32::from_be_bytes(word()?);
    if len > limit {
        return Err(ReceiveError::TooBig { len, limit });
    }
    let expected = u32::from_be_bytes(word()?);

    let mut digest = CRC32.digest();
    for offset in (0..len).step_by(4) {
        let raw = word()?;
        digest.update(&raw);
        store(offset, u32::from_be_bytes(raw));
    }

    let actual = digest.finalize();
    if actual != expected {
        return Err(ReceiveError::CrcMismatch { expected, actual });
    }
    Ok(Header { len, crc: actual })
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use crate::{checksum, encode, receive, Header, ReceiveError, MAGIC};

    fn wire(payload: &[u8]) -> Vec<u8> {
        let frame = encode(payload).unwrap();
        let mut out = frame.prefix().to_vec();
        for part in frame.parts() {
            out.extend_from_slice(part);
        }
        out
    }

    #[test]
    fn check_value() {
        assert_eq!(checksum(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn header_is_big_endian() {
        let header = Header {
            len: 0x0102_0304,
            crc: 0xa0b0_c0d0,
        };

        assert_eq!(header.encode(), [1, 2, 3, 4, 0xa0, 0xb0, 0xc0, 0xd0]);
        assert_eq!(Header::decode(header.encode()), header);
    }

    #[test]
    fn payload_is_padded_to_words() {
        let bytes = wire(b"hello");

        assert_eq!(bytes[..4], MAGIC);
        assert_eq!(bytes[4..8], 8u32.to_be_bytes());
        assert_eq!(bytes[8..12], checksum(b"hello\0\0\0").to_be_bytes());
        assert_eq!(&bytes[12..], b"hello\0\0\0");
    }

    #[test]
    fn receive_after_noise() {
        let mut input = b"IOIIOC".to_vec();
        input.extend(wire(&[1, 2, 3, 4, 5, 6, 7, 8, 9]));
        let mut input = input.into_iter();
        let mut words = Vec::new();

        let header = receive(|| input.next(), |offset, word| words.push((offset, word)), 64).unwrap();

        assert_eq!(header.len, 12);
        assert_eq!(
            words,
            [(0, 0x0102_0304), (4, 0x0506_0708), (8, 0x0900_0000)]
        );
    }

    #[test]
    fn too_big_stores_nothing() {
        let bytes = wire(&[0; 64]);
        let mut input = bytes.into_iter();
        let mut stored = 0;

        assert_eq!(
            receive(|| input.next(), |_, _| stored += 1, 32),
            Err(ReceiveError::TooBig { len: 64, limit: 32 })
        );
        assert_eq!(stored, 0);
    }

    #[test]
    fn corrupted_payload() {
        let mut bytes = wire(b"abcd");
        *bytes.last_mut().unwrap() ^= 1;
        let mut input = bytes.into_iter();

        assert!(matches!(
            receive(|| input.next(), |_, _| {}, 64),
            Err(ReceiveError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn truncated() {
        let bytes = wire(b"abcdefgh");
        let mut input = bytes[..14].iter().copied();

        assert_eq!(
            receive(|| input.next(), |_, _| {}, 64),
            Err(ReceiveError::Closed)
        );
    }
}
