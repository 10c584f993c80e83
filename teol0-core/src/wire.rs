//! Packet codec: fixed 8-byte header + NUL-terminated peer name + payload.
//!
//! ```text
//! 0  command            u8
//! 1  peer_name_length   u8   (incl. terminating NUL, 0 when talking to the relay itself)
//! 2  data_length        u16  (little endian)
//! 4  reserved_1         u8
//! 5  reserved_2         u8
//! 6  checksum           u8   byte sum of bytes 0..6 + peer name + payload
//! 7  header_checksum    u8   byte sum of bytes 0..7
//! 8  peer_name          peer_name_length bytes
//! *  payload            data_length bytes
//! ```
//!
//! The header checksum covers the whole-frame checksum byte, so any corruption of the first
//! eight bytes is reported as a header failure before either length field is used.

use std::borrow::Cow;

use crate::checksum::{byte_checksum, byte_checksum_parts};
use crate::cursor::Cursor;

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 8;

/// Longest peer name, excluding the terminating NUL.
pub const MAX_PEER_NAME_LEN: usize = u8::MAX as usize - 1;

/// Largest payload the 16-bit length field can describe.
pub const MAX_DATA_LEN: usize = u16::MAX as usize;

/// Largest frame the wire format can describe.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + u8::MAX as usize + MAX_DATA_LEN;

const CHECKSUM_OFFSET: usize = 6;
const HEADER_CHECKSUM_OFFSET: usize = 7;

/// Wire size of a packet with the given peer name region (incl. NUL) and payload length.
pub fn packet_size(peer_name_length: usize, data_length: usize) -> usize {
    HEADER_SIZE + peer_name_length + data_length
}

/// Codec failures. All of them are recoverable by dropping the frame, except `FrameTooLarge`
/// coming out of the reassembler, which ends the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },
    #[error("header checksum mismatch: expected {expected:#04x}, computed {actual:#04x}")]
    HeaderChecksumMismatch { expected: u8, actual: u8 },
    #[error("body checksum mismatch: expected {expected:#04x}, computed {actual:#04x}")]
    BodyChecksumMismatch { expected: u8, actual: u8 },
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("packet of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("peer name is longer than {MAX_PEER_NAME_LEN} bytes")]
    PeerNameTooLong,
    #[error("peer name contains a NUL byte")]
    InvalidPeerName,
    #[error("datagram of {actual} bytes carries a {declared} byte frame")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Fixed header fields. Only obtainable through [`PacketHeader::parse`], which validates the
/// header checksum first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub command: u8,
    pub peer_name_length: u8,
    pub data_length: u16,
    pub reserved_1: u8,
    pub reserved_2: u8,
    pub checksum: u8,
    pub header_checksum: u8,
}

impl PacketHeader {
    /// Parse and validate the header at the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::BufferTooShort {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let expected = bytes[HEADER_CHECKSUM_OFFSET];
        let actual = byte_checksum(&bytes[..HEADER_CHECKSUM_OFFSET]);
        if expected != actual {
            return Err(CodecError::HeaderChecksumMismatch { expected, actual });
        }
        // Lengths are read only after the header checksum held.
        Ok(Self {
            command: bytes[0],
            peer_name_length: bytes[1],
            data_length: u16::from_le_bytes([bytes[2], bytes[3]]),
            reserved_1: bytes[4],
            reserved_2: bytes[5],
            checksum: bytes[CHECKSUM_OFFSET],
            header_checksum: expected,
        })
    }

    /// Total wire length declared by this header.
    pub fn frame_len(&self) -> usize {
        packet_size(self.peer_name_length as usize, self.data_length as usize)
    }
}

/// Check the whole-frame checksum of a complete frame whose header is already validated.
pub(crate) fn verify_body(header: &PacketHeader, frame: &[u8]) -> Result<(), CodecError> {
    let actual = frame_checksum(frame);
    if actual != header.checksum {
        return Err(CodecError::BodyChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }
    Ok(())
}

fn frame_checksum(frame: &[u8]) -> u8 {
    byte_checksum_parts(&[&frame[..CHECKSUM_OFFSET], &frame[HEADER_SIZE..]])
}

/// Decoded packet: a view into the frame it was decoded from.
#[derive(Debug, Clone)]
pub struct Packet<'a> {
    header: PacketHeader,
    frame: &'a [u8],
    peer_name: &'a [u8],
    payload: Cow<'a, [u8]>,
}

impl<'a> Packet<'a> {
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn command(&self) -> u8 {
        self.header.command
    }

    /// Peer name without its terminator; empty when the packet is from the relay itself.
    pub fn peer_name_bytes(&self) -> &'a [u8] {
        let end = self
            .peer_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.peer_name.len());
        &self.peer_name[..end]
    }

    pub fn peer_name(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.peer_name_bytes())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Raw frame bytes as received (header, peer name, payload before any cipher).
    pub fn frame(&self) -> &'a [u8] {
        self.frame
    }

    pub fn frame_len(&self) -> usize {
        self.frame.len()
    }

    pub(crate) fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Cow::Owned(payload);
        self
    }
}

/// Encode a packet. `capacity` is the caller's output buffer limit.
pub fn encode_packet(
    command: u8,
    peer_name: &str,
    payload: &[u8],
    capacity: usize,
) -> Result<Vec<u8>, CodecError> {
    encode_packet_with_reserved(command, peer_name, payload, [0, 0], capacity)
}

/// Encode with explicit reserved bytes (carried through unchanged by the relay).
pub fn encode_packet_with_reserved(
    command: u8,
    peer_name: &str,
    payload: &[u8],
    reserved: [u8; 2],
    capacity: usize,
) -> Result<Vec<u8>, CodecError> {
    let name = peer_name.as_bytes();
    if name.contains(&0) {
        return Err(CodecError::InvalidPeerName);
    }
    if name.len() > MAX_PEER_NAME_LEN {
        return Err(CodecError::PeerNameTooLong);
    }
    let peer_name_length = if name.is_empty() { 0 } else { name.len() + 1 };
    let size = packet_size(peer_name_length, payload.len());
    if payload.len() > MAX_DATA_LEN {
        return Err(CodecError::PayloadTooLarge {
            size,
            limit: packet_size(peer_name_length, MAX_DATA_LEN),
        });
    }
    if size > capacity {
        return Err(CodecError::PayloadTooLarge {
            size,
            limit: capacity,
        });
    }

    let mut out = Vec::with_capacity(size);
    out.push(command);
    out.push(peer_name_length as u8);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&reserved);
    out.push(0); // checksum
    out.push(0); // header_checksum
    if peer_name_length > 0 {
        out.extend_from_slice(name);
        out.push(0);
    }
    out.extend_from_slice(payload);

    out[CHECKSUM_OFFSET] = frame_checksum(&out);
    out[HEADER_CHECKSUM_OFFSET] = byte_checksum(&out[..HEADER_CHECKSUM_OFFSET]);
    Ok(out)
}

/// Login payload: the client identity with a terminating NUL.
pub fn login_payload(identity: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(identity.len() + 1);
    payload.extend_from_slice(identity.as_bytes());
    payload.push(0);
    payload
}

/// Login packet: peer name empty, payload from [`login_payload`].
pub fn encode_login(identity: &str, capacity: usize) -> Result<Vec<u8>, CodecError> {
    encode_packet(
        crate::protocol::SystemCommand::Login.code(),
        "",
        &login_payload(identity),
        capacity,
    )
}

/// Decode the packet at the front of `bytes`. Bytes after the declared frame are ignored.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet<'_>, CodecError> {
    let header = PacketHeader::parse(bytes)?;
    let total = header.frame_len();
    if bytes.len() < total {
        return Err(CodecError::BufferTooShort {
            needed: total,
            available: bytes.len(),
        });
    }
    let frame = &bytes[..total];
    verify_body(&header, frame)?;

    let mut cursor = Cursor::new(&frame[HEADER_SIZE..]);
    let short = |e: crate::cursor::OutOfBounds| CodecError::BufferTooShort {
        needed: HEADER_SIZE + e.offset + e.needed,
        available: total,
    };
    let peer_name = cursor
        .take(header.peer_name_length as usize)
        .map_err(short)?;
    let payload = cursor.take(header.data_length as usize).map_err(short)?;

    Ok(Packet {
        header,
        frame,
        peer_name,
        payload: Cow::Borrowed(payload),
    })
}

/// Decode a datagram that must hold exactly one frame and nothing else.
pub fn decode_datagram(bytes: &[u8]) -> Result<Packet<'_>, CodecError> {
    let packet = decode_packet(bytes)?;
    if packet.frame_len() != bytes.len() {
        return Err(CodecError::LengthMismatch {
            declared: packet.frame_len(),
            actual: bytes.len(),
        });
    }
    Ok(packet)
}
