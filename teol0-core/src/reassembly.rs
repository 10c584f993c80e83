//! Stream reassembly: split or combine arbitrary reads into checksum-validated frames.
//!
//! Bytes of a not-yet-complete frame are kept across calls. A header or body checksum failure
//! drops exactly one buffered byte so the caller can re-poll and find the next frame boundary.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::protocol::L0_BUFFER_SIZE;
use crate::wire::{verify_body, CodecError, PacketHeader, HEADER_SIZE, MAX_PACKET_SIZE};

/// Result of one [`FrameReassembler::next_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextFrame {
    /// A complete, checksum-validated frame.
    Frame(Bytes),
    /// Not enough bytes buffered yet. Read more from the transport.
    Incomplete,
    /// A corrupt byte was dropped. Poll again.
    Invalid,
}

impl NextFrame {
    /// Integer form of the pull result: frame length, -1 not yet complete, -2 invalid.
    pub fn code(&self) -> isize {
        match self {
            NextFrame::Frame(f) => f.len() as isize,
            NextFrame::Incomplete => -1,
            NextFrame::Invalid => -2,
        }
    }
}

#[derive(Debug)]
pub struct FrameReassembler {
    buffer: BytesMut,
    max_frame_size: usize,
    last_frame_len: usize,
    dropped_bytes: u64,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl FrameReassembler {
    /// `max_frame_size` bounds a single declared frame; the buffer itself holds at most twice that.
    pub fn new(max_frame_size: usize) -> Self {
        let max_frame_size = max_frame_size.max(HEADER_SIZE);
        Self {
            buffer: BytesMut::with_capacity(L0_BUFFER_SIZE.min(max_frame_size)),
            max_frame_size,
            last_frame_len: 0,
            dropped_bytes: 0,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Hard cap on buffered bytes. Any frame within `max_frame_size` fits; callers holding a
    /// larger read feed it in pieces of at most `buffer_limit() - buffered()` bytes.
    pub fn buffer_limit(&self) -> usize {
        self.max_frame_size.saturating_mul(2)
    }

    /// Append bytes read from the transport.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let size = self.buffer.len() + data.len();
        if size > self.buffer_limit() {
            return Err(CodecError::FrameTooLarge {
                size,
                limit: self.buffer_limit(),
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Extract the next frame, if one is complete.
    ///
    /// `Err(FrameTooLarge)` is fatal: the declared length cannot be honored and the stream
    /// cannot be recovered in place.
    pub fn next_frame(&mut self) -> Result<NextFrame, CodecError> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(NextFrame::Incomplete);
        }
        let header = match PacketHeader::parse(&self.buffer) {
            Ok(h) => h,
            Err(e) => {
                self.resync(&e);
                return Ok(NextFrame::Invalid);
            }
        };
        let len = header.frame_len();
        if len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: len,
                limit: self.max_frame_size,
            });
        }
        if self.buffer.len() < len {
            self.buffer.reserve(len - self.buffer.len());
            trace!(have = self.buffer.len(), need = len, "partial frame buffered");
            return Ok(NextFrame::Incomplete);
        }
        if let Err(e) = verify_body(&header, &self.buffer[..len]) {
            self.resync(&e);
            return Ok(NextFrame::Invalid);
        }
        self.last_frame_len = len;
        Ok(NextFrame::Frame(self.buffer.split_to(len).freeze()))
    }

    fn resync(&mut self, reason: &CodecError) {
        warn!(%reason, buffered = self.buffer.len(), "dropping one byte to resynchronize");
        self.buffer.advance(1);
        self.dropped_bytes += 1;
    }

    /// Bytes currently held and not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Length of the most recently extracted frame.
    pub fn last_frame_len(&self) -> usize {
        self.last_frame_len
    }

    /// Total bytes discarded by resynchronization.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_frame_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::wire::{decode_packet, encode_packet};

    fn frame(cmd: u8, peer: &str, payload: &[u8]) -> Vec<u8> {
        encode_packet(cmd, peer, payload, MAX_PACKET_SIZE).unwrap()
    }

    fn expect_frame(r: &mut FrameReassembler) -> Bytes {
        match r.next_frame().unwrap() {
            NextFrame::Frame(b) => b,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn two_frames_in_one_read() {
        let a = frame(65, "peer", b"hello");
        let b = frame(130, "", b"world!");
        let mut joined = a.clone();
        joined.extend_from_slice(&b);

        let mut r = FrameReassembler::default();
        r.feed(&joined).unwrap();
        assert_eq!(expect_frame(&mut r).as_ref(), a.as_slice());
        assert_eq!(expect_frame(&mut r).as_ref(), b.as_slice());
        assert_eq!(r.next_frame().unwrap(), NextFrame::Incomplete);
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.last_frame_len(), b.len());
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(8)]
    #[case(9)]
    #[case(15)]
    fn frame_split_across_reads(#[case] at: usize) {
        let a = frame(73, "teostream", b"split me");
        let mut r = FrameReassembler::default();
        r.feed(&a[..at]).unwrap();
        assert_eq!(r.next_frame().unwrap(), NextFrame::Incomplete);
        r.feed(&a[at..]).unwrap();
        assert_eq!(expect_frame(&mut r).as_ref(), a.as_slice());
    }

    #[test]
    fn garbage_byte_is_dropped_then_frame_found() {
        let a = frame(65, "peer", b"hello");
        let mut r = FrameReassembler::default();
        r.feed(&[0xaa]).unwrap();
        r.feed(&a).unwrap();
        assert_eq!(r.next_frame().unwrap(), NextFrame::Invalid);
        assert_eq!(r.dropped_bytes(), 1);
        let got = expect_frame(&mut r);
        assert_eq!(decode_packet(&got).unwrap().payload(), b"hello");
    }

    #[test]
    fn corrupt_body_drops_one_byte_at_a_time() {
        let mut bad = frame(130, "p", b"abcdef");
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let good = frame(131, "", b"next");

        let mut r = FrameReassembler::default();
        r.feed(&bad).unwrap();
        r.feed(&good).unwrap();
        let mut invalid = 0;
        let found = loop {
            match r.next_frame().unwrap() {
                NextFrame::Invalid => invalid += 1,
                NextFrame::Frame(f) => break f,
                NextFrame::Incomplete => panic!("good frame lost"),
            }
        };
        assert_eq!(found.as_ref(), good.as_slice());
        assert_eq!(invalid as u64, r.dropped_bytes());
        assert_eq!(invalid, bad.len());
    }

    #[test]
    fn declared_frame_over_limit_is_fatal() {
        let a = frame(130, "", &[0u8; 64]);
        let mut r = FrameReassembler::new(32);
        r.feed(&a[..HEADER_SIZE]).unwrap();
        assert!(matches!(
            r.next_frame(),
            Err(CodecError::FrameTooLarge { size: 72, limit: 32 })
        ));
    }

    #[test]
    fn feed_over_buffer_limit_is_rejected() {
        let mut r = FrameReassembler::new(16);
        r.feed(&[0u8; 20]).unwrap();
        assert!(matches!(
            r.feed(&[0u8; 20]),
            Err(CodecError::FrameTooLarge { size: 40, limit: 32 })
        ));
        assert_eq!(r.buffered(), 20);
    }

    #[test]
    fn header_only_needs_more() {
        let a = frame(65, "peer", b"hello");
        let mut r = FrameReassembler::default();
        r.feed(&a[..HEADER_SIZE]).unwrap();
        assert_eq!(r.next_frame().unwrap(), NextFrame::Incomplete);
        assert_eq!(r.buffered(), HEADER_SIZE);
    }

    #[test]
    fn pull_codes() {
        let a = frame(65, "peer", b"hello");
        assert_eq!(NextFrame::Frame(Bytes::from(a.clone())).code(), a.len() as isize);
        assert_eq!(NextFrame::Incomplete.code(), -1);
        assert_eq!(NextFrame::Invalid.code(), -2);
    }
}
