//! Echo round-trip timing.
//!
//! Echo payload: message bytes, a NUL, then the send time as microseconds since the Unix epoch
//! (u64, little endian). The relay returns the payload unchanged in the echo answer.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::protocol::SystemCommand;
use crate::wire::{encode_packet, CodecError};

/// Width of the embedded timestamp.
pub const TIMESTAMP_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EchoError {
    #[error("echo payload of {len} bytes is shorter than the {TIMESTAMP_LEN}-byte timestamp")]
    MalformedEchoPayload { len: usize },
}

fn micros_since_epoch(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_micros() as u64
}

/// Build an echo payload stamped with the current time.
pub fn build_echo_payload(message: &[u8]) -> Vec<u8> {
    build_echo_payload_at(message, SystemTime::now())
}

pub fn build_echo_payload_at(message: &[u8], sent: SystemTime) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 1 + TIMESTAMP_LEN);
    out.extend_from_slice(message);
    out.push(0);
    out.extend_from_slice(&micros_since_epoch(sent).to_le_bytes());
    out
}

fn split(payload: &[u8]) -> Result<(&[u8], u64), EchoError> {
    if payload.len() < TIMESTAMP_LEN {
        return Err(EchoError::MalformedEchoPayload { len: payload.len() });
    }
    let (head, stamp) = payload.split_at(payload.len() - TIMESTAMP_LEN);
    let mut raw = [0u8; TIMESTAMP_LEN];
    raw.copy_from_slice(stamp);
    let message = head.strip_suffix(&[0]).unwrap_or(head);
    Ok((message, u64::from_le_bytes(raw)))
}

/// The message part of an echo payload, without the separator and timestamp.
pub fn echo_message(payload: &[u8]) -> Result<&[u8], EchoError> {
    split(payload).map(|(message, _)| message)
}

/// Milliseconds between the embedded send time and now.
pub fn round_trip_ms(payload: &[u8]) -> Result<f64, EchoError> {
    round_trip_ms_at(payload, SystemTime::now())
}

/// Milliseconds between the embedded send time and `now`. Clock steps backwards yield 0.
pub fn round_trip_ms_at(payload: &[u8], now: SystemTime) -> Result<f64, EchoError> {
    let (_, sent) = split(payload)?;
    let elapsed = micros_since_epoch(now).saturating_sub(sent);
    Ok(elapsed as f64 / 1000.0)
}

/// Echo packet addressed to `peer_name`.
pub fn encode_echo(peer_name: &str, message: &[u8], capacity: usize) -> Result<Vec<u8>, CodecError> {
    encode_packet(
        SystemCommand::Echo.code(),
        peer_name,
        &build_echo_payload(message),
        capacity,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode_packet, MAX_PACKET_SIZE};

    #[test]
    fn trip_time_matches_elapsed() {
        let t0 = SystemTime::now();
        let payload = build_echo_payload_at(b"Hello", t0);
        let ms = round_trip_ms_at(&payload, t0 + Duration::from_millis(250)).unwrap();
        assert!((ms - 250.0).abs() < 0.01, "got {ms}");
    }

    #[test]
    fn live_clock_trip_time_is_small() {
        let payload = build_echo_payload(b"ping");
        let ms = round_trip_ms(&payload).unwrap();
        assert!((0.0..1000.0).contains(&ms));
    }

    #[test]
    fn message_is_recoverable() {
        let payload = build_echo_payload(b"Story about this world!");
        assert_eq!(echo_message(&payload).unwrap(), b"Story about this world!");
    }

    #[test]
    fn short_payload_is_malformed() {
        assert_eq!(
            round_trip_ms(&[1, 2, 3]),
            Err(EchoError::MalformedEchoPayload { len: 3 })
        );
    }

    #[test]
    fn clock_going_backwards_saturates() {
        let t0 = SystemTime::now();
        let payload = build_echo_payload_at(b"x", t0);
        let ms = round_trip_ms_at(&payload, t0 - Duration::from_secs(1)).unwrap();
        assert_eq!(ms, 0.0);
    }

    #[test]
    fn echo_packet_addresses_peer() {
        let frame = encode_echo("teostream", b"Hello", MAX_PACKET_SIZE).unwrap();
        let p = decode_packet(&frame).unwrap();
        assert_eq!(p.command(), SystemCommand::Echo.code());
        assert_eq!(p.peer_name(), "teostream");
        assert_eq!(echo_message(p.payload()).unwrap(), b"Hello");
    }
}
