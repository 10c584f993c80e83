//! Connection state machine. Host-driven: no I/O; the host reports link events and incoming
//! bytes, and performs the returned actions in order.

use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::crypt::{CipherError, PayloadCipher};
use crate::echo::build_echo_payload;
use crate::events::{Event, EventDispatcher, EventSink};
use crate::protocol::SystemCommand;
use crate::reassembly::{FrameReassembler, NextFrame};
use crate::wire::{
    decode_datagram, decode_packet, encode_packet, login_payload, CodecError, Packet,
    MAX_PACKET_SIZE,
};

/// Link flavor. Stream links go through the reassembler; datagram links deliver one frame per
/// datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransportKind {
    #[default]
    #[serde(rename = "tcp")]
    Stream,
    #[serde(rename = "trudp")]
    ReliableDatagram,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Stream => "tcp",
            TransportKind::ReliableDatagram => "trudp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" | "stream" => Ok(TransportKind::Stream),
            "trudp" | "udp" => Ok(TransportKind::ReliableDatagram),
            other => Err(format!("unknown transport {other:?} (expected tcp or trudp)")),
        }
    }
}

/// Why a connect attempt failed. Each cause keeps its own status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("can't create socket")]
    Socket,
    #[error("host not found")]
    HostNotFound,
    #[error("can't connect to server")]
    Connect,
    #[error("can't create wake-up pipe")]
    Pipe,
    #[error("can't set up encryption")]
    Encryption,
}

impl ConnectError {
    pub fn code(self) -> i32 {
        match self {
            ConnectError::Socket => -1,
            ConnectError::HostNotFound => -2,
            ConnectError::Connect => -3,
            ConnectError::Pipe => -4,
            ConnectError::Encryption => -5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(ConnectError),
}

impl ConnectionStatus {
    /// 1 connected, 0 not connected, negative failure cause.
    pub fn code(self) -> i32 {
        match self {
            ConnectionStatus::Connected => 1,
            ConnectionStatus::Disconnected | ConnectionStatus::Connecting => 0,
            ConnectionStatus::Failed(e) => e.code(),
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => f.write_str("CON_STATUS_NOT_CONNECTED"),
            ConnectionStatus::Connecting => f.write_str("CON_STATUS_CONNECTING"),
            ConnectionStatus::Connected => f.write_str("CON_STATUS_CONNECTED"),
            ConnectionStatus::Failed(e) => write!(f, "CON_STATUS_FAILED({}): {e}", e.code()),
        }
    }
}

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Name sent in the login packet.
    pub identity: String,
    pub transport: TransportKind,
    /// Largest declared frame accepted from the relay.
    pub max_frame_size: usize,
    /// Output buffer limit for encoded packets.
    pub send_capacity: usize,
    /// Queue the login packet ahead of the `Connected` event.
    pub auto_login: bool,
}

impl ConnectionConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            transport: TransportKind::Stream,
            max_frame_size: MAX_PACKET_SIZE,
            send_capacity: MAX_PACKET_SIZE,
            auto_login: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Failure to turn a received frame into a packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Fatal stream failure. `actions` holds what the sink queued for frames delivered before the
/// failure; the host performs them, then closes the link.
#[derive(Debug, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct StreamError {
    #[source]
    pub error: CodecError,
    pub actions: Vec<OutboundAction>,
}

/// What the host must do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    /// Write this frame to the link.
    SendFrame(Bytes),
    /// Close the link.
    Close,
}

fn seal_and_encode(
    cipher: Option<&mut Box<dyn PayloadCipher>>,
    capacity: usize,
    command: u8,
    peer_name: &str,
    payload: &[u8],
) -> Result<Bytes, SendError> {
    let sealed;
    let body = match cipher {
        Some(c) if !SystemCommand::is_plaintext_only(command) => {
            sealed = c.seal(payload)?;
            sealed.as_slice()
        }
        _ => payload,
    };
    let frame = encode_packet(command, peer_name, body, capacity)?;
    debug!(cmd = command, to = peer_name, len = frame.len(), "packet encoded");
    Ok(Bytes::from(frame))
}

/// Handed to the sink with every event. Frames queued here go out after anything already
/// queued for the same event.
pub struct Outbox<'a> {
    config: &'a ConnectionConfig,
    cipher: Option<&'a mut Box<dyn PayloadCipher>>,
    actions: &'a mut Vec<OutboundAction>,
    connected: bool,
}

impl Outbox<'_> {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    /// Queue a packet. Returns the encoded frame length.
    pub fn send(&mut self, command: u8, peer_name: &str, payload: &[u8]) -> Result<usize, SendError> {
        if !self.connected {
            return Err(SendError::NotConnected);
        }
        let frame = seal_and_encode(
            self.cipher.as_deref_mut(),
            self.config.send_capacity,
            command,
            peer_name,
            payload,
        )?;
        let len = frame.len();
        self.actions.push(OutboundAction::SendFrame(frame));
        Ok(len)
    }

    pub fn send_echo(&mut self, peer_name: &str, message: &[u8]) -> Result<usize, SendError> {
        self.send(
            SystemCommand::Echo.code(),
            peer_name,
            &build_echo_payload(message),
        )
    }

    /// Queue a login with the configured identity.
    pub fn login(&mut self) -> Result<usize, SendError> {
        let payload = login_payload(&self.config.identity);
        self.send(SystemCommand::Login.code(), "", &payload)
    }

    /// Ask the host to close the link after the queued frames.
    pub fn close(&mut self) {
        self.actions.push(OutboundAction::Close);
    }
}

/// One client link to the relay.
pub struct L0Connection<S> {
    config: ConnectionConfig,
    status: ConnectionStatus,
    reassembler: FrameReassembler,
    // Read bytes not yet handed to the reassembler.
    backlog: BytesMut,
    dispatcher: EventDispatcher<S>,
    cipher: Option<Box<dyn PayloadCipher>>,
    last_frame_len: usize,
    frames_received: u64,
    frames_rejected: u64,
}

impl<S: EventSink> L0Connection<S> {
    pub fn new(config: ConnectionConfig, sink: S) -> Self {
        let reassembler = FrameReassembler::new(config.max_frame_size);
        let dispatcher = EventDispatcher::new(sink, config.auto_login);
        Self {
            config,
            status: ConnectionStatus::Disconnected,
            reassembler,
            backlog: BytesMut::new(),
            dispatcher,
            cipher: None,
            last_frame_len: 0,
            frames_received: 0,
            frames_rejected: 0,
        }
    }

    /// Install the payload cipher. Applies to every packet except login and crypto-key.
    pub fn set_cipher(&mut self, cipher: Box<dyn PayloadCipher>) {
        self.cipher = Some(cipher);
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// Length of the most recently received frame.
    pub fn last_frame_len(&self) -> usize {
        self.last_frame_len
    }

    /// Received bytes not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.reassembler.buffered() + self.backlog.len()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Frames dropped after checksum, decode or cipher failure. Stream resync bytes are counted
    /// by the reassembler instead.
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.reassembler.dropped_bytes()
    }

    pub fn sink(&self) -> &S {
        self.dispatcher.sink()
    }

    pub fn sink_mut(&mut self) -> &mut S {
        self.dispatcher.sink_mut()
    }

    pub fn into_sink(self) -> S {
        self.dispatcher.into_sink()
    }

    pub fn begin_connect(&mut self) {
        self.clear_input();
        self.status = ConnectionStatus::Connecting;
        debug!(identity = %self.config.identity, transport = %self.config.transport, "connecting");
    }

    pub fn on_connect_failed(&mut self, cause: ConnectError) {
        self.clear_input();
        self.status = ConnectionStatus::Failed(cause);
        error!(code = cause.code(), error = %cause, "connect failed");
    }

    /// Link established. Returns the login frame (when auto-login is on) followed by whatever
    /// the sink queued for `Connected`.
    pub fn on_link_up(&mut self) -> Vec<OutboundAction> {
        self.status = ConnectionStatus::Connected;
        info!(identity = %self.config.identity, transport = %self.config.transport, "connected to relay");
        self.dispatch(Event::Connected)
    }

    /// Link lost or closed. Safe to call repeatedly; only the first call after a connect emits
    /// `Disconnected`.
    pub fn on_link_down(&mut self) -> Vec<OutboundAction> {
        self.clear_input();
        match self.status {
            ConnectionStatus::Connected => {
                self.status = ConnectionStatus::Disconnected;
                info!(identity = %self.config.identity, "disconnected from relay");
                self.dispatch(Event::Disconnected)
            }
            ConnectionStatus::Connecting => {
                self.status = ConnectionStatus::Disconnected;
                Vec::new()
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Failed(_) => Vec::new(),
        }
    }

    /// Bytes read from a stream link. Every complete frame is delivered as `Received` before
    /// this returns. A read of any size is accepted; only a single oversized frame is fatal,
    /// and then the link must be closed.
    pub fn on_stream_data(&mut self, data: &[u8]) -> Result<Vec<OutboundAction>, StreamError> {
        self.backlog.extend_from_slice(data);
        let mut actions = Vec::new();
        loop {
            match self.next_stream_frame() {
                Ok(NextFrame::Frame(frame)) => actions.extend(self.deliver(&frame)),
                Ok(NextFrame::Invalid) => continue,
                Ok(NextFrame::Incomplete) => break,
                Err(error) => {
                    error!(%error, "unrecoverable frame");
                    return Err(StreamError { error, actions });
                }
            }
        }
        Ok(actions)
    }

    /// One datagram from a datagram link. Holds exactly one frame; no reassembly.
    pub fn on_datagram(&mut self, datagram: &[u8]) -> Vec<OutboundAction> {
        if let Err(e) = decode_datagram(datagram) {
            self.frames_rejected += 1;
            warn!(error = %e, len = datagram.len(), "dropping datagram");
            return Vec::new();
        }
        self.deliver(datagram)
    }

    /// Pull-style input: queue stream bytes without dispatching anything. Poll until
    /// `Incomplete` before feeding the next read.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.backlog.extend_from_slice(data);
        self.top_up()
    }

    /// Pull-style output: next raw frame from fed bytes. Decode it with [`Self::open_packet`].
    pub fn poll_frame(&mut self) -> Result<NextFrame, CodecError> {
        let next = self.next_stream_frame()?;
        if let NextFrame::Frame(f) = &next {
            self.last_frame_len = f.len();
            self.frames_received += 1;
        }
        Ok(next)
    }

    /// `Incomplete` only once the backlog is drained.
    fn next_stream_frame(&mut self) -> Result<NextFrame, CodecError> {
        loop {
            self.top_up()?;
            match self.reassembler.next_frame()? {
                NextFrame::Incomplete if !self.backlog.is_empty() => continue,
                next => return Ok(next),
            }
        }
    }

    /// Move as much of the backlog into the reassembler as its bound allows.
    fn top_up(&mut self) -> Result<(), CodecError> {
        let room = self
            .reassembler
            .buffer_limit()
            .saturating_sub(self.reassembler.buffered());
        let take = room.min(self.backlog.len());
        if take > 0 {
            let chunk = self.backlog.split_to(take);
            self.reassembler.feed(&chunk)?;
        }
        Ok(())
    }

    fn clear_input(&mut self) {
        self.reassembler.clear();
        self.backlog.clear();
    }

    /// Decode a frame and open its payload with the installed cipher.
    pub fn open_packet<'f>(&mut self, frame: &'f [u8]) -> Result<Packet<'f>, PacketError> {
        let packet = decode_packet(frame)?;
        match self.cipher.as_mut() {
            Some(cipher) if !SystemCommand::is_plaintext_only(packet.command()) => {
                let plain = cipher.open(packet.payload())?;
                Ok(packet.with_payload(plain))
            }
            _ => Ok(packet),
        }
    }

    pub fn on_tick(&mut self) -> Vec<OutboundAction> {
        self.dispatch(Event::Tick)
    }

    pub fn on_idle(&mut self) -> Vec<OutboundAction> {
        self.dispatch(Event::Idle)
    }

    /// Encode a login packet for `identity`.
    pub fn login(&mut self, identity: &str) -> Result<Bytes, SendError> {
        self.encode(SystemCommand::Login.code(), "", &login_payload(identity))
    }

    /// Encode a packet for `peer_name`.
    pub fn send(&mut self, command: u8, peer_name: &str, payload: &[u8]) -> Result<Bytes, SendError> {
        self.encode(command, peer_name, payload)
    }

    /// Encode an echo request stamped with the current time.
    pub fn send_echo(&mut self, peer_name: &str, message: &[u8]) -> Result<Bytes, SendError> {
        self.encode(
            SystemCommand::Echo.code(),
            peer_name,
            &build_echo_payload(message),
        )
    }

    fn encode(&mut self, command: u8, peer_name: &str, payload: &[u8]) -> Result<Bytes, SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        seal_and_encode(
            self.cipher.as_mut(),
            self.config.send_capacity,
            command,
            peer_name,
            payload,
        )
    }

    fn deliver(&mut self, frame: &[u8]) -> Vec<OutboundAction> {
        match self.open_packet(frame) {
            Ok(packet) => {
                self.last_frame_len = frame.len();
                self.frames_received += 1;
                debug!(
                    cmd = packet.command(),
                    from = %packet.peer_name(),
                    len = frame.len(),
                    "packet received"
                );
                self.dispatch(Event::Received(packet))
            }
            Err(e) => {
                self.frames_rejected += 1;
                warn!(error = %e, len = frame.len(), "dropping packet");
                Vec::new()
            }
        }
    }

    fn dispatch(&mut self, event: Event<'_>) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        let mut out = Outbox {
            config: &self.config,
            cipher: self.cipher.as_mut(),
            actions: &mut actions,
            connected: self.status.is_connected(),
        };
        self.dispatcher.dispatch(&mut out, event);
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::{derive_session_key, ChaChaCipher, Role};
    use crate::echo::echo_message;
    use crate::events::{EventKind, NoopSink};
    use crate::protocol::APPLICATION_COMMAND_BASE;
    use crate::wire::HEADER_SIZE;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(EventKind, u8, Vec<u8>)>,
    }

    impl EventSink for Recorder {
        fn on_event(&mut self, _out: &mut Outbox<'_>, event: Event<'_>) {
            let (cmd, payload) = match &event {
                Event::Received(p) => (p.command(), p.payload().to_vec()),
                _ => (0, Vec::new()),
            };
            self.seen.push((event.kind(), cmd, payload));
        }
    }

    /// Sends one application packet as soon as the link is up.
    struct Greeter;

    impl EventSink for Greeter {
        fn on_event(&mut self, out: &mut Outbox<'_>, event: Event<'_>) {
            if let Event::Connected = event {
                out.send(APPLICATION_COMMAND_BASE, "teostream", b"hi").unwrap();
            }
        }
    }

    fn frames(actions: &[OutboundAction]) -> Vec<Bytes> {
        actions
            .iter()
            .filter_map(|a| match a {
                OutboundAction::SendFrame(f) => Some(f.clone()),
                OutboundAction::Close => None,
            })
            .collect()
    }

    fn connected<S: EventSink>(sink: S) -> (L0Connection<S>, Vec<OutboundAction>) {
        let mut conn = L0Connection::new(ConnectionConfig::new("C3"), sink);
        conn.begin_connect();
        let actions = conn.on_link_up();
        (conn, actions)
    }

    fn relay_frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
        encode_packet(cmd, "teostream", payload, MAX_PACKET_SIZE).unwrap()
    }

    #[test]
    fn login_precedes_sink_traffic() {
        let (_conn, actions) = connected(Greeter);
        let sent = frames(&actions);
        assert_eq!(sent.len(), 2);
        let login = decode_packet(&sent[0]).unwrap();
        assert_eq!(login.command(), SystemCommand::Login.code());
        assert_eq!(login.peer_name(), "");
        assert_eq!(login.payload(), b"C3\0");
        assert_eq!(decode_packet(&sent[1]).unwrap().command(), APPLICATION_COMMAND_BASE);
    }

    #[test]
    fn login_once_per_connect() {
        let (mut conn, first) = connected(NoopSink);
        assert_eq!(frames(&first).len(), 1);
        assert!(conn.on_tick().is_empty());
        conn.on_link_down();
        conn.begin_connect();
        let second = frames(&conn.on_link_up());
        assert_eq!(second.len(), 1);
        assert_eq!(decode_packet(&second[0]).unwrap().command(), 0);
    }

    #[test]
    fn auto_login_can_be_disabled() {
        let mut config = ConnectionConfig::new("C3");
        config.auto_login = false;
        let mut conn = L0Connection::new(config, NoopSink);
        conn.begin_connect();
        assert!(conn.on_link_up().is_empty());
    }

    #[test]
    fn send_requires_connection() {
        let mut conn = L0Connection::new(ConnectionConfig::new("C3"), NoopSink);
        assert_eq!(conn.send(130, "p", b"x"), Err(SendError::NotConnected));
        conn.begin_connect();
        assert_eq!(conn.login("C3"), Err(SendError::NotConnected));
    }

    #[test]
    fn split_stream_delivers_in_order() {
        let (mut conn, _) = connected(Recorder::default());
        let mut bytes = relay_frame(66, b"one");
        bytes.extend(relay_frame(130, b"two"));
        let (a, b) = bytes.split_at(5);
        assert!(conn.on_stream_data(a).unwrap().is_empty());
        assert_eq!(conn.buffered(), 5);
        conn.on_stream_data(b).unwrap();

        let seen = &conn.sink().seen;
        assert_eq!(seen[0].0, EventKind::Connected);
        assert_eq!(seen[1], (EventKind::Received, 66, b"one".to_vec()));
        assert_eq!(seen[2], (EventKind::Received, 130, b"two".to_vec()));
        assert_eq!(conn.frames_received(), 2);
        assert_eq!(conn.last_frame_len(), relay_frame(130, b"two").len());
    }

    #[test]
    fn link_down_is_idempotent() {
        let (mut conn, _) = connected(Recorder::default());
        conn.on_stream_data(&relay_frame(66, b"partial")[..4]).unwrap();
        conn.on_link_down();
        conn.on_link_down();
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert_eq!(conn.buffered(), 0);
        let disconnects = conn
            .sink()
            .seen
            .iter()
            .filter(|(k, _, _)| *k == EventKind::Disconnected)
            .count();
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn connect_failure_keeps_cause() {
        let mut conn = L0Connection::new(ConnectionConfig::new("C3"), Recorder::default());
        conn.begin_connect();
        conn.on_connect_failed(ConnectError::Connect);
        assert_eq!(conn.status().code(), -3);
        assert!(conn.on_link_down().is_empty());
        assert!(conn.sink().seen.is_empty());
        assert_eq!(ConnectionStatus::Failed(ConnectError::Encryption).code(), -5);
    }

    #[test]
    fn corrupt_datagram_is_dropped() {
        let (mut conn, _) = connected(Recorder::default());
        let mut bad = relay_frame(130, b"payload");
        let last = bad.len() - 1;
        bad[last] ^= 0x10;
        assert!(conn.on_datagram(&bad).is_empty());
        assert_eq!(conn.frames_rejected(), 1);
        conn.on_datagram(&relay_frame(130, b"payload"));
        assert_eq!(conn.sink().seen.len(), 2);
    }

    #[test]
    fn oversized_stream_frame_is_fatal() {
        let mut config = ConnectionConfig::new("C3");
        config.max_frame_size = 32;
        let mut conn = L0Connection::new(config, NoopSink);
        conn.begin_connect();
        conn.on_link_up();
        let big = relay_frame(130, &[7u8; 64]);
        assert!(matches!(
            conn.on_stream_data(&big[..16]),
            Err(StreamError {
                error: CodecError::FrameTooLarge { .. },
                ..
            })
        ));
    }

    fn small_frames_config() -> ConnectionConfig {
        let mut config = ConnectionConfig::new("C3");
        config.max_frame_size = 64;
        config
    }

    #[test]
    fn burst_larger_than_buffer_bound_is_delivered() {
        let mut conn = L0Connection::new(small_frames_config(), Recorder::default());
        conn.begin_connect();
        conn.on_link_up();
        let one = encode_packet(130, "p", b"0123456789", MAX_PACKET_SIZE).unwrap();
        let burst = one.repeat(10);
        assert!(burst.len() > 128);

        conn.on_stream_data(&burst).unwrap();
        assert_eq!(conn.frames_received(), 10);
        assert_eq!(conn.buffered(), 0);
        assert_eq!(conn.sink().seen.len(), 11);
    }

    #[test]
    fn pull_burst_is_drained_frame_by_frame() {
        let mut conn = L0Connection::new(small_frames_config(), NoopSink);
        conn.begin_connect();
        conn.on_link_up();
        let one = encode_packet(130, "p", b"0123456789", MAX_PACKET_SIZE).unwrap();
        conn.feed(&one.repeat(10)).unwrap();
        for _ in 0..10 {
            assert_eq!(conn.poll_frame().unwrap().code(), one.len() as isize);
        }
        assert_eq!(conn.poll_frame().unwrap(), NextFrame::Incomplete);
    }

    /// Answers every received packet with a pong.
    struct Ponger;

    impl EventSink for Ponger {
        fn on_event(&mut self, out: &mut Outbox<'_>, event: Event<'_>) {
            if let Event::Received(_) = event {
                out.send(131, "teostream", b"pong").unwrap();
            }
        }
    }

    #[test]
    fn fatal_frame_keeps_replies_to_earlier_frames() {
        let mut conn = L0Connection::new(small_frames_config(), Ponger);
        conn.begin_connect();
        conn.on_link_up();
        let mut bytes = relay_frame(130, b"ping");
        let big = relay_frame(130, &[7u8; 90]);
        bytes.extend_from_slice(&big[..HEADER_SIZE]);

        let err = conn.on_stream_data(&bytes).unwrap_err();
        assert!(matches!(err.error, CodecError::FrameTooLarge { limit: 64, .. }));
        assert_eq!(conn.frames_received(), 1);
        let replies = frames(&err.actions);
        assert_eq!(replies.len(), 1);
        assert_eq!(decode_packet(&replies[0]).unwrap().payload(), b"pong");
    }

    #[test]
    fn datagram_with_trailing_bytes_is_dropped() {
        let (mut conn, _) = connected(Recorder::default());
        let mut padded = relay_frame(130, b"payload");
        padded.extend_from_slice(b"xx");
        assert!(conn.on_datagram(&padded).is_empty());
        assert_eq!(conn.frames_rejected(), 1);
        assert_eq!(conn.sink().seen.len(), 1);
    }

    #[test]
    fn pull_api_returns_raw_frames() {
        let (mut conn, _) = connected(Recorder::default());
        let f = relay_frame(80, b"clients");
        conn.feed(&f[..3]).unwrap();
        assert_eq!(conn.poll_frame().unwrap().code(), -1);
        conn.feed(&f[3..]).unwrap();
        let NextFrame::Frame(raw) = conn.poll_frame().unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(raw.len(), f.len());
        let packet = conn.open_packet(&raw).unwrap();
        assert_eq!(packet.payload(), b"clients");
        // Only the Connected event was dispatched.
        assert_eq!(conn.sink().seen.len(), 1);
    }

    #[test]
    fn echo_frame_carries_message() {
        let (mut conn, _) = connected(NoopSink);
        let frame = conn.send_echo("teostream", b"Hello").unwrap();
        let p = decode_packet(&frame).unwrap();
        assert_eq!(p.command(), SystemCommand::Echo.code());
        assert_eq!(echo_message(p.payload()).unwrap(), b"Hello");
    }

    #[test]
    fn cipher_wraps_everything_but_login() {
        let key = derive_session_key(b"shared secret");
        let mut relay = ChaChaCipher::new(&key, Role::Relay).unwrap();
        let (mut conn, _) = connected(Recorder::default());
        conn.set_cipher(Box::new(ChaChaCipher::new(&key, Role::Client).unwrap()));

        let login = conn.login("C3").unwrap();
        assert_eq!(decode_packet(&login).unwrap().payload(), b"C3\0");

        let out = conn.send(130, "teostream", b"secret").unwrap();
        let p = decode_packet(&out).unwrap();
        assert_ne!(p.payload(), b"secret");
        assert_eq!(relay.open(p.payload()).unwrap(), b"secret");

        let sealed = relay.seal(b"reply").unwrap();
        conn.on_stream_data(&relay_frame(131, &sealed)).unwrap();
        assert_eq!(conn.sink().seen.last().unwrap().2, b"reply");

        conn.on_stream_data(&relay_frame(131, b"plaintext")).unwrap();
        assert_eq!(conn.frames_rejected(), 1);
    }

    #[test]
    fn transport_names() {
        assert_eq!("tcp".parse::<TransportKind>().unwrap(), TransportKind::Stream);
        assert_eq!("TRUDP".parse::<TransportKind>().unwrap(), TransportKind::ReliableDatagram);
        assert!("sctp".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::ReliableDatagram.to_string(), "trudp");
    }

    #[test]
    fn status_display() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "CON_STATUS_CONNECTED");
        assert_eq!(ConnectionStatus::Connected.code(), 1);
        assert_eq!(ConnectionStatus::Connecting.code(), 0);
    }
}
