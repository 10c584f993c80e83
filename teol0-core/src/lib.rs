//! Teonet L0 client protocol core.
//! Host-driven: no I/O; host passes link events and received bytes, and performs the returned
//! outbound actions.

pub mod checksum;
pub mod connection;
pub mod crypt;
pub mod cursor;
pub mod echo;
pub mod events;
pub mod payloads;
pub mod protocol;
pub mod reassembly;
pub mod wire;

// C ABI for C/C++ hosts linking the staticlib.
pub mod ffi;

pub use connection::{
    ConnectError, ConnectionConfig, ConnectionStatus, L0Connection, OutboundAction, Outbox,
    PacketError, SendError, StreamError, TransportKind,
};
pub use crypt::{derive_session_key, ChaChaCipher, CipherError, PayloadCipher, Role};
pub use echo::{build_echo_payload, echo_message, round_trip_ms, EchoError};
pub use events::{Event, EventDispatcher, EventKind, EventSink, NoopSink};
pub use payloads::{ArpEntry, ClientsAnswer, PayloadError, PeerMode, PeersAnswer};
pub use protocol::{SystemCommand, CLIENT_VERSION, CMD_L_END};
pub use reassembly::{FrameReassembler, NextFrame};
pub use wire::{
    decode_datagram, decode_packet, encode_login, encode_packet, CodecError, Packet,
    MAX_PACKET_SIZE,
};
