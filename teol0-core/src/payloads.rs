//! Payload formats of the peers answer (73) and clients answer (80).
//!
//! Both are a u32 record count followed by fixed-size records, little endian, packed.

use std::fmt;

use crate::cursor::{write_fixed_str, Cursor, OutOfBounds};

/// Width of the peer name and address fields in a peers-answer record.
pub const ARP_NAME_LEN: usize = 48;
pub const ARP_ADDR_LEN: usize = 48;
/// name + mode + addr + port + 5 timing fields.
pub const ARP_RECORD_LEN: usize = ARP_NAME_LEN + 2 + ARP_ADDR_LEN + 2 + 5 * 8;

/// Width of a client name record in a clients answer.
pub const CLIENT_NAME_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload declares {count} records of {record_len} bytes but only {available} bytes follow")]
    Truncated {
        count: u32,
        record_len: usize,
        available: usize,
    },
    #[error(transparent)]
    OutOfBounds(#[from] OutOfBounds),
}

/// Peer mode as reported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMode {
    /// The reporting host itself.
    Host,
    Undefined,
    Peer,
    RHost,
    TcpProxy,
    Other(i16),
}

impl From<i16> for PeerMode {
    fn from(v: i16) -> Self {
        match v {
            -1 => Self::Host,
            -2 => Self::Undefined,
            0 => Self::Peer,
            1 => Self::RHost,
            2 => Self::TcpProxy,
            other => Self::Other(other),
        }
    }
}

impl From<PeerMode> for i16 {
    fn from(m: PeerMode) -> i16 {
        match m {
            PeerMode::Host => -1,
            PeerMode::Undefined => -2,
            PeerMode::Peer => 0,
            PeerMode::RHost => 1,
            PeerMode::TcpProxy => 2,
            PeerMode::Other(v) => v,
        }
    }
}

/// One peer-table row. Read-only snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ArpEntry {
    pub name: String,
    pub mode: PeerMode,
    pub address: String,
    pub port: u16,
    pub last_activity: f64,
    pub last_triptime_send: f64,
    pub last_triptime_got: f64,
    pub last_triptime: f64,
    pub triptime: f64,
}

impl ArpEntry {
    pub fn new(name: &str, mode: PeerMode, address: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            mode,
            address: address.to_string(),
            port,
            last_activity: 0.0,
            last_triptime_send: 0.0,
            last_triptime_got: 0.0,
            last_triptime: 0.0,
            triptime: 0.0,
        }
    }

    fn read(c: &mut Cursor<'_>) -> Result<Self, OutOfBounds> {
        Ok(Self {
            name: c.read_fixed_str(ARP_NAME_LEN)?,
            mode: PeerMode::from(c.read_i16_le()?),
            address: c.read_fixed_str(ARP_ADDR_LEN)?,
            port: c.read_u16_le()?,
            last_activity: c.read_f64_le()?,
            last_triptime_send: c.read_f64_le()?,
            last_triptime_got: c.read_f64_le()?,
            last_triptime: c.read_f64_le()?,
            triptime: c.read_f64_le()?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        write_fixed_str(out, &self.name, ARP_NAME_LEN);
        out.extend_from_slice(&i16::from(self.mode).to_le_bytes());
        write_fixed_str(out, &self.address, ARP_ADDR_LEN);
        out.extend_from_slice(&self.port.to_le_bytes());
        for v in [
            self.last_activity,
            self.last_triptime_send,
            self.last_triptime_got,
            self.last_triptime,
            self.triptime,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
}

impl fmt::Display for ArpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12}({:2})   {:<15}   {} {:8.3} ms",
            self.name,
            i16::from(self.mode),
            self.address,
            self.port,
            self.last_triptime
        )
    }
}

fn checked_count(c: &mut Cursor<'_>, record_len: usize) -> Result<u32, PayloadError> {
    let count = c.read_u32_le()?;
    let needed = (count as usize).checked_mul(record_len);
    match needed {
        Some(n) if n <= c.remaining() => Ok(count),
        _ => Err(PayloadError::Truncated {
            count,
            record_len,
            available: c.remaining(),
        }),
    }
}

/// Peers answer payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PeersAnswer {
    pub peers: Vec<ArpEntry>,
}

impl PeersAnswer {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut c = Cursor::new(payload);
        let count = checked_count(&mut c, ARP_RECORD_LEN)?;
        let peers = (0..count)
            .map(|_| ArpEntry::read(&mut c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { peers })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.peers.len() * ARP_RECORD_LEN);
        out.extend_from_slice(&(self.peers.len() as u32).to_le_bytes());
        for p in &self.peers {
            p.write(&mut out);
        }
        out
    }
}

/// Clients answer payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientsAnswer {
    pub clients: Vec<String>,
}

impl ClientsAnswer {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut c = Cursor::new(payload);
        let count = checked_count(&mut c, CLIENT_NAME_LEN)?;
        let clients = (0..count)
            .map(|_| c.read_fixed_str(CLIENT_NAME_LEN))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clients })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.clients.len() * CLIENT_NAME_LEN);
        out.extend_from_slice(&(self.clients.len() as u32).to_le_bytes());
        for name in &self.clients {
            write_fixed_str(&mut out, name, CLIENT_NAME_LEN);
        }
        out
    }
}
