//! Links to the L0 server: TCP stream or connected UDP datagram channel.
//!
//! Each link is split into a reader and a writer half so the event loop can wait on reads while
//! writing queued frames.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use teol0_core::protocol::L0_BUFFER_SIZE;
use teol0_core::{ConnectError, TransportKind, MAX_PACKET_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpSocket, UdpSocket};
use tracing::{debug, warn};

#[async_trait]
pub trait LinkReader: Send {
    /// Next chunk of bytes (stream) or one datagram. `None` once the server closed the link.
    /// Cancel safe.
    async fn recv(&mut self) -> io::Result<Option<Bytes>>;
}

#[async_trait]
pub trait LinkWriter: Send {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    async fn shutdown(&mut self) -> io::Result<()>;
}

pub struct Link {
    pub kind: TransportKind,
    pub peer: SocketAddr,
    pub reader: Box<dyn LinkReader>,
    pub writer: Box<dyn LinkWriter>,
}

/// Resolve `server:port` to its first address.
pub async fn resolve(server: &str, port: u16) -> Result<SocketAddr, ConnectError> {
    let mut addrs = lookup_host((server, port)).await.map_err(|e| {
        warn!(server, port, error = %e, "can't resolve server");
        ConnectError::HostNotFound
    })?;
    addrs.next().ok_or(ConnectError::HostNotFound)
}

/// Open a link of `kind` to `addr`.
pub async fn open(kind: TransportKind, addr: SocketAddr) -> Result<Link, ConnectError> {
    match kind {
        TransportKind::Stream => open_tcp(addr).await,
        TransportKind::ReliableDatagram => open_udp(addr).await,
    }
}

async fn open_tcp(addr: SocketAddr) -> Result<Link, ConnectError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| {
        warn!(error = %e, "can't create tcp socket");
        ConnectError::Socket
    })?;
    let stream = socket.connect(addr).await.map_err(|e| {
        warn!(%addr, error = %e, "can't connect");
        ConnectError::Connect
    })?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "can't set TCP_NODELAY");
    }
    let (read, write) = stream.into_split();
    Ok(Link {
        kind: TransportKind::Stream,
        peer: addr,
        reader: Box::new(TcpReader {
            stream: read,
            buf: BytesMut::with_capacity(L0_BUFFER_SIZE),
        }),
        writer: Box::new(TcpWriter { stream: write }),
    })
}

async fn open_udp(addr: SocketAddr) -> Result<Link, ConnectError> {
    let local: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await.map_err(|e| {
        warn!(error = %e, "can't create udp socket");
        ConnectError::Socket
    })?;
    socket.connect(addr).await.map_err(|e| {
        warn!(%addr, error = %e, "can't connect");
        ConnectError::Connect
    })?;
    let socket = Arc::new(socket);
    Ok(Link {
        kind: TransportKind::ReliableDatagram,
        peer: addr,
        reader: Box::new(UdpReader {
            socket: socket.clone(),
            buf: vec![0u8; MAX_PACKET_SIZE],
        }),
        writer: Box::new(UdpWriter { socket }),
    })
}

struct TcpReader {
    stream: OwnedReadHalf,
    buf: BytesMut,
}

#[async_trait]
impl LinkReader for TcpReader {
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        self.buf.reserve(L0_BUFFER_SIZE);
        let n = self.stream.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.split().freeze()))
    }
}

struct TcpWriter {
    stream: OwnedWriteHalf,
}

#[async_trait]
impl LinkWriter for TcpWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

/// The datagram engine below this channel owns ordering and retransmission; one datagram is
/// one frame.
struct UdpReader {
    socket: Arc<UdpSocket>,
    buf: Vec<u8>,
}

#[async_trait]
impl LinkReader for UdpReader {
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        let n = self.socket.recv(&mut self.buf).await?;
        Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
    }
}

struct UdpWriter {
    socket: Arc<UdpSocket>,
}

#[async_trait]
impl LinkWriter for UdpWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.socket.send(frame).await.map(|_| ())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}
