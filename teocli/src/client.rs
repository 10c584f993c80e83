//! Async L0 client: owns the link and drives one [`L0Connection`].
//!
//! Single task: each event-loop iteration waits once (data, a queued command, or the loop
//! timeout), processes everything that wait produced, then emits `Tick`. Other tasks and threads
//! talk to the loop only through a [`ClientHandle`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use teol0_core::{
    decode_datagram, derive_session_key, ChaChaCipher, CodecError, ConnectError, ConnectionConfig,
    ConnectionStatus, EventSink, L0Connection, NextFrame, OutboundAction, Packet, PacketError,
    Role, SendError, TransportKind,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transport::{self, LinkReader, LinkWriter};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect failed (status {}): {0}", .0.code())]
    Connect(#[from] ConnectError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("no complete frame within {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Disconnected,
}

/// Everything needed to open one connection.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub server: String,
    pub port: u16,
    pub connection: ConnectionConfig,
    /// Longest single wait of the event loop.
    pub event_loop_timeout: Duration,
    /// Enables payload encryption. Empty is a setup failure.
    pub session_secret: Option<String>,
}

impl ClientSettings {
    pub fn new(identity: impl Into<String>, server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            connection: ConnectionConfig::new(identity),
            event_loop_timeout: Duration::from_millis(50),
            session_secret: None,
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.connection.transport = transport;
        self
    }
}

#[derive(Debug)]
enum Command {
    Login { identity: String },
    Send { command: u8, peer_name: String, payload: Vec<u8> },
    Echo { peer_name: String, message: Vec<u8> },
    Wake,
}

/// Cloneable, thread-safe writer side. Commands are encoded and written by the event loop, so
/// they never touch the read buffer.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<Command>,
    stop: Arc<AtomicBool>,
}

impl ClientHandle {
    fn push(&self, cmd: Command) -> Result<(), ClientError> {
        self.tx.send(cmd).map_err(|_| ClientError::Disconnected)
    }

    pub fn login(&self, identity: &str) -> Result<(), ClientError> {
        self.push(Command::Login {
            identity: identity.to_string(),
        })
    }

    pub fn send(&self, command: u8, peer_name: &str, payload: &[u8]) -> Result<(), ClientError> {
        self.push(Command::Send {
            command,
            peer_name: peer_name.to_string(),
            payload: payload.to_vec(),
        })
    }

    pub fn send_echo(&self, peer_name: &str, message: &[u8]) -> Result<(), ClientError> {
        self.push(Command::Echo {
            peer_name: peer_name.to_string(),
            message: message.to_vec(),
        })
    }

    /// Ask the event loop to return after the current iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Command::Wake);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// What ended one wait of the event loop.
enum Wake {
    Data(std::io::Result<Option<Bytes>>),
    Command(Option<Command>),
    Timeout,
}

pub struct L0Client<S> {
    conn: L0Connection<S>,
    reader: Box<dyn LinkReader>,
    writer: Box<dyn LinkWriter>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    stop: Arc<AtomicBool>,
    loop_timeout: Duration,
    closed: bool,
}

impl<S: EventSink> L0Client<S> {
    /// Resolve, set up the cipher, open the link and run the `Connected` occurrence (login is
    /// written before this returns). Each failure keeps its own cause.
    pub async fn connect(settings: ClientSettings, sink: S) -> Result<Self, ConnectError> {
        let transport_kind = settings.connection.transport;
        let mut conn = L0Connection::new(settings.connection, sink);
        conn.begin_connect();
        let opened = Self::open(
            &settings.server,
            settings.port,
            transport_kind,
            settings.session_secret.as_deref(),
            &mut conn,
        )
        .await;
        match opened {
            Ok((reader, writer)) => {
                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                let mut client = Self {
                    conn,
                    reader,
                    writer,
                    cmd_tx,
                    cmd_rx,
                    stop: Arc::new(AtomicBool::new(false)),
                    loop_timeout: settings.event_loop_timeout,
                    closed: false,
                };
                let actions = client.conn.on_link_up();
                if client.perform(actions).await.is_err() {
                    return Err(ConnectError::Connect);
                }
                Ok(client)
            }
            Err(cause) => {
                conn.on_connect_failed(cause);
                Err(cause)
            }
        }
    }

    async fn open(
        server: &str,
        port: u16,
        kind: TransportKind,
        session_secret: Option<&str>,
        conn: &mut L0Connection<S>,
    ) -> Result<(Box<dyn LinkReader>, Box<dyn LinkWriter>), ConnectError> {
        let addr = transport::resolve(server, port).await?;
        if let Some(secret) = session_secret {
            if secret.is_empty() {
                warn!("session secret is empty");
                return Err(ConnectError::Encryption);
            }
            let key = derive_session_key(secret.as_bytes());
            let cipher =
                ChaChaCipher::new(&key, Role::Client).map_err(|_| ConnectError::Encryption)?;
            conn.set_cipher(Box::new(cipher));
        }
        let link = transport::open(kind, addr).await?;
        info!(peer = %link.peer, transport = %link.kind, "link up");
        Ok((link.reader, link.writer))
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            tx: self.cmd_tx.clone(),
            stop: self.stop.clone(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.conn.status()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn connection(&self) -> &L0Connection<S> {
        &self.conn
    }

    pub fn sink(&self) -> &S {
        self.conn.sink()
    }

    pub fn sink_mut(&mut self) -> &mut S {
        self.conn.sink_mut()
    }

    /// Run iterations until the link goes down or the stop flag is set.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        while self.conn.is_connected() && !self.stop.load(Ordering::SeqCst) {
            self.run_once().await?;
        }
        Ok(())
    }

    /// Like [`Self::run`], but `shutdown` completing also ends the loop. It only raises the stop
    /// flag, so the iteration in progress always finishes and no frame is cut off mid-write.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), ClientError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle();
        let watcher = tokio::spawn(async move {
            shutdown.await;
            handle.stop();
        });
        let result = self.run().await;
        watcher.abort();
        result
    }

    /// One event-loop iteration.
    pub async fn run_once(&mut self) -> Result<(), ClientError> {
        let wake = tokio::select! {
            data = self.reader.recv() => Wake::Data(data),
            cmd = self.cmd_rx.recv() => Wake::Command(cmd),
            _ = tokio::time::sleep(self.loop_timeout) => Wake::Timeout,
        };
        match wake {
            Wake::Data(Ok(Some(bytes))) => self.on_bytes(&bytes).await?,
            Wake::Data(Ok(None)) => {
                info!("server closed the connection");
                self.disconnect().await;
                return Ok(());
            }
            Wake::Data(Err(e)) => {
                warn!(error = %e, "read failed");
                self.disconnect().await;
                return Err(e.into());
            }
            Wake::Command(Some(cmd)) => self.on_command(cmd).await?,
            Wake::Command(None) => {}
            Wake::Timeout => {
                let actions = self.conn.on_idle();
                self.perform(actions).await?;
            }
        }
        if self.conn.is_connected() {
            let actions = self.conn.on_tick();
            self.perform(actions).await?;
        }
        Ok(())
    }

    async fn on_bytes(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let actions = match self.conn.config().transport {
            TransportKind::Stream => match self.conn.on_stream_data(bytes) {
                Ok(a) => a,
                Err(e) => {
                    // Replies to frames before the bad one still go out.
                    self.perform(e.actions).await?;
                    self.disconnect().await;
                    return Err(e.error.into());
                }
            },
            TransportKind::ReliableDatagram => self.conn.on_datagram(bytes),
        };
        self.perform(actions).await
    }

    async fn on_command(&mut self, cmd: Command) -> Result<(), ClientError> {
        let frame = match cmd {
            Command::Login { identity } => self.conn.login(&identity),
            Command::Send {
                command,
                peer_name,
                payload,
            } => self.conn.send(command, &peer_name, &payload),
            Command::Echo { peer_name, message } => self.conn.send_echo(&peer_name, &message),
            Command::Wake => return Ok(()),
        };
        match frame {
            Ok(frame) => self.write(&frame).await,
            Err(e) => {
                warn!(error = %e, "queued send dropped");
                Ok(())
            }
        }
    }

    async fn perform(&mut self, actions: Vec<OutboundAction>) -> Result<(), ClientError> {
        for action in actions {
            match action {
                OutboundAction::SendFrame(frame) => self.write(&frame).await?,
                OutboundAction::Close => {
                    self.disconnect().await;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn write(&mut self, frame: &[u8]) -> Result<(), ClientError> {
        if let Err(e) = self.writer.write_frame(frame).await {
            warn!(error = %e, "write failed");
            self.disconnect().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Send a login packet now. Normally done automatically on connect.
    pub async fn login(&mut self, identity: &str) -> Result<usize, ClientError> {
        let frame = self.conn.login(identity)?;
        self.write(&frame).await?;
        Ok(frame.len())
    }

    pub async fn send(&mut self, command: u8, peer_name: &str, payload: &[u8]) -> Result<usize, ClientError> {
        let frame = self.conn.send(command, peer_name, payload)?;
        self.write(&frame).await?;
        Ok(frame.len())
    }

    pub async fn send_echo(&mut self, peer_name: &str, message: &[u8]) -> Result<usize, ClientError> {
        let frame = self.conn.send_echo(peer_name, message)?;
        self.write(&frame).await?;
        Ok(frame.len())
    }

    /// Poll once without waiting. Frames returned here bypass the event sink; decode them with
    /// [`Self::open_packet`].
    pub async fn recv(&mut self) -> Result<NextFrame, ClientError> {
        self.pull(Duration::ZERO).await
    }

    /// Wait up to `timeout` for a complete frame. Invalid frames are skipped.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Bytes, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.pull(left).await? {
                NextFrame::Frame(frame) => return Ok(frame),
                NextFrame::Incomplete if left.is_zero() => {
                    return Err(ClientError::Timeout(timeout))
                }
                NextFrame::Incomplete | NextFrame::Invalid => {}
            }
        }
    }

    /// Decode a pulled frame, opening its payload with the session cipher.
    pub fn open_packet<'f>(&mut self, frame: &'f [u8]) -> Result<Packet<'f>, ClientError> {
        Ok(self.conn.open_packet(frame)?)
    }

    async fn pull(&mut self, wait: Duration) -> Result<NextFrame, ClientError> {
        if !self.conn.is_connected() {
            return Err(ClientError::Disconnected);
        }
        let stream = self.conn.config().transport == TransportKind::Stream;
        if stream {
            match self.conn.poll_frame() {
                Ok(NextFrame::Incomplete) => {}
                Ok(next) => return Ok(next),
                Err(e) => {
                    self.disconnect().await;
                    return Err(e.into());
                }
            }
        }
        let bytes = match tokio::time::timeout(wait, self.reader.recv()).await {
            Err(_) => return Ok(NextFrame::Incomplete),
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                self.disconnect().await;
                return Err(ClientError::Disconnected);
            }
            Ok(Err(e)) => {
                self.disconnect().await;
                return Err(e.into());
            }
        };
        if !stream {
            return Ok(match decode_datagram(&bytes) {
                Ok(_) => NextFrame::Frame(bytes),
                Err(e) => {
                    warn!(error = %e, "dropping datagram");
                    NextFrame::Invalid
                }
            });
        }
        let polled = match self.conn.feed(&bytes) {
            Ok(()) => self.conn.poll_frame(),
            Err(e) => Err(e),
        };
        match polled {
            Ok(next) => Ok(next),
            Err(e) => {
                self.disconnect().await;
                Err(e.into())
            }
        }
    }

    /// Close the link. Idempotent.
    pub async fn disconnect(&mut self) {
        // Nothing can be written once the link is down, so the sink's actions are dropped.
        let dropped = self.conn.on_link_down();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "actions after disconnect ignored");
        }
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.writer.shutdown().await {
                debug!(error = %e, "shutdown failed");
            }
        }
    }

    /// Stop background I/O and release the link.
    pub async fn shutdown(mut self) -> S {
        self.stop.store(true, Ordering::SeqCst);
        self.disconnect().await;
        self.conn.into_sink()
    }
}
