//! Length-prefixed TCP transport.
//!
//! TCP is a byte stream, so every transport frame is wrapped as:
//!
//! ```text
//! [u32 big-endian length][length bytes of payload]
//! ```
//!
//! Each accepted or dialed stream gets a reader task that forwards frames as
//! [`TransportEvent::Data`] and a writer task fed by the [`TcpLink`] handle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::transport::{
    ConnectionId, EventSender, IdGenerator, Transport, TransportError, TransportEvent,
};

/// Width of the length prefix in front of every frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Limits for the TCP stream framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest payload accepted in either direction, in bytes.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1 << 20,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {size} bytes is over the {max} byte limit")]
    PayloadTooLarge { size: u32, max: u32 },

    /// The stream ended, possibly in the middle of a frame.
    #[error("stream closed")]
    ConnectionClosed,

    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for TransportError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::PayloadTooLarge { size, max } => TransportError::MessageTooLarge {
                size: size as usize,
                max: max as usize,
            },
            FrameError::ConnectionClosed => TransportError::Closed,
            FrameError::Io(e) => TransportError::Io(e),
        }
    }
}

/// EOF while reading means the peer hung up.
fn closed_on_eof(e: std::io::Error) -> FrameError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => FrameError::ConnectionClosed,
        _ => FrameError::Io(e),
    }
}

fn check_size(size: u32, config: &FrameConfig) -> Result<(), FrameError> {
    if size > config.max_payload_size {
        Err(FrameError::PayloadTooLarge {
            size,
            max: config.max_payload_size,
        })
    } else {
        Ok(())
    }
}

/// Reads one frame. The size is checked before the payload is allocated.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let size = reader.read_u32().await.map_err(closed_on_eof)?;
    check_size(size, config)?;
    let mut payload = vec![0u8; size as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(closed_on_eof)?;
    Ok(payload)
}

/// Writes one frame, prefix and payload in a single write.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let size = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    check_size(size, config)?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Sending half of a TCP connection.
#[derive(Debug)]
pub struct TcpLink {
    id: ConnectionId,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    max_message_size: usize,
}

impl TcpLink {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Transport for TcpLink {
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if bytes.len() > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: bytes.len(),
                max: self.max_message_size,
            });
        }
        self.outgoing.send(bytes).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.shutdown_tx.send(true);
        }
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

/// Splits `stream` into reader and writer tasks and returns the send handle.
///
/// Frames read from the stream are delivered on `events`. When the stream
/// ends, fails, or the link is closed, a [`TransportEvent::Close`] is sent.
pub fn spawn_connection(
    stream: TcpStream,
    id: ConnectionId,
    events: EventSender,
    config: FrameConfig,
) -> Arc<TcpLink> {
    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let link = Arc::new(TcpLink {
        id,
        outgoing: out_tx,
        closed: AtomicBool::new(false),
        shutdown_tx,
        max_message_size: config.max_payload_size as usize,
    });

    let write_config = config.clone();
    let mut write_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                next = out_rx.recv() => {
                    let Some(frame) = next else { break };
                    if let Err(e) = write_frame(&mut writer, &frame, &write_config).await {
                        tracing::warn!("Write to {id} failed: {e}");
                        break;
                    }
                }
                _ = write_shutdown.changed() => {
                    // Drain what was queued before the close.
                    while let Ok(frame) = out_rx.try_recv() {
                        if write_frame(&mut writer, &frame, &write_config).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut read_shutdown = shutdown_rx;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = read_frame(&mut reader, &config) => {
                    match result {
                        Ok(bytes) => {
                            tracing::trace!("{id} received {} bytes", bytes.len());
                            if events.send(TransportEvent::Data { id, bytes }).is_err() {
                                break;
                            }
                        }
                        Err(FrameError::ConnectionClosed) => break,
                        Err(e) => {
                            let _ = events.send(TransportEvent::Error { id, error: e.into() });
                            break;
                        }
                    }
                }
                _ = read_shutdown.changed() => break,
            }
        }
        let _ = events.send(TransportEvent::Close { id });
        tracing::info!("Connection {id} closed");
    });

    link
}

/// Dials `addr` and returns the link to the remote host.
pub async fn connect(
    addr: SocketAddr,
    id: ConnectionId,
    events: EventSender,
    config: FrameConfig,
) -> Result<Arc<TcpLink>, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    tracing::info!("Connected to {addr} as {id}");
    Ok(spawn_connection(stream, id, events, config))
}

/// Accepts TCP connections and announces each as [`TransportEvent::Open`].
pub struct TcpAcceptor {
    config: FrameConfig,
    ids: IdGenerator,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TcpAcceptor {
    pub fn new(config: FrameConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            ids: IdGenerator::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Run the accept loop until [`TcpAcceptor::shutdown`] is called.
    pub async fn run(&self, listener: TcpListener, events: EventSender) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tracing::info!("Accepting connections on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = result?;
                    stream.set_nodelay(true)?;
                    let id = self.ids.next_id();
                    tracing::info!("Accepted connection {id} from {peer_addr}");
                    let link = spawn_connection(stream, id, events.clone(), self.config.clone());
                    if events.send(TransportEvent::Open { id, link }).is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Acceptor shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
