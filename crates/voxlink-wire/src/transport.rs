//! Point-to-point message transport abstraction.
//!
//! A transport delivers whole binary frames between two endpoints. Incoming
//! traffic for every connection is surfaced as [`TransportEvent`]s on one
//! channel; outgoing traffic goes through the per-connection [`Transport`]
//! handle carried by [`TransportEvent::Open`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;

/// Unique identifier for a connection within one host session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors raised by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection is closed.
    #[error("connection closed")]
    Closed,
    /// The frame exceeds the transport's maximum message size.
    #[error("message of {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Frame size.
        size: usize,
        /// Transport limit.
        max: usize,
    },
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sending half of one connection.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Queues one frame for delivery.
    fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Closes the connection. Later sends fail with [`TransportError::Closed`].
    fn close(&self);

    /// Largest frame accepted by [`Transport::send`].
    fn max_message_size(&self) -> usize;
}

/// Something that happened on a connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// A connection opened; `link` sends to the remote side.
    Open {
        id: ConnectionId,
        link: Arc<dyn Transport>,
    },
    /// One frame arrived.
    Data { id: ConnectionId, bytes: Vec<u8> },
    /// The connection closed.
    Close { id: ConnectionId },
    /// The connection failed. A `Close` follows.
    Error {
        id: ConnectionId,
        error: TransportError,
    },
}

impl TransportEvent {
    /// The connection this event belongs to.
    pub fn connection(&self) -> ConnectionId {
        match self {
            TransportEvent::Open { id, .. }
            | TransportEvent::Data { id, .. }
            | TransportEvent::Close { id }
            | TransportEvent::Error { id, .. } => *id,
        }
    }
}

/// Sender half of an event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
/// Receiver half of an event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// One direction of an in-process connection.
///
/// Frames are delivered as [`TransportEvent::Data`] on the remote side's
/// event channel, tagged with the connection id.
#[derive(Debug)]
pub struct MemoryLink {
    id: ConnectionId,
    remote: EventSender,
    closed: Arc<AtomicBool>,
    max_message_size: usize,
}

impl Transport for MemoryLink {
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
        self.remote
            .send(TransportEvent::Data { id: self.id, bytes })
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.remote.send(TransportEvent::Close { id: self.id });
        }
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

/// Client side of an in-process connection.
pub struct MemoryClient {
    /// Sends frames to the host.
    pub link: Arc<MemoryLink>,
    /// Frames and close notifications from the host.
    pub events: EventReceiver,
}

/// Opens an in-process connection to a host listening on `host_events`.
///
/// The host receives a [`TransportEvent::Open`] whose link delivers to the
/// returned client's event channel. Closing either link notifies the other
/// side with [`TransportEvent::Close`].
pub fn memory_connect(
    host_events: &EventSender,
    id: ConnectionId,
    max_message_size: usize,
) -> MemoryClient {
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    let to_client = Arc::new(MemoryLink {
        id,
        remote: client_tx,
        closed: Arc::clone(&closed),
        max_message_size,
    });
    let to_host = Arc::new(MemoryLink {
        id,
        remote: host_events.clone(),
        closed,
        max_message_size,
    });

    let _ = host_events.send(TransportEvent::Open {
        id,
        link: to_client,
    });
    tracing::debug!("Opened in-memory connection {id}");

    MemoryClient {
        link: to_host,
        events: client_rx,
    }
}
