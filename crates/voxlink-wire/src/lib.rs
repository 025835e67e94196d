//! Binary wire format: cursor buffers, typed message framing, combine/split
//! envelopes and the transports that carry them.

pub mod buffer;
pub mod combine;
pub mod framing;
pub mod half;
pub mod inbox;
pub mod messages;
pub mod registry;
pub mod split;
pub mod tcp;
pub mod transport;

pub use buffer::{BinaryBuffer, BufferError, Endian};
pub use combine::{MAX_COMBINE_DEPTH, combine, combined_size, expand};
pub use framing::{WireError, decode_message, encode_message, peek_kind};
pub use inbox::{Inbox, pack_outgoing};
pub use messages::*;
pub use registry::{MessageKind, MessageRegistry, RegistryError};
pub use split::{Reassembler, split_message};
pub use tcp::{FrameConfig, FrameError, TcpAcceptor, TcpLink, read_frame, write_frame};
pub use transport::{
    ConnectionId, EventReceiver, EventSender, IdGenerator, MemoryClient, MemoryLink, Transport,
    TransportError, TransportEvent, memory_connect,
};
