//! Typed message framing.
//!
//! Every message on the wire is:
//!
//! ```text
//! +------------------+---------------------------+
//! | type id (u16 BE) |   payload (estimate_size) |
//! +------------------+---------------------------+
//! ```
//!
//! The id comes from [`MessageRegistry::global`]. Decoding looks the id up,
//! dispatches to the packet decoder and requires the payload to be consumed
//! exactly.

use crate::buffer::{BinaryBuffer, BufferError, SIZE_U16};
use crate::messages::Message;
use crate::registry::{MessageKind, MessageRegistry};

/// Bytes taken by the type id in front of every payload.
pub const TYPE_ID_SIZE: usize = SIZE_U16;

/// Protocol errors. Each one is fatal to the message it was raised for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The payload was truncated or contained an invalid field.
    #[error("malformed payload: {0}")]
    Buffer(#[from] BufferError),
    /// The type id is not registered.
    #[error("unknown message type id {0}")]
    UnknownMessageType(u16),
    /// The decoder finished before the end of the payload.
    #[error("{count} trailing bytes after {kind:?} payload")]
    TrailingBytes {
        /// Kind that was decoded.
        kind: MessageKind,
        /// Bytes left unread.
        count: usize,
    },
    /// Combined envelopes were nested deeper than allowed.
    #[error("combined envelopes nested deeper than {max}")]
    CombineTooDeep {
        /// Maximum permitted nesting depth.
        max: usize,
    },
    /// A split fragment disagreed with earlier fragments of the same nonce.
    #[error("split {nonce:#010x}: part declares {got} parts, expected {expected}")]
    SplitTotalMismatch {
        nonce: u32,
        expected: u16,
        got: u16,
    },
    /// A split fragment index was outside `0..total`.
    #[error("split {nonce:#010x}: index {index} out of range for {total} parts")]
    SplitIndexOutOfRange { nonce: u32, index: u16, total: u16 },
    /// Too many split messages were incomplete at once.
    #[error("split {nonce:#010x}: {limit} split messages already incomplete")]
    SplitBacklogFull { nonce: u32, limit: usize },
    /// A reassembled split message was itself a split fragment.
    #[error("reassembled split message is itself a split fragment")]
    NestedSplit,
}

/// Encodes `msg` as `[u16 type id][payload]`.
///
/// # Panics
///
/// Panics if the packet writes a different number of bytes than its
/// `estimate_size`, which is a size-computation bug in the packet.
pub fn encode_message(msg: &Message) -> Vec<u8> {
    let kind = msg.kind();
    let id = wire_id(kind);
    let size = TYPE_ID_SIZE + msg.estimate_size();
    let mut buf = BinaryBuffer::with_size(size);
    buf.write_u16(id);
    msg.write_payload(&mut buf);
    buf.finish()
}

/// Decodes one message from a complete frame.
pub fn decode_message(bytes: &[u8]) -> Result<Message, WireError> {
    let mut buf = BinaryBuffer::from_slice(bytes);
    let kind = read_kind(&mut buf)?;
    let msg = Message::read_payload(kind, &mut buf)?;
    if buf.remaining() != 0 {
        return Err(WireError::TrailingBytes {
            kind,
            count: buf.remaining(),
        });
    }
    Ok(msg)
}

/// Reads only the type id of an encoded message.
pub fn peek_kind(bytes: &[u8]) -> Result<MessageKind, WireError> {
    read_kind(&mut BinaryBuffer::from_slice(bytes))
}

fn read_kind(buf: &mut BinaryBuffer) -> Result<MessageKind, WireError> {
    let id = buf.read_u16()?;
    MessageRegistry::global()
        .kind_of(id)
        .ok_or(WireError::UnknownMessageType(id))
}

fn wire_id(kind: MessageKind) -> u16 {
    match MessageRegistry::global().id_of(kind) {
        Some(id) => id,
        None => panic!("{kind:?} is missing from the global message registry"),
    }
}
