//! The combined envelope: several encoded messages in one frame.
//!
//! ```text
//! [u16 type id = Combined][u16 count]([u32 length][message bytes])*
//! ```
//!
//! Each inner message is a complete `[u16 id][payload]` encoding and is
//! decoded through [`decode_message`] again when the envelope is expanded.

use crate::buffer::{SIZE_U16, SIZE_U32};
use crate::framing::{TYPE_ID_SIZE, WireError, decode_message, encode_message};
use crate::messages::{Combined, Message};

/// Deepest combined-inside-combined nesting accepted on receive.
pub const MAX_COMBINE_DEPTH: usize = 4;

/// Bytes a combined envelope adds before its first part.
pub const COMBINED_HEADER_SIZE: usize = TYPE_ID_SIZE + SIZE_U16;

/// Bytes each part adds on top of its own encoding.
pub const COMBINED_PART_OVERHEAD: usize = SIZE_U32;

/// Encoded size of a combined envelope holding `parts`.
pub fn combined_size<B: AsRef<[u8]>>(parts: &[B]) -> usize {
    COMBINED_HEADER_SIZE
        + parts
            .iter()
            .map(|p| COMBINED_PART_OVERHEAD + p.as_ref().len())
            .sum::<usize>()
}

/// Wraps already encoded messages into one combined envelope.
///
/// # Panics
///
/// Panics if there are more than `u16::MAX` parts.
pub fn combine(parts: Vec<Vec<u8>>) -> Vec<u8> {
    assert!(
        parts.len() <= u16::MAX as usize,
        "cannot combine {} messages into one envelope",
        parts.len()
    );
    encode_message(&Message::Combined(Combined { parts }))
}

/// Flattens a message into the non-combined messages it carries.
///
/// A message that is not a combined envelope expands to itself.
pub fn expand(msg: Message) -> Result<Vec<Message>, WireError> {
    let mut out = Vec::new();
    expand_into(msg, 0, &mut out)?;
    Ok(out)
}

fn expand_into(msg: Message, depth: usize, out: &mut Vec<Message>) -> Result<(), WireError> {
    match msg {
        Message::Combined(envelope) => {
            if depth >= MAX_COMBINE_DEPTH {
                return Err(WireError::CombineTooDeep {
                    max: MAX_COMBINE_DEPTH,
                });
            }
            for part in &envelope.parts {
                expand_into(decode_message(part)?, depth + 1, out)?;
            }
            Ok(())
        }
        other => {
            out.push(other);
            Ok(())
        }
    }
}
