//! Per-connection receive path and the outgoing packer.
//!
//! [`Inbox`] turns every received frame into the plain messages it carries,
//! reassembling split fragments and expanding combined envelopes.
//! [`pack_outgoing`] is the inverse: it turns a per-tick batch of encoded
//! messages into frames that fit the transport's size limit.

use std::time::{Duration, Instant};

use crate::combine::{self, COMBINED_HEADER_SIZE, COMBINED_PART_OVERHEAD, MAX_COMBINE_DEPTH};
use crate::framing::{WireError, decode_message};
use crate::messages::Message;
use crate::split::{Reassembler, split_message};

/// Receive-side state for one connection.
#[derive(Default)]
pub struct Inbox {
    reassembler: Reassembler,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a custom timeout for incomplete split messages.
    pub fn with_split_timeout(timeout: Duration) -> Self {
        Self {
            reassembler: Reassembler::with_timeout(timeout),
        }
    }

    /// Decodes one received frame into zero or more messages, in order.
    ///
    /// A split fragment yields nothing until its message is complete.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Vec<Message>, WireError> {
        let mut out = Vec::new();
        self.route(decode_message(bytes)?, 0, &mut out)?;
        Ok(out)
    }

    /// Drops incomplete split messages that have timed out.
    pub fn prune(&mut self, now: Instant) -> usize {
        self.reassembler.prune(now)
    }

    /// Number of split messages still waiting for fragments.
    pub fn pending_splits(&self) -> usize {
        self.reassembler.pending()
    }

    fn route(
        &mut self,
        msg: Message,
        depth: usize,
        out: &mut Vec<Message>,
    ) -> Result<(), WireError> {
        if depth > MAX_COMBINE_DEPTH {
            return Err(WireError::CombineTooDeep {
                max: MAX_COMBINE_DEPTH,
            });
        }
        match msg {
            Message::Split(part) => {
                if let Some(whole) = self.reassembler.accept(part)? {
                    let inner = decode_message(&whole)?;
                    if matches!(inner, Message::Split(_)) {
                        return Err(WireError::NestedSplit);
                    }
                    self.route(inner, depth + 1, out)?;
                }
            }
            Message::Combined(_) => {
                for inner in combine::expand(msg)? {
                    self.route(inner, depth + 1, out)?;
                }
            }
            other => out.push(other),
        }
        Ok(())
    }
}

/// Turns one tick's encoded messages into transport frames of at most
/// `max_size` bytes, preserving order.
///
/// An empty batch sends nothing and a single message goes out raw. Larger
/// batches are greedily packed into combined envelopes; a group that ends up
/// with one member is sent raw. Any message too large for a frame is split.
pub fn pack_outgoing(encoded: Vec<Vec<u8>>, max_size: usize) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    if encoded.len() == 1 {
        if let Some(only) = encoded.into_iter().next() {
            push_single(&mut frames, only, max_size);
        }
        return frames;
    }

    let mut batch: Vec<Vec<u8>> = Vec::new();
    let mut batch_size = COMBINED_HEADER_SIZE;
    for msg in encoded {
        let cost = COMBINED_PART_OVERHEAD + msg.len();
        if COMBINED_HEADER_SIZE + cost > max_size {
            flush(&mut frames, &mut batch, max_size);
            batch_size = COMBINED_HEADER_SIZE;
            push_single(&mut frames, msg, max_size);
            continue;
        }
        if batch_size + cost > max_size || batch.len() == u16::MAX as usize {
            flush(&mut frames, &mut batch, max_size);
            batch_size = COMBINED_HEADER_SIZE;
        }
        batch_size += cost;
        batch.push(msg);
    }
    flush(&mut frames, &mut batch, max_size);
    frames
}

fn flush(frames: &mut Vec<Vec<u8>>, batch: &mut Vec<Vec<u8>>, max_size: usize) {
    match batch.len() {
        0 => {}
        1 => {
            if let Some(only) = batch.pop() {
                push_single(frames, only, max_size);
            }
        }
        _ => frames.push(combine::combine(std::mem::take(batch))),
    }
}

fn push_single(frames: &mut Vec<Vec<u8>>, msg: Vec<u8>, max_size: usize) {
    if msg.len() <= max_size {
        frames.push(msg);
    } else {
        frames.extend(split_message(&msg, max_size));
    }
}
