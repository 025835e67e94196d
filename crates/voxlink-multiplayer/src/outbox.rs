//! Per-peer queue of outgoing messages, flushed once per tick.

use voxlink_wire::{Message, Transport, TransportError, encode_message, pack_outgoing};

/// Messages waiting for the next flush, already encoded.
#[derive(Debug, Default)]
pub struct Outbox {
    queued: Vec<Vec<u8>>,
    queued_bytes: usize,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes and queues one message.
    pub fn push(&mut self, message: impl Into<Message>) {
        let bytes = encode_message(&message.into());
        self.queued_bytes += bytes.len();
        self.queued.push(bytes);
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Total encoded size of the queued messages.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Packs the queue into transport frames and sends them.
    ///
    /// A single queued message goes out as-is, several are combined, and
    /// anything above the transport limit is split. Returns the number of
    /// frames sent. The queue is emptied even when sending fails.
    pub fn flush(&mut self, link: &dyn Transport) -> Result<usize, TransportError> {
        if self.queued.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut self.queued);
        self.queued_bytes = 0;
        let count = batch.len();
        let frames = pack_outgoing(batch, link.max_message_size());
        let sent = frames.len();
        for frame in frames {
            link.send(frame)?;
        }
        tracing::trace!("Flushed {count} messages in {sent} frames");
        Ok(sent)
    }
}
