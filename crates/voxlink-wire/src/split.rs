//! The split envelope: fragments of one oversized encoded message.
//!
//! ```text
//! [u16 type id = Split][u32 nonce][u16 index][u16 total][fragment bytes]
//! ```
//!
//! All fragments of a message share a random nonce. [`Reassembler`] collects
//! them in any arrival order and yields the original bytes once every index
//! in `0..total` is present.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::buffer::{SIZE_U16, SIZE_U32};
use crate::framing::{TYPE_ID_SIZE, WireError, encode_message};
use crate::messages::{Message, Split};

/// Bytes each fragment spends on framing before its payload slice.
pub const SPLIT_HEADER_SIZE: usize = TYPE_ID_SIZE + SIZE_U32 + 2 * SIZE_U16;

/// Default age after which an incomplete message is dropped.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of split messages that may be incomplete at once.
pub const DEFAULT_MAX_PENDING: usize = 64;

/// Cuts `encoded` into split fragments of at most `max_size` bytes each.
pub fn split_message(encoded: &[u8], max_size: usize) -> Vec<Vec<u8>> {
    split_message_with_nonce(encoded, max_size, rand::random())
}

/// [`split_message`] with a caller-chosen nonce.
///
/// # Panics
///
/// Panics if `max_size` leaves no room for payload after the header, or if
/// the message would need more than `u16::MAX` fragments.
pub fn split_message_with_nonce(encoded: &[u8], max_size: usize, nonce: u32) -> Vec<Vec<u8>> {
    assert!(
        max_size > SPLIT_HEADER_SIZE,
        "max message size {max_size} cannot fit a split header"
    );
    let chunk = max_size - SPLIT_HEADER_SIZE;
    let count = encoded.len().div_ceil(chunk).max(1);
    assert!(
        count <= u16::MAX as usize,
        "message of {} bytes needs {count} split parts",
        encoded.len()
    );
    let total = count as u16;

    let parts: Vec<Vec<u8>> = (0..count)
        .map(|i| {
            let start = i * chunk;
            let end = (start + chunk).min(encoded.len());
            encode_message(&Message::Split(Split {
                nonce,
                index: i as u16,
                total,
                bytes: encoded[start..end].to_vec(),
            }))
        })
        .collect();
    tracing::trace!(
        "Split {} bytes into {total} parts (nonce {nonce:#010x})",
        encoded.len()
    );
    parts
}

struct PartialMessage {
    total: u16,
    parts: FxHashMap<u16, Vec<u8>>,
    started: Instant,
}

/// Collects split fragments keyed by nonce.
pub struct Reassembler {
    pending: FxHashMap<u32, PartialMessage>,
    timeout: Duration,
    max_pending: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REASSEMBLY_TIMEOUT)
    }

    /// Creates a reassembler that prunes incomplete messages older than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            pending: FxHashMap::default(),
            timeout,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }

    /// Caps how many nonces may be incomplete at once. Fragments of a new
    /// nonce beyond the cap are rejected until older messages complete or
    /// are pruned.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// Adds a fragment, returning the whole message once it is complete.
    pub fn accept(&mut self, part: Split) -> Result<Option<Vec<u8>>, WireError> {
        self.accept_at(part, Instant::now())
    }

    /// [`Reassembler::accept`] with an explicit arrival time.
    pub fn accept_at(&mut self, part: Split, now: Instant) -> Result<Option<Vec<u8>>, WireError> {
        let Split {
            nonce,
            index,
            total,
            bytes,
        } = part;
        if index >= total {
            return Err(WireError::SplitIndexOutOfRange {
                nonce,
                index,
                total,
            });
        }

        if !self.pending.contains_key(&nonce) && self.pending.len() >= self.max_pending {
            return Err(WireError::SplitBacklogFull {
                nonce,
                limit: self.max_pending,
            });
        }
        let entry = self.pending.entry(nonce).or_insert_with(|| PartialMessage {
            total,
            parts: FxHashMap::default(),
            started: now,
        });
        if entry.total != total {
            return Err(WireError::SplitTotalMismatch {
                nonce,
                expected: entry.total,
                got: total,
            });
        }

        if entry.parts.contains_key(&index) {
            tracing::debug!("Ignoring duplicate split part {index} of nonce {nonce:#010x}");
            return Ok(None);
        }
        entry.parts.insert(index, bytes);
        if entry.parts.len() < entry.total as usize {
            return Ok(None);
        }

        let Some(mut done) = self.pending.remove(&nonce) else {
            return Ok(None);
        };
        let mut whole = Vec::with_capacity(done.parts.values().map(Vec::len).sum());
        for index in 0..done.total {
            if let Some(piece) = done.parts.remove(&index) {
                whole.extend_from_slice(&piece);
            }
        }
        Ok(Some(whole))
    }

    /// Drops incomplete messages older than the timeout. Returns how many.
    pub fn prune(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.pending.len();
        self.pending
            .retain(|_, partial| now.saturating_duration_since(partial.started) < timeout);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            tracing::warn!("Dropped {dropped} incomplete split messages");
        }
        dropped
    }

    /// Number of messages with fragments still outstanding.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
