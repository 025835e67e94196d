//! Host/client synchronization over the voxlink wire protocol.
//!
//! The [`Server`] is authoritative: it validates movement and block edits,
//! serves chunks from a [`KeyValueStore`] or a generator, and keeps peers
//! alive with a heartbeat. The [`Client`] predicts its own player and
//! snaps to the corrections the host sends back.

pub mod ack;
pub mod client;
pub mod convert;
pub mod host;
pub mod loader;
pub mod outbox;
pub mod server;
pub mod session;
pub mod smoothing;
pub mod storage;

pub use ack::{AckOutcome, AckTracker, AckWaiter};
pub use client::{Client, ClientConfig, ClientError, ClientEvent};
pub use convert::{chunk_data_from_snapshot, snapshot_from_chunk_data};
pub use host::run_host;
pub use loader::{ChunkLoader, LoadSource, LoaderEvent};
pub use outbox::Outbox;
pub use server::{
    BlockEdit, EditRejection, MoveRejection, PLAYER_KIND, Server, ServerConfig, ServerEvent,
};
pub use session::{PeerState, Session, SessionError, SessionEvent};
pub use smoothing::{CorrectionSmoothing, DEFAULT_DECAY_RATE, SMALL_CORRECTION_THRESHOLD};
pub use storage::{
    DirStore, KeyValueStore, MemoryStore, StoreError, WorldDescriptor, load_chunk,
    load_or_create_descriptor, save_chunk, saved_chunks,
};
