//! Packet types and their binary encodings.
//!
//! Every packet implements [`Packet`]: a fixed [`MessageKind`], an exact
//! `estimate_size` used to pre-size the writer, and explicit
//! `write`/`read` routines over a [`BinaryBuffer`]. [`Message`] is the closed
//! union of all packets and dispatches on [`MessageKind`] with a `match`.

use glam::{IVec3, Vec3};

use crate::buffer::{
    BinaryBuffer, BufferError, SIZE_BOOL, SIZE_F16, SIZE_U16, SIZE_U32, SIZE_U64, SIZE_VEC3,
    size_of_bytes, size_of_document, size_of_str,
};
use crate::registry::MessageKind;

/// Encoded width of an integer world or chunk coordinate.
pub const SIZE_IVEC3: usize = 3 * SIZE_U32;

/// A single typed wire record.
pub trait Packet: Sized {
    /// The registry kind this packet is encoded under.
    const KIND: MessageKind;

    /// Exact payload size in bytes, excluding the type id.
    fn estimate_size(&self) -> usize;

    /// Writes the payload. The buffer has at least `estimate_size` bytes left.
    fn write(&self, buf: &mut BinaryBuffer);

    /// Reads a payload written by [`Packet::write`].
    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError>;
}

fn write_ivec3(buf: &mut BinaryBuffer, v: IVec3) {
    buf.write_i32(v.x);
    buf.write_i32(v.y);
    buf.write_i32(v.z);
}

fn read_ivec3(buf: &mut BinaryBuffer) -> Result<IVec3, BufferError> {
    Ok(IVec3::new(buf.read_i32()?, buf.read_i32()?, buf.read_i32()?))
}

// ---------------------------------------------------------------------------
// Framing envelopes
// ---------------------------------------------------------------------------

/// Several independently encoded messages bundled into one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combined {
    /// Encoded inner messages in order, each `[u16 id][payload]`.
    pub parts: Vec<Vec<u8>>,
}

/// Capacity for `count` length-prefixed fields, bounded by what the payload
/// can actually hold.
fn length_prefixed_hint(count: u16, buf: &BinaryBuffer) -> usize {
    (count as usize).min(buf.remaining() / SIZE_U32)
}

impl Packet for Combined {
    const KIND: MessageKind = MessageKind::Combined;

    fn estimate_size(&self) -> usize {
        SIZE_U16 + self.parts.iter().map(|p| size_of_bytes(p)).sum::<usize>()
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_u16(self.parts.len() as u16);
        for part in &self.parts {
            buf.write_bytes(part);
        }
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        let count = buf.read_u16()?;
        let mut parts = Vec::with_capacity(length_prefixed_hint(count, buf));
        for _ in 0..count {
            parts.push(buf.read_bytes()?);
        }
        Ok(Self { parts })
    }
}

/// One fragment of an oversized encoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Random id shared by every fragment of the same message.
    pub nonce: u32,
    /// Position of this fragment, `0..total`.
    pub index: u16,
    /// Number of fragments the message was cut into.
    pub total: u16,
    /// Fragment bytes; runs to the end of the payload.
    pub bytes: Vec<u8>,
}

impl Packet for Split {
    const KIND: MessageKind = MessageKind::Split;

    fn estimate_size(&self) -> usize {
        SIZE_U32 + 2 * SIZE_U16 + self.bytes.len()
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_u32(self.nonce);
        buf.write_u16(self.index);
        buf.write_u16(self.total);
        buf.write_raw(&self.bytes);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            nonce: buf.read_u32()?,
            index: buf.read_u16()?,
            total: buf.read_u16()?,
            bytes: buf.read_rest(),
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Readiness handshake sent by a freshly connected client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ready;

impl Packet for Ready {
    const KIND: MessageKind = MessageKind::Ready;

    fn estimate_size(&self) -> usize {
        0
    }

    fn write(&self, _buf: &mut BinaryBuffer) {}

    fn read(_buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self)
    }
}

/// Client identity presented after the readiness handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Display name.
    pub name: String,
    /// Opaque credential, empty for anonymous hosts.
    pub token: String,
}

impl Packet for Identity {
    const KIND: MessageKind = MessageKind::Identity;

    fn estimate_size(&self) -> usize {
        size_of_str(&self.name) + size_of_str(&self.token)
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_str(&self.name);
        buf.write_str(&self.token);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            name: buf.read_string()?,
            token: buf.read_string()?,
        })
    }
}

/// Server acceptance of an identity; the peer becomes active.
#[derive(Debug, Clone, PartialEq)]
pub struct Welcome {
    /// Entity id assigned to the peer's player.
    pub entity_id: u64,
    /// Spawn position of that entity.
    pub position: Vec3,
}

impl Packet for Welcome {
    const KIND: MessageKind = MessageKind::Welcome;

    fn estimate_size(&self) -> usize {
        SIZE_U64 + SIZE_VEC3
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_u64(self.entity_id);
        buf.write_vec3(self.position);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            entity_id: buf.read_u64()?,
            position: buf.read_vec3()?,
        })
    }
}

/// Disconnect notice carrying a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kick {
    pub reason: String,
}

impl Packet for Kick {
    const KIND: MessageKind = MessageKind::Kick;

    fn estimate_size(&self) -> usize {
        size_of_str(&self.reason)
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_str(&self.reason);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            reason: buf.read_string()?,
        })
    }
}

/// Heartbeat request. The receiver answers with a [`Pong`] echoing `nonce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub nonce: u32,
}

impl Packet for Ping {
    const KIND: MessageKind = MessageKind::Ping;

    fn estimate_size(&self) -> usize {
        SIZE_U32
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_u32(self.nonce);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            nonce: buf.read_u32()?,
        })
    }
}

/// Heartbeat response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub nonce: u32,
}

impl Packet for Pong {
    const KIND: MessageKind = MessageKind::Pong;

    fn estimate_size(&self) -> usize {
        SIZE_U32
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_u32(self.nonce);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            nonce: buf.read_u32()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// Client request for the contents of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub coord: IVec3,
}

impl Packet for ChunkRequest {
    const KIND: MessageKind = MessageKind::ChunkRequest;

    fn estimate_size(&self) -> usize {
        SIZE_IVEC3
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        write_ivec3(buf, self.coord);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            coord: read_ivec3(buf)?,
        })
    }
}

/// Cell payload of a [`ChunkData`] message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkCells {
    /// Every cell holds the same palette index.
    Homogeneous(u16),
    /// One palette index per cell in storage order.
    Raw(Vec<u16>),
}

impl ChunkCells {
    fn estimate_size(&self) -> usize {
        SIZE_BOOL
            + match self {
                ChunkCells::Homogeneous(_) => SIZE_U16,
                ChunkCells::Raw(cells) => SIZE_U32 + cells.len() * SIZE_U16,
            }
    }
}

/// Snapshot of one entity inside a chunk, nested as a length-prefixed buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub entity_id: u64,
    pub position: Vec3,
    pub velocity: Vec3,
}

impl EntityState {
    const ENCODED_SIZE: usize = SIZE_U64 + 2 * SIZE_VEC3;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BinaryBuffer::with_size(Self::ENCODED_SIZE);
        buf.write_u64(self.entity_id);
        buf.write_vec3(self.position);
        buf.write_vec3(self.velocity);
        buf.finish()
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self, BufferError> {
        let mut buf = BinaryBuffer::from_bytes(bytes);
        Ok(Self {
            entity_id: buf.read_u64()?,
            position: buf.read_vec3()?,
            velocity: buf.read_vec3()?,
        })
    }
}

/// Full contents of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    pub coord: IVec3,
    pub cells: ChunkCells,
    /// Save-keys by palette index.
    pub palette: Vec<String>,
    pub entities: Vec<EntityState>,
}

impl Packet for ChunkData {
    const KIND: MessageKind = MessageKind::ChunkData;

    fn estimate_size(&self) -> usize {
        SIZE_IVEC3
            + self.cells.estimate_size()
            + SIZE_U16
            + self.palette.iter().map(|k| size_of_str(k)).sum::<usize>()
            + SIZE_U16
            + self.entities.len() * (SIZE_U32 + EntityState::ENCODED_SIZE)
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        write_ivec3(buf, self.coord);
        match &self.cells {
            ChunkCells::Homogeneous(index) => {
                buf.write_bool(true);
                buf.write_u16(*index);
            }
            ChunkCells::Raw(cells) => {
                buf.write_bool(false);
                buf.write_u32((cells.len() * SIZE_U16) as u32);
                for &cell in cells {
                    buf.write_u16(cell);
                }
            }
        }
        buf.write_u16(self.palette.len() as u16);
        for key in &self.palette {
            buf.write_str(key);
        }
        buf.write_u16(self.entities.len() as u16);
        for entity in &self.entities {
            buf.write_bytes(&entity.to_bytes());
        }
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        let coord = read_ivec3(buf)?;
        let cells = if buf.read_bool()? {
            ChunkCells::Homogeneous(buf.read_u16()?)
        } else {
            let raw = buf.read_bytes()?;
            let mut inner = BinaryBuffer::from_bytes(raw).with_endian(buf.endian());
            let mut cells = Vec::with_capacity(inner.len() / SIZE_U16);
            while inner.remaining() >= SIZE_U16 {
                cells.push(inner.read_u16()?);
            }
            if inner.remaining() != 0 {
                return Err(BufferError::UnexpectedEnd {
                    needed: SIZE_U16,
                    remaining: inner.remaining(),
                });
            }
            ChunkCells::Raw(cells)
        };
        let palette_len = buf.read_u16()?;
        let mut palette = Vec::with_capacity(length_prefixed_hint(palette_len, buf));
        for _ in 0..palette_len {
            palette.push(buf.read_string()?);
        }
        let entity_count = buf.read_u16()?;
        let mut entities = Vec::with_capacity(length_prefixed_hint(entity_count, buf));
        for _ in 0..entity_count {
            entities.push(EntityState::from_bytes(buf.read_bytes()?)?);
        }
        Ok(Self {
            coord,
            cells,
            palette,
            entities,
        })
    }
}

/// Tells a client it may drop a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkUnload {
    pub coord: IVec3,
}

impl Packet for ChunkUnload {
    const KIND: MessageKind = MessageKind::ChunkUnload;

    fn estimate_size(&self) -> usize {
        SIZE_IVEC3
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        write_ivec3(buf, self.coord);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            coord: read_ivec3(buf)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

/// Client-predicted movement of its own player. Angles travel as f16.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerMove {
    pub position: Vec3,
    pub velocity: Vec3,
    pub pitch: f32,
    pub yaw: f32,
}

impl Packet for PlayerMove {
    const KIND: MessageKind = MessageKind::PlayerMove;

    fn estimate_size(&self) -> usize {
        2 * SIZE_VEC3 + 2 * SIZE_F16
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_vec3(self.position);
        buf.write_vec3(self.velocity);
        buf.write_f16(self.pitch);
        buf.write_f16(self.yaw);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            position: buf.read_vec3()?,
            velocity: buf.read_vec3()?,
            pitch: buf.read_f16()?,
            yaw: buf.read_f16()?,
        })
    }
}

/// Accepted movement of another entity, relayed to observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityMove {
    pub entity_id: u64,
    pub position: Vec3,
    pub velocity: Vec3,
    pub pitch: f32,
    pub yaw: f32,
}

impl Packet for EntityMove {
    const KIND: MessageKind = MessageKind::EntityMove;

    fn estimate_size(&self) -> usize {
        SIZE_U64 + 2 * SIZE_VEC3 + 2 * SIZE_F16
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_u64(self.entity_id);
        buf.write_vec3(self.position);
        buf.write_vec3(self.velocity);
        buf.write_f16(self.pitch);
        buf.write_f16(self.yaw);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            entity_id: buf.read_u64()?,
            position: buf.read_vec3()?,
            velocity: buf.read_vec3()?,
            pitch: buf.read_f16()?,
            yaw: buf.read_f16()?,
        })
    }
}

/// Authoritative state replacing a rejected prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionCorrection {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl Packet for PositionCorrection {
    const KIND: MessageKind = MessageKind::PositionCorrection;

    fn estimate_size(&self) -> usize {
        2 * SIZE_VEC3
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_vec3(self.position);
        buf.write_vec3(self.velocity);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            position: buf.read_vec3()?,
            velocity: buf.read_vec3()?,
        })
    }
}

/// Forced relocation of a stuck player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Respawn {
    pub position: Vec3,
}

impl Packet for Respawn {
    const KIND: MessageKind = MessageKind::Respawn;

    fn estimate_size(&self) -> usize {
        SIZE_VEC3
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_vec3(self.position);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            position: buf.read_vec3()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Block edits
// ---------------------------------------------------------------------------

/// Request to place the block state `save_key` at a world cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlace {
    pub position: IVec3,
    pub save_key: String,
}

impl Packet for BlockPlace {
    const KIND: MessageKind = MessageKind::BlockPlace;

    fn estimate_size(&self) -> usize {
        SIZE_IVEC3 + size_of_str(&self.save_key)
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        write_ivec3(buf, self.position);
        buf.write_str(&self.save_key);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            position: read_ivec3(buf)?,
            save_key: buf.read_string()?,
        })
    }
}

/// Request to clear a world cell back to air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBreak {
    pub position: IVec3,
}

impl Packet for BlockBreak {
    const KIND: MessageKind = MessageKind::BlockBreak;

    fn estimate_size(&self) -> usize {
        SIZE_IVEC3
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        write_ivec3(buf, self.position);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            position: read_ivec3(buf)?,
        })
    }
}

/// Authoritative block state at a world cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockUpdate {
    pub position: IVec3,
    pub save_key: String,
}

impl Packet for BlockUpdate {
    const KIND: MessageKind = MessageKind::BlockUpdate;

    fn estimate_size(&self) -> usize {
        SIZE_IVEC3 + size_of_str(&self.save_key)
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        write_ivec3(buf, self.position);
        buf.write_str(&self.save_key);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            position: read_ivec3(buf)?,
            save_key: buf.read_string()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Entities and UI
// ---------------------------------------------------------------------------

/// A new entity observers should start interpolating.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpawn {
    pub entity_id: u64,
    /// Free-form type tag such as `"player"`.
    pub kind: String,
    pub position: Vec3,
    /// Hitbox half extents.
    pub half_extents: Vec3,
}

impl Packet for EntitySpawn {
    const KIND: MessageKind = MessageKind::EntitySpawn;

    fn estimate_size(&self) -> usize {
        SIZE_U64 + size_of_str(&self.kind) + 2 * SIZE_VEC3
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_u64(self.entity_id);
        buf.write_str(&self.kind);
        buf.write_vec3(self.position);
        buf.write_vec3(self.half_extents);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            entity_id: buf.read_u64()?,
            kind: buf.read_string()?,
            position: buf.read_vec3()?,
            half_extents: buf.read_vec3()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDespawn {
    pub entity_id: u64,
}

impl Packet for EntityDespawn {
    const KIND: MessageKind = MessageKind::EntityDespawn;

    fn estimate_size(&self) -> usize {
        SIZE_U64
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_u64(self.entity_id);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            entity_id: buf.read_u64()?,
        })
    }
}

/// A UI element interaction with free-form arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct UiInteraction {
    pub element: String,
    pub args: serde_json::Value,
}

impl Packet for UiInteraction {
    const KIND: MessageKind = MessageKind::UiInteraction;

    fn estimate_size(&self) -> usize {
        size_of_str(&self.element) + size_of_document(&self.args)
    }

    fn write(&self, buf: &mut BinaryBuffer) {
        buf.write_str(&self.element);
        buf.write_document(&self.args);
    }

    fn read(buf: &mut BinaryBuffer) -> Result<Self, BufferError> {
        Ok(Self {
            element: buf.read_string()?,
            args: buf.read_document()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Top-level union
// ---------------------------------------------------------------------------

macro_rules! message_union {
    ($($variant:ident),* $(,)?) => {
        /// Any decodable message. The variant determines the wire type id.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($variant($variant),)*
        }

        impl Message {
            /// The registry kind of this message.
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(Message::$variant(_) => MessageKind::$variant,)*
                }
            }

            /// Exact payload size in bytes, excluding the type id.
            pub fn estimate_size(&self) -> usize {
                match self {
                    $(Message::$variant(p) => p.estimate_size(),)*
                }
            }

            pub(crate) fn write_payload(&self, buf: &mut BinaryBuffer) {
                match self {
                    $(Message::$variant(p) => p.write(buf),)*
                }
            }

            pub(crate) fn read_payload(
                kind: MessageKind,
                buf: &mut BinaryBuffer,
            ) -> Result<Message, BufferError> {
                match kind {
                    $(MessageKind::$variant => $variant::read(buf).map(Message::$variant),)*
                }
            }
        }

        $(
            impl From<$variant> for Message {
                fn from(packet: $variant) -> Self {
                    Message::$variant(packet)
                }
            }
        )*
    };
}

message_union! {
    Combined,
    Split,
    Ready,
    Identity,
    Welcome,
    Kick,
    Ping,
    Pong,
    ChunkRequest,
    ChunkData,
    ChunkUnload,
    PlayerMove,
    EntityMove,
    PositionCorrection,
    Respawn,
    BlockPlace,
    BlockBreak,
    BlockUpdate,
    EntitySpawn,
    EntityDespawn,
    UiInteraction,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<P: Packet + std::fmt::Debug + PartialEq>(packet: P) {
        let mut buf = BinaryBuffer::with_size(packet.estimate_size());
        packet.write(&mut buf);
        let mut reader = BinaryBuffer::from_bytes(buf.finish());
        let decoded = P::read(&mut reader).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_chunk_data_homogeneous_layout() {
        let packet = ChunkData {
            coord: IVec3::new(1, -2, 3),
            cells: ChunkCells::Homogeneous(0),
            palette: vec!["air#default".into()],
            entities: Vec::new(),
        };
        let mut buf = BinaryBuffer::with_size(packet.estimate_size());
        packet.write(&mut buf);
        let bytes = buf.finish();
        // 3 x i32, bool, u16 block, u16 palette length, string, u16 entity count.
        assert_eq!(bytes.len(), 12 + 1 + 2 + 2 + (4 + 11) + 2);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..8], &[0xff, 0xff, 0xff, 0xfe]);
        assert_eq!(bytes[12], 1);
    }

    #[test]
    fn test_chunk_data_raw_with_entities() {
        roundtrip(ChunkData {
            coord: IVec3::new(i32::MIN, 0, i32::MAX),
            cells: ChunkCells::Raw(vec![0, 1, 2, u16::MAX, 1]),
            palette: vec!["air#default".into(), "stone#default".into(), String::new()],
            entities: vec![EntityState {
                entity_id: u64::MAX,
                position: Vec3::new(1.0, 2.0, 3.0),
                velocity: Vec3::new(-0.5, 0.0, 0.25),
            }],
        });
    }

    #[test]
    fn test_split_bytes_run_to_end() {
        let packet = Split {
            nonce: 0xdead_beef,
            index: 2,
            total: 3,
            bytes: vec![1, 2, 3, 4],
        };
        assert_eq!(packet.estimate_size(), 8 + 4);
        roundtrip(packet);
    }

    #[test]
    fn test_player_move_angles_are_half_precision() {
        let packet = PlayerMove {
            position: Vec3::new(10.5, 64.0, -3.25),
            velocity: Vec3::ZERO,
            pitch: 0.5,
            yaw: -1.5,
        };
        assert_eq!(packet.estimate_size(), 28);
        roundtrip(packet);
    }

    #[test]
    fn test_empty_fields() {
        roundtrip(Identity {
            name: String::new(),
            token: String::new(),
        });
        roundtrip(Kick {
            reason: String::new(),
        });
        roundtrip(Combined { parts: Vec::new() });
        roundtrip(Ready);
    }

    #[test]
    fn test_combined_count_beyond_payload() {
        let mut buf = BinaryBuffer::with_size(SIZE_U16);
        buf.write_u16(u16::MAX);
        let mut reader = BinaryBuffer::from_bytes(buf.finish());
        assert!(matches!(
            Combined::read(&mut reader),
            Err(BufferError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn test_ui_interaction_document() {
        roundtrip(UiInteraction {
            element: "inventory".into(),
            args: serde_json::json!({"slot": 4, "shift": true}),
        });
    }

    #[test]
    fn test_message_kind_matches_variant() {
        let msg: Message = BlockBreak {
            position: IVec3::ONE,
        }
        .into();
        assert_eq!(msg.kind(), MessageKind::BlockBreak);
        assert_eq!(msg.estimate_size(), 12);
    }
}
