//! Message-type registry assigning dense `u16` ids in registration order.
//!
//! The registry has two phases. While open it only accepts appends; after
//! [`MessageRegistry::freeze`] it is read-only and further registrations are
//! rejected. The process-wide instance returned by [`MessageRegistry::global`]
//! registers every [`MessageKind`] in declaration order and freezes itself on
//! first use, so ids are stable for the lifetime of a build.

use std::sync::OnceLock;

use rustc_hash::FxHashMap;

/// Every message type that can appear on the wire, in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
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

impl MessageKind {
    /// All kinds in registration order.
    pub const ALL: [MessageKind; 21] = [
        MessageKind::Combined,
        MessageKind::Split,
        MessageKind::Ready,
        MessageKind::Identity,
        MessageKind::Welcome,
        MessageKind::Kick,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::ChunkRequest,
        MessageKind::ChunkData,
        MessageKind::ChunkUnload,
        MessageKind::PlayerMove,
        MessageKind::EntityMove,
        MessageKind::PositionCorrection,
        MessageKind::Respawn,
        MessageKind::BlockPlace,
        MessageKind::BlockBreak,
        MessageKind::BlockUpdate,
        MessageKind::EntitySpawn,
        MessageKind::EntityDespawn,
        MessageKind::UiInteraction,
    ];
}

/// Errors from registering message kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The registry was frozen before this registration.
    #[error("registry is frozen, cannot register {0:?}")]
    Frozen(MessageKind),
    /// The kind already has an id.
    #[error("{0:?} is already registered")]
    Duplicate(MessageKind),
    /// All `u16` ids are taken.
    #[error("registry is full")]
    Full,
}

/// Bidirectional mapping between [`MessageKind`] and its wire id.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    kinds: Vec<MessageKind>,
    ids: FxHashMap<MessageKind, u16>,
    frozen: bool,
}

impl MessageRegistry {
    /// Creates an empty, open registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The frozen process-wide registry containing every [`MessageKind`].
    pub fn global() -> &'static MessageRegistry {
        static GLOBAL: OnceLock<MessageRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let mut registry = MessageRegistry::new();
            for (id, kind) in MessageKind::ALL.into_iter().enumerate() {
                registry.kinds.push(kind);
                registry.ids.insert(kind, id as u16);
            }
            registry.freeze();
            tracing::debug!("Message registry frozen with {} kinds", registry.len());
            registry
        })
    }

    /// Appends `kind` and returns its id.
    pub fn register(&mut self, kind: MessageKind) -> Result<u16, RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen(kind));
        }
        if self.ids.contains_key(&kind) {
            return Err(RegistryError::Duplicate(kind));
        }
        let id = u16::try_from(self.kinds.len()).map_err(|_| RegistryError::Full)?;
        self.kinds.push(kind);
        self.ids.insert(kind, id);
        Ok(id)
    }

    /// Switches the registry to its read-only phase.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Wire id of `kind`, if registered.
    pub fn id_of(&self, kind: MessageKind) -> Option<u16> {
        self.ids.get(&kind).copied()
    }

    /// Kind registered under `id`, if any.
    pub fn kind_of(&self, id: u16) -> Option<MessageKind> {
        self.kinds.get(id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_registration_order() {
        let mut registry = MessageRegistry::new();
        assert_eq!(registry.register(MessageKind::Ping).unwrap(), 0);
        assert_eq!(registry.register(MessageKind::Pong).unwrap(), 1);
        assert_eq!(registry.kind_of(1), Some(MessageKind::Pong));
        assert_eq!(registry.id_of(MessageKind::Ping), Some(0));
        assert_eq!(registry.kind_of(2), None);
    }

    #[test]
    fn test_registration_after_freeze_rejected() {
        let mut registry = MessageRegistry::new();
        registry.register(MessageKind::Ready).unwrap();
        registry.freeze();
        assert_eq!(
            registry.register(MessageKind::Kick),
            Err(RegistryError::Frozen(MessageKind::Kick))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = MessageRegistry::new();
        registry.register(MessageKind::Ready).unwrap();
        assert_eq!(
            registry.register(MessageKind::Ready),
            Err(RegistryError::Duplicate(MessageKind::Ready))
        );
    }

    #[test]
    fn test_global_registry_is_frozen_and_complete() {
        let registry = MessageRegistry::global();
        assert!(registry.is_frozen());
        assert_eq!(registry.len(), MessageKind::ALL.len());
        assert_eq!(registry.id_of(MessageKind::Combined), Some(0));
        assert_eq!(registry.id_of(MessageKind::Split), Some(1));
        for (id, kind) in MessageKind::ALL.into_iter().enumerate() {
            assert_eq!(registry.kind_of(id as u16), Some(kind));
        }
    }
}
