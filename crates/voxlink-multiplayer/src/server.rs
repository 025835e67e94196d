//! Authoritative host.
//!
//! The server owns the world and one peer record per open connection. Incoming
//! transport events are applied immediately; everything that goes back out
//! is queued on the peer's outbox and flushed by [`Server::tick`], which
//! also applies finished chunk loads and saves, runs the heartbeat and
//! writes dirty chunks to the store.
//!
//! Chunks stay loaded until the embedder calls [`Server::unload_chunk`];
//! the server never evicts on its own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{IVec3, Vec3};
use rustc_hash::FxHashMap;
use voxlink_physics::{EntityBody, is_colliding_with_world};
use voxlink_voxel::{AIR_KEY, Aabb, ChunkCoord, EntityId, SAVE_DIRTY, World, WorldError};
use voxlink_wire::{
    BlockUpdate, ChunkData, ChunkUnload, ConnectionId, EntityDespawn, EntityMove, EntitySpawn,
    EntityState, Identity, Inbox, Kick, Message, Ping, PlayerMove, Pong, PositionCorrection,
    Respawn, Transport, TransportEvent, Welcome,
};

use crate::ack::AckTracker;
use crate::convert::chunk_data_from_snapshot;
use crate::loader::{ChunkLoader, LoadSource, LoaderEvent};
use crate::outbox::Outbox;
use crate::session::{PeerState, Session, SessionEvent};
use crate::storage::save_chunk;

/// Entity kind announced for connected players.
pub const PLAYER_KIND: &str = "player";

/// Tunables for the authoritative host.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Where new and respawned players are placed (hitbox center).
    pub spawn_position: Vec3,
    pub player_half_extents: Vec3,
    /// Largest distance one `PlayerMove` may cover.
    pub max_move_distance: f32,
    /// Dirty chunks processed per tick.
    pub dirty_chunks_per_tick: usize,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// Consecutive unanswered pings before a peer is kicked.
    pub max_missed_pings: u32,
    /// Consecutive protocol errors before a peer is kicked.
    pub max_protocol_errors: u32,
    /// Shared secret expected in `Identity`. `None` accepts any token.
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            spawn_position: Vec3::new(0.5, 65.0, 0.5),
            player_half_extents: Vec3::new(0.3, 0.9, 0.3),
            max_move_distance: 10.0,
            dirty_chunks_per_tick: 16,
            ping_interval: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(10),
            max_missed_pings: 3,
            max_protocol_errors: 5,
            auth_token: None,
        }
    }
}

/// Why a claimed player position was refused.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum MoveRejection {
    #[error("peer is not active")]
    NotActive,
    #[error("claimed position is not finite")]
    InvalidPosition,
    #[error("chunk {0} is not loaded")]
    ChunkNotLoaded(ChunkCoord),
    #[error("moved {distance:.2} in one step, limit is {limit:.2}")]
    TooFar { distance: f32, limit: f32 },
    #[error("claimed position collides with block {0}")]
    Collision(IVec3),
    /// Both the previous and the claimed position overlap terrain.
    #[error("stuck inside block {0}")]
    Stuck(IVec3),
}

/// Why a block edit was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EditRejection {
    #[error("peer is not active")]
    NotActive,
    #[error("chunk {0} is not loaded")]
    ChunkNotLoaded(ChunkCoord),
    #[error("unknown block state {0:?}")]
    UnknownBlock(String),
    #[error("cell {position} is occupied by {current}")]
    Occupied { position: IVec3, current: String },
    #[error("cell {0} is already empty")]
    NothingToBreak(IVec3),
    #[error("placement at {position} intersects entity {entity:?}")]
    IntersectsPlayer { position: IVec3, entity: EntityId },
    #[error(transparent)]
    World(#[from] WorldError),
}

/// A requested block change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockEdit {
    Place { position: IVec3, save_key: String },
    Break { position: IVec3 },
}

impl BlockEdit {
    pub fn position(&self) -> IVec3 {
        match self {
            BlockEdit::Place { position, .. } | BlockEdit::Break { position } => *position,
        }
    }
}

/// Things the embedding application may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PeerJoined {
        id: ConnectionId,
        name: String,
        entity: EntityId,
    },
    PeerLeft {
        id: ConnectionId,
        reason: String,
    },
    UiInteraction {
        id: ConnectionId,
        element: String,
        args: serde_json::Value,
    },
    ChunkLoaded {
        coord: ChunkCoord,
        source: LoadSource,
    },
}

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

struct Peer {
    link: Arc<dyn Transport>,
    session: Session,
    inbox: Inbox,
    outbox: Outbox,
    name: String,
    entity: Option<EntityId>,
    body: EntityBody,
    pitch: f32,
    yaw: f32,
    acks: AckTracker,
    next_ping: Instant,
    next_nonce: u32,
    missed_pings: u32,
    protocol_errors: u32,
}

impl Peer {
    fn new(link: Arc<dyn Transport>, now: Instant, config: &ServerConfig) -> Self {
        Self {
            link,
            session: Session::new(),
            inbox: Inbox::new(),
            outbox: Outbox::new(),
            name: String::new(),
            entity: None,
            body: EntityBody::new(config.spawn_position, config.player_half_extents),
            pitch: 0.0,
            yaw: 0.0,
            acks: AckTracker::new(),
            next_ping: now + config.ping_interval,
            next_nonce: 0,
            missed_pings: 0,
            protocol_errors: 0,
        }
    }

    fn is_active(&self) -> bool {
        self.session.state().is_active()
    }

    fn spawn_message(&self) -> Option<EntitySpawn> {
        let entity = self.entity?;
        Some(EntitySpawn {
            entity_id: entity.0,
            kind: PLAYER_KIND.to_string(),
            position: self.body.position,
            half_extents: self.body.half_extents,
        })
    }

    fn move_message(&self) -> Option<EntityMove> {
        let entity = self.entity?;
        Some(EntityMove {
            entity_id: entity.0,
            position: self.body.position,
            velocity: self.body.velocity,
            pitch: self.pitch,
            yaw: self.yaw,
        })
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct Server {
    world: World,
    loader: ChunkLoader,
    config: ServerConfig,
    peers: FxHashMap<ConnectionId, Peer>,
    entity_peers: FxHashMap<EntityId, ConnectionId>,
    events: Vec<ServerEvent>,
    next_entity: u64,
    ticks: u64,
}

impl Server {
    pub fn new(world: World, loader: ChunkLoader, config: ServerConfig) -> Self {
        Self {
            world,
            loader,
            config,
            peers: FxHashMap::default(),
            entity_peers: FxHashMap::default(),
            events: Vec::new(),
            next_entity: 1,
            ticks: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_state(&self, id: ConnectionId) -> Option<PeerState> {
        self.peers.get(&id).map(|p| p.session.state())
    }

    /// Name given in the peer's `Identity`, empty until it is active.
    pub fn peer_name(&self, id: ConnectionId) -> Option<&str> {
        self.peers.get(&id).map(|p| p.name.as_str())
    }

    pub fn peer_entity(&self, id: ConnectionId) -> Option<EntityId> {
        self.peers.get(&id).and_then(|p| p.entity)
    }

    /// Last accepted hitbox center of a peer's player.
    pub fn peer_position(&self, id: ConnectionId) -> Option<Vec3> {
        self.peers.get(&id).map(|p| p.body.position)
    }

    pub fn take_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drops a chunk from memory. Refused while it has unsaved changes, a
    /// save or load in flight, or players inside it. A later request loads
    /// it back from the store.
    pub fn unload_chunk(&mut self, coord: ChunkCoord) -> bool {
        let Some(chunk) = self.world.chunk(coord) else {
            return false;
        };
        if chunk.is_dirty(SAVE_DIRTY)
            || self.loader.is_saving(coord)
            || self.loader.is_loading(coord)
            || !self.world.entities_in(coord).is_empty()
        {
            return false;
        }
        self.world.remove_chunk(coord).is_some()
    }

    /// Starts loading a chunk nobody asked for yet, e.g. around spawn.
    pub fn preload(&mut self, coord: ChunkCoord) -> bool {
        !self.world.is_loaded(coord) && self.loader.request(coord, None)
    }

    // -- Transport ----------------------------------------------------------

    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Open { id, link } => {
                tracing::info!("Peer {id} connected");
                let peer = Peer::new(link, now, &self.config);
                if let Some(stale) = self.peers.insert(id, peer) {
                    tracing::warn!("Connection id {id} reused, dropping the old peer");
                    stale.link.close();
                }
            }
            TransportEvent::Data { id, bytes } => self.handle_data(id, &bytes, now),
            TransportEvent::Close { id } => self.remove_peer(id, "connection closed"),
            TransportEvent::Error { id, error } => {
                tracing::warn!("Transport error on {id}: {error}");
            }
        }
    }

    fn handle_data(&mut self, id: ConnectionId, bytes: &[u8], now: Instant) {
        let Some(peer) = self.peers.get_mut(&id) else {
            tracing::debug!("Dropping {} bytes from unknown {id}", bytes.len());
            return;
        };
        match peer.inbox.receive(bytes) {
            Ok(messages) => {
                peer.protocol_errors = 0;
                for message in messages {
                    if !self.peers.contains_key(&id) {
                        break;
                    }
                    self.handle_message(id, message, now);
                }
            }
            Err(e) => self.protocol_error(id, &e.to_string()),
        }
    }

    /// Applies one decoded message from `id`.
    pub fn handle_message(&mut self, id: ConnectionId, message: Message, now: Instant) {
        tracing::trace!("{id} sent {:?}", message.kind());
        match message {
            Message::Ready(_) => self.handle_ready(id),
            Message::Identity(identity) => self.handle_identity(id, identity),
            Message::Ping(ping) => self.send_to(id, Pong { nonce: ping.nonce }),
            Message::Pong(pong) => {
                if let Some(peer) = self.peers.get_mut(&id)
                    && let Some(rtt) = peer.acks.resolve(pong.nonce, now)
                {
                    peer.missed_pings = 0;
                    tracing::trace!("Ping to {id} answered in {rtt:?}");
                }
            }
            Message::PlayerMove(claim) => {
                if let Err(rejection) = self.handle_player_move(id, claim) {
                    tracing::debug!("Rejected move from {id}: {rejection}");
                }
            }
            Message::BlockPlace(place) => {
                let edit = BlockEdit::Place {
                    position: place.position,
                    save_key: place.save_key,
                };
                if let Err(rejection) = self.handle_block_edit(id, edit) {
                    tracing::debug!("Rejected placement from {id}: {rejection}");
                }
            }
            Message::BlockBreak(brk) => {
                let edit = BlockEdit::Break {
                    position: brk.position,
                };
                if let Err(rejection) = self.handle_block_edit(id, edit) {
                    tracing::debug!("Rejected break from {id}: {rejection}");
                }
            }
            Message::ChunkRequest(request) => {
                self.handle_chunk_request(id, ChunkCoord::from(request.coord));
            }
            Message::UiInteraction(ui) => {
                if self.peers.get(&id).is_some_and(Peer::is_active) {
                    self.events.push(ServerEvent::UiInteraction {
                        id,
                        element: ui.element,
                        args: ui.args,
                    });
                }
            }
            Message::Kick(kick) => self.remove_peer(id, &kick.reason),
            other => self.protocol_error(id, &format!("unexpected {:?}", other.kind())),
        }
    }

    // -- Handshake ----------------------------------------------------------

    fn handle_ready(&mut self, id: ConnectionId) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if let Err(e) = peer.session.handle(SessionEvent::Ready) {
            self.protocol_error(id, &e.to_string());
        }
    }

    fn handle_identity(&mut self, id: ConnectionId, identity: Identity) {
        let Some(peer) = self.peers.get(&id) else {
            return;
        };
        let state = peer.session.state();
        if state != PeerState::Authenticating {
            self.protocol_error(id, &format!("identity while {state}"));
            return;
        }
        let name = identity.name.trim();
        let token_ok = self
            .config
            .auth_token
            .as_ref()
            .is_none_or(|expected| *expected == identity.token);
        if name.is_empty() || !token_ok {
            self.kick(id, "invalid credentials");
            return;
        }

        let entity = EntityId(self.next_entity);
        self.next_entity += 1;
        let spawn = self.config.spawn_position;
        let existing: Vec<EntitySpawn> = self
            .peers
            .iter()
            .filter(|(other, p)| **other != id && p.is_active())
            .filter_map(|(_, p)| p.spawn_message())
            .collect();

        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if let Err(e) = peer.session.handle(SessionEvent::Authenticated) {
            tracing::warn!("Could not activate {id}: {e}");
            return;
        }
        peer.name = name.to_string();
        peer.entity = Some(entity);
        peer.body = EntityBody::new(spawn, self.config.player_half_extents);
        peer.outbox.push(Welcome {
            entity_id: entity.0,
            position: spawn,
        });
        for message in existing {
            peer.outbox.push(message);
        }
        let announce = peer.spawn_message();

        self.entity_peers.insert(entity, id);
        self.world.update_entity(entity, spawn);
        if let Some(announce) = announce {
            self.broadcast(announce, Some(id));
        }
        tracing::info!("{name} joined on {id} as entity {}", entity.0);
        self.events.push(ServerEvent::PeerJoined {
            id,
            name: name.to_string(),
            entity,
        });
    }

    // -- Movement -----------------------------------------------------------

    /// Validates a claimed player position.
    ///
    /// Accepted claims update the player and are relayed to every other
    /// active peer. Rejected claims send the sender a correction, or a
    /// respawn when the player is stuck.
    pub fn handle_player_move(
        &mut self,
        id: ConnectionId,
        claim: PlayerMove,
    ) -> Result<(), MoveRejection> {
        let Some(peer) = self.peers.get(&id).filter(|p| p.is_active()) else {
            return Err(MoveRejection::NotActive);
        };
        let Some(entity) = peer.entity else {
            return Err(MoveRejection::NotActive);
        };
        let body = peer.body;

        if let Err(rejection) = self.validate_move(&body, claim.position) {
            match rejection {
                MoveRejection::Stuck(_) => self.respawn(id),
                _ => self.send_to(
                    id,
                    PositionCorrection {
                        position: body.position,
                        velocity: Vec3::ZERO,
                    },
                ),
            }
            return Err(rejection);
        }

        let Some(peer) = self.peers.get_mut(&id) else {
            return Err(MoveRejection::NotActive);
        };
        peer.body.position = claim.position;
        peer.body.velocity = claim.velocity;
        peer.pitch = claim.pitch;
        peer.yaw = claim.yaw;
        let relay = peer.move_message();
        self.world.update_entity(entity, claim.position);
        if let Some(relay) = relay {
            self.broadcast(relay, Some(id));
        }
        Ok(())
    }

    fn validate_move(&self, body: &EntityBody, claimed: Vec3) -> Result<(), MoveRejection> {
        if !claimed.is_finite() {
            return Err(MoveRejection::InvalidPosition);
        }
        let coord = ChunkCoord::of_position(claimed);
        if !self.world.is_loaded(coord) {
            return Err(MoveRejection::ChunkNotLoaded(coord));
        }
        let distance = claimed.distance(body.position);
        if distance > self.config.max_move_distance {
            return Err(MoveRejection::TooFar {
                distance,
                limit: self.config.max_move_distance,
            });
        }
        let Some(hit) = is_colliding_with_world(&self.world, &body.hitbox_at(claimed), Vec3::ZERO)
        else {
            return Ok(());
        };
        if is_colliding_with_world(&self.world, &body.hitbox(), Vec3::ZERO).is_some() {
            Err(MoveRejection::Stuck(hit.cell))
        } else {
            Err(MoveRejection::Collision(hit.cell))
        }
    }

    fn respawn(&mut self, id: ConnectionId) {
        let spawn = self.config.spawn_position;
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        peer.body.position = spawn;
        peer.body.velocity = Vec3::ZERO;
        peer.outbox.push(Respawn { position: spawn });
        let entity = peer.entity;
        let relay = peer.move_message();
        if let Some(entity) = entity {
            self.world.update_entity(entity, spawn);
        }
        if let Some(relay) = relay {
            self.broadcast(relay, Some(id));
        }
        tracing::info!("Respawned {id}");
    }

    // -- Block edits --------------------------------------------------------

    /// Validates and applies a block edit.
    ///
    /// Accepted edits are broadcast as `BlockUpdate` to every active peer.
    /// Rejected edits on a loaded chunk send the sender the authoritative
    /// state of the cell.
    pub fn handle_block_edit(
        &mut self,
        id: ConnectionId,
        edit: BlockEdit,
    ) -> Result<(), EditRejection> {
        let position = edit.position();
        match self.apply_edit(id, &edit) {
            Ok(save_key) => {
                self.broadcast(BlockUpdate { position, save_key }, None);
                Ok(())
            }
            Err(rejection) => {
                if !matches!(
                    rejection,
                    EditRejection::NotActive | EditRejection::ChunkNotLoaded(_)
                ) && let Some(current) = self.world.save_key_at(position)
                {
                    let update = BlockUpdate {
                        position,
                        save_key: current.to_string(),
                    };
                    self.send_to(id, update);
                }
                Err(rejection)
            }
        }
    }

    fn apply_edit(&mut self, id: ConnectionId, edit: &BlockEdit) -> Result<String, EditRejection> {
        if !self.peers.get(&id).is_some_and(Peer::is_active) {
            return Err(EditRejection::NotActive);
        }
        let position = edit.position();
        let coord = ChunkCoord::of_cell(position);
        if !self.world.is_loaded(coord) {
            return Err(EditRejection::ChunkNotLoaded(coord));
        }

        match edit {
            BlockEdit::Place { save_key, .. } => {
                let table = self.world.table();
                let Some(memo_id) = table.memo_id(save_key) else {
                    return Err(EditRejection::UnknownBlock(save_key.clone()));
                };
                // Only non-rendering states (air and the like) can be replaced.
                if self.world.memo_at(position).is_some_and(|m| m.renders) {
                    return Err(EditRejection::Occupied {
                        position,
                        current: self.world.save_key_at(position).unwrap_or_default().to_string(),
                    });
                }
                let origin = position.as_vec3();
                let boxes: Vec<Aabb> = table
                    .collider(memo_id)
                    .map(|c| c.blocking().map(|(_, b)| b.translated(origin)).collect())
                    .unwrap_or_default();
                if let Some(entity) = self.entity_overlapping(&boxes) {
                    return Err(EditRejection::IntersectsPlayer { position, entity });
                }
                self.world.set_block(position, save_key)?;
                Ok(save_key.clone())
            }
            BlockEdit::Break { .. } => {
                if self.world.is_air(position) != Some(false) {
                    return Err(EditRejection::NothingToBreak(position));
                }
                self.world.set_block(position, AIR_KEY)?;
                Ok(AIR_KEY.to_string())
            }
        }
    }

    fn entity_overlapping(&self, boxes: &[Aabb]) -> Option<EntityId> {
        self.peers
            .values()
            .filter(|p| p.is_active())
            .find(|p| {
                let hitbox = p.body.hitbox();
                boxes.iter().any(|b| hitbox.intersects(b))
            })
            .and_then(|p| p.entity)
    }

    // -- Chunks -------------------------------------------------------------

    fn handle_chunk_request(&mut self, id: ConnectionId, coord: ChunkCoord) {
        if !self.peers.get(&id).is_some_and(Peer::is_active) {
            tracing::debug!("Ignoring chunk request from inactive {id}");
            return;
        }
        if let Some(data) = self.chunk_data(coord) {
            self.send_to(id, data);
        } else if self.loader.request(coord, Some(id)) {
            tracing::debug!("{id} requested unloaded chunk {coord}");
        }
    }

    /// Wire form of a loaded chunk, including the players inside it.
    pub fn chunk_data(&self, coord: ChunkCoord) -> Option<ChunkData> {
        let snapshot = self.world.snapshot(coord)?;
        let entities = self
            .world
            .entities_in(coord)
            .into_iter()
            .filter_map(|entity| {
                let peer = self.peers.get(self.entity_peers.get(&entity)?)?;
                Some(EntityState {
                    entity_id: entity.0,
                    position: peer.body.position,
                    velocity: peer.body.velocity,
                })
            })
            .collect();
        Some(chunk_data_from_snapshot(snapshot, entities))
    }

    fn apply_loader_event(&mut self, event: LoaderEvent) {
        match event {
            LoaderEvent::Loaded { coord, result } => {
                let waiters = self.loader.take_waiters(coord);
                let (snapshot, source) = match result {
                    Ok(loaded) => loaded,
                    Err(e) => {
                        tracing::warn!("Failed to load chunk {coord}: {e}");
                        self.release_waiters(coord, waiters);
                        return;
                    }
                };
                if !self.world.is_loaded(coord) {
                    if let Err(e) = self.world.insert_snapshot(snapshot) {
                        tracing::warn!("Discarding chunk {coord}: {e}");
                        self.release_waiters(coord, waiters);
                        return;
                    }
                    if source == LoadSource::Generated {
                        self.world.mark_dirty(coord, SAVE_DIRTY);
                    }
                }
                tracing::debug!(
                    "Chunk {coord} ready ({source:?}), serving {} waiters",
                    waiters.len()
                );
                if let Some(data) = self.chunk_data(coord) {
                    for waiter in waiters {
                        if let Some(peer) = self.peers.get_mut(&waiter)
                            && peer.is_active()
                        {
                            peer.outbox.push(data.clone());
                        }
                    }
                }
                self.events.push(ServerEvent::ChunkLoaded { coord, source });
            }
            LoaderEvent::Saved { coord, result } => match result {
                Ok(()) => tracing::trace!("Saved chunk {coord}"),
                Err(e) => {
                    tracing::warn!("Failed to save chunk {coord}: {e}");
                    if !self.world.mark_dirty(coord, SAVE_DIRTY) {
                        tracing::warn!("Chunk {coord} was unloaded, its changes are lost");
                    }
                }
            },
        }
    }

    /// Tells everyone still waiting for `coord` that it is not coming, so
    /// they may ask again.
    fn release_waiters(&mut self, coord: ChunkCoord, waiters: Vec<ConnectionId>) {
        for waiter in waiters {
            if let Some(peer) = self.peers.get_mut(&waiter)
                && peer.is_active()
            {
                tracing::debug!("Chunk {coord} unavailable for {waiter}");
                peer.outbox.push(ChunkUnload {
                    coord: coord.as_ivec3(),
                });
            }
        }
    }

    /// Waits for one background load or save and applies it. Returns
    /// `false` when nothing is left to wait for.
    pub async fn await_loader_event(&mut self) -> bool {
        if self.loader.pending_loads() == 0 && self.loader.saves_in_flight() == 0 {
            return false;
        }
        match self.loader.next().await {
            Some(event) => {
                self.apply_loader_event(event);
                true
            }
            None => false,
        }
    }

    // -- Tick ---------------------------------------------------------------

    /// One simulation step: finished loads and saves, heartbeat, dirty
    /// flush, then every outbox.
    pub fn tick(&mut self, now: Instant) {
        while let Some(event) = self.loader.try_next() {
            self.apply_loader_event(event);
        }
        self.heartbeat(now);
        self.flush_dirty();
        self.flush_outboxes();
        for peer in self.peers.values_mut() {
            peer.inbox.prune(now);
        }
        self.world.events_mut().swap();
        self.ticks += 1;
    }

    fn heartbeat(&mut self, now: Instant) {
        let mut timed_out = Vec::new();
        for (&id, peer) in self.peers.iter_mut() {
            if !peer.is_active() {
                continue;
            }
            let expired = peer.acks.expire(now).len() as u32;
            if expired > 0 {
                peer.missed_pings += expired;
                tracing::debug!("{id} missed {} pings", peer.missed_pings);
            }
            if peer.missed_pings >= self.config.max_missed_pings {
                timed_out.push(id);
                continue;
            }
            if now >= peer.next_ping {
                let nonce = peer.next_nonce;
                peer.next_nonce = nonce.wrapping_add(1);
                let _ = peer.acks.register(nonce, now, self.config.ping_timeout);
                peer.outbox.push(Ping { nonce });
                peer.next_ping = now + self.config.ping_interval;
            }
        }
        for id in timed_out {
            self.kick(id, "timed out");
        }
    }

    fn flush_dirty(&mut self) {
        for coord in self.world.drain_dirty(self.config.dirty_chunks_per_tick) {
            let Some(flags) = self.world.chunk(coord).map(|c| c.dirty_flags()) else {
                continue;
            };
            if flags & SAVE_DIRTY != 0
                && let Some(snapshot) = self.world.snapshot(coord)
            {
                self.loader.spawn_save(snapshot);
            }
            self.world.clear_dirty(coord, flags);
        }
    }

    fn flush_outboxes(&mut self) {
        let mut failed = Vec::new();
        for (&id, peer) in self.peers.iter_mut() {
            if let Err(e) = peer.outbox.flush(peer.link.as_ref()) {
                tracing::warn!("Send to {id} failed: {e}");
                failed.push(id);
            }
        }
        for id in failed {
            self.remove_peer(id, "send failed");
        }
    }

    // -- Peer removal -------------------------------------------------------

    fn send_to(&mut self, id: ConnectionId, message: impl Into<Message>) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.outbox.push(message);
        }
    }

    fn broadcast(&mut self, message: impl Into<Message>, except: Option<ConnectionId>) {
        let message = message.into();
        for (&id, peer) in self.peers.iter_mut() {
            if Some(id) != except && peer.is_active() {
                peer.outbox.push(message.clone());
            }
        }
    }

    fn protocol_error(&mut self, id: ConnectionId, reason: &str) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        peer.protocol_errors += 1;
        tracing::warn!(
            "Protocol error from {id} ({}/{}): {reason}",
            peer.protocol_errors,
            self.config.max_protocol_errors
        );
        if peer.protocol_errors >= self.config.max_protocol_errors {
            self.kick(id, "too many protocol errors");
        }
    }

    /// Sends `Kick { reason }`, closes the connection and forgets the peer.
    pub fn kick(&mut self, id: ConnectionId, reason: &str) -> bool {
        let Some(mut peer) = self.peers.remove(&id) else {
            return false;
        };
        tracing::info!("Kicking {id}: {reason}");
        peer.outbox.push(Kick {
            reason: reason.to_string(),
        });
        if let Err(e) = peer.outbox.flush(peer.link.as_ref()) {
            tracing::debug!("Kick to {id} not delivered: {e}");
        }
        peer.link.close();
        self.forget_peer(id, peer, reason);
        true
    }

    fn remove_peer(&mut self, id: ConnectionId, reason: &str) {
        let Some(peer) = self.peers.remove(&id) else {
            return;
        };
        peer.link.close();
        tracing::info!("Peer {id} disconnected: {reason}");
        self.forget_peer(id, peer, reason);
    }

    fn forget_peer(&mut self, id: ConnectionId, mut peer: Peer, reason: &str) {
        peer.session.disconnect();
        peer.acks.close_all();
        self.loader.forget_requester(id);
        if let Some(entity) = peer.entity {
            self.entity_peers.remove(&entity);
            self.world.remove_entity(entity);
            self.broadcast(
                EntityDespawn {
                    entity_id: entity.0,
                },
                None,
            );
        }
        self.events.push(ServerEvent::PeerLeft {
            id,
            reason: reason.to_string(),
        });
    }

    /// Kicks everyone, waits for in-flight saves and writes every chunk
    /// still marked for saving. Returns the number of chunks written.
    pub async fn shutdown(&mut self, reason: &str) -> usize {
        let ids: Vec<ConnectionId> = self.peers.keys().copied().collect();
        for id in ids {
            self.kick(id, reason);
        }
        while self.loader.saves_in_flight() > 0 {
            match self.loader.next().await {
                Some(event) => self.apply_loader_event(event),
                None => break,
            }
        }

        let store = Arc::clone(self.loader.store());
        let pending: Vec<ChunkCoord> = self
            .world
            .loaded_coords()
            .filter(|&c| self.world.chunk(c).is_some_and(|ch| ch.is_dirty(SAVE_DIRTY)))
            .collect();
        let mut saved = 0;
        for coord in pending {
            let Some(snapshot) = self.world.snapshot(coord) else {
                continue;
            };
            match save_chunk(store.as_ref(), &snapshot).await {
                Ok(()) => {
                    self.world.clear_dirty(coord, SAVE_DIRTY);
                    saved += 1;
                }
                Err(e) => tracing::warn!("Failed to save chunk {coord} on shutdown: {e}"),
            }
        }
        tracing::info!("Saved {saved} chunks on shutdown");
        saved
    }
}
