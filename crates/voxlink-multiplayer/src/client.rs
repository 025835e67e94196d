//! Predicting client.
//!
//! The client simulates its own player with the same integrator the host
//! validates against and sends the predicted state every tick. `PlayerMove`
//! carries no sequence number, so the client cannot tell which of its moves
//! a correction answers; it does not replay. Authoritative corrections snap
//! the body back and hand the difference to [`CorrectionSmoothing`] so the
//! rendered position catches up instead of jumping. Other players are
//! observed entities that interpolate toward the latest snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{IVec3, Vec3};
use rustc_hash::{FxHashMap, FxHashSet};
use voxlink_physics::{Entity, EntityBody, PhysicsParams, StepReport};
use voxlink_voxel::{ChunkCoord, EntityId, World, WorldError};
use voxlink_wire::{
    BlockBreak, BlockPlace, ChunkData, ChunkRequest, Identity, Inbox, Kick, Message, Ping,
    PlayerMove, Pong, Ready, Transport, TransportError, TransportEvent, UiInteraction, Welcome,
};

use crate::ack::{AckTracker, AckWaiter};
use crate::convert::snapshot_from_chunk_data;
use crate::outbox::Outbox;
use crate::server::PLAYER_KIND;
use crate::session::{PeerState, Session, SessionError, SessionEvent};
use crate::smoothing::{CorrectionSmoothing, DEFAULT_DECAY_RATE};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub name: String,
    pub token: String,
    pub physics: PhysicsParams,
    pub player_half_extents: Vec3,
    pub ping_timeout: Duration,
    pub smoothing_decay: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "player".to_string(),
            token: String::new(),
            physics: PhysicsParams::default(),
            player_half_extents: Vec3::new(0.3, 0.9, 0.3),
            ping_timeout: Duration::from_secs(5),
            smoothing_decay: DEFAULT_DECAY_RATE,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Things the embedding application may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Welcomed { entity: EntityId, position: Vec3 },
    Kicked { reason: String },
    Disconnected,
    /// The host moved the player. `delta` is new minus predicted position.
    Corrected { delta: Vec3, respawn: bool },
    ChunkLoaded(ChunkCoord),
    ChunkUnloaded(ChunkCoord),
    BlockChanged { position: IVec3, save_key: String },
    EntitySpawned(EntityId),
    EntityDespawned(EntityId),
    UiInteraction { element: String, args: serde_json::Value },
}

pub struct Client {
    link: Arc<dyn Transport>,
    session: Session,
    inbox: Inbox,
    outbox: Outbox,
    world: World,
    config: ClientConfig,
    player: Option<Entity>,
    remotes: FxHashMap<EntityId, Entity>,
    smoothing: CorrectionSmoothing,
    acks: AckTracker,
    next_nonce: u32,
    pitch: f32,
    yaw: f32,
    requested: FxHashSet<ChunkCoord>,
    events: Vec<ClientEvent>,
}

impl Client {
    pub fn new(link: Arc<dyn Transport>, world: World, config: ClientConfig) -> Self {
        Self {
            link,
            session: Session::new(),
            inbox: Inbox::new(),
            outbox: Outbox::new(),
            world,
            smoothing: CorrectionSmoothing::new(config.smoothing_decay),
            config,
            player: None,
            remotes: FxHashMap::default(),
            acks: AckTracker::new(),
            next_nonce: 0,
            pitch: 0.0,
            yaw: 0.0,
            requested: FxHashSet::default(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> PeerState {
        self.session.state()
    }

    pub fn is_active(&self) -> bool {
        self.session.state().is_active()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn player(&self) -> Option<&Entity> {
        self.player.as_ref()
    }

    /// The local player, for input handling (velocity, jumping).
    pub fn player_mut(&mut self) -> Option<&mut Entity> {
        self.player.as_mut()
    }

    pub fn remote(&self, id: EntityId) -> Option<&Entity> {
        self.remotes.get(&id)
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn smoothing(&self) -> &CorrectionSmoothing {
        &self.smoothing
    }

    /// Where to draw the local player this frame.
    pub fn render_position(&self) -> Option<Vec3> {
        self.player
            .as_ref()
            .map(|p| self.smoothing.render_position(p.body.position))
    }

    pub fn set_look(&mut self, pitch: f32, yaw: f32) {
        self.pitch = pitch;
        self.yaw = yaw;
    }

    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    // -- Outgoing -----------------------------------------------------------

    /// Starts the handshake: `Ready` followed by `Identity`, sent at once.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        self.session.handle(SessionEvent::Ready)?;
        self.outbox.push(Ready);
        self.outbox.push(Identity {
            name: self.config.name.clone(),
            token: self.config.token.clone(),
        });
        self.flush()?;
        Ok(())
    }

    /// Sends everything queued so far.
    pub fn flush(&mut self) -> Result<usize, TransportError> {
        self.outbox.flush(self.link.as_ref())
    }

    /// Asks for a chunk unless it is loaded or already requested.
    pub fn request_chunk(&mut self, coord: ChunkCoord) -> bool {
        if self.world.is_loaded(coord) || !self.requested.insert(coord) {
            return false;
        }
        self.outbox.push(ChunkRequest {
            coord: coord.as_ivec3(),
        });
        true
    }

    /// Requests every missing chunk within `radius` chunks of the player.
    pub fn request_chunks_around(&mut self, radius: i32) -> usize {
        let Some(player) = &self.player else {
            return 0;
        };
        let center = ChunkCoord::of_position(player.body.position);
        let mut sent = 0;
        for dy in -radius..=radius {
            for dz in -radius..=radius {
                for dx in -radius..=radius {
                    if self.request_chunk(center.offset(dx, dy, dz)) {
                        sent += 1;
                    }
                }
            }
        }
        sent
    }

    /// Asks the host to place a block. The world changes once the host
    /// answers with a `BlockUpdate`.
    pub fn place_block(&mut self, position: IVec3, save_key: impl Into<String>) {
        self.outbox.push(BlockPlace {
            position,
            save_key: save_key.into(),
        });
    }

    pub fn break_block(&mut self, position: IVec3) {
        self.outbox.push(BlockBreak { position });
    }

    pub fn send_ui(&mut self, element: impl Into<String>, args: serde_json::Value) {
        self.outbox.push(UiInteraction {
            element: element.into(),
            args,
        });
    }

    /// Sends a ping right away. The returned waiter resolves with the
    /// round-trip time, or times out after `ping_timeout`.
    pub fn ping(&mut self, now: Instant) -> Result<AckWaiter, ClientError> {
        let nonce = self.next_nonce;
        self.next_nonce = nonce.wrapping_add(1);
        let waiter = self.acks.register(nonce, now, self.config.ping_timeout);
        self.outbox.push(Ping { nonce });
        self.flush()?;
        Ok(waiter)
    }

    /// Leaves the host with a goodbye and closes the connection.
    pub fn disconnect(&mut self, reason: &str) {
        self.outbox.push(Kick {
            reason: reason.to_string(),
        });
        if let Err(e) = self.flush() {
            tracing::debug!("Goodbye not delivered: {e}");
        }
        self.link.close();
        self.on_closed();
    }

    // -- Incoming -----------------------------------------------------------

    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Data { bytes, .. } => match self.inbox.receive(&bytes) {
                Ok(messages) => {
                    for message in messages {
                        self.handle_message(message, now);
                    }
                }
                Err(e) => tracing::warn!("Dropping malformed frame from host: {e}"),
            },
            TransportEvent::Close { .. } => self.on_closed(),
            TransportEvent::Error { error, .. } => {
                tracing::warn!("Transport error: {error}");
            }
            TransportEvent::Open { id, .. } => {
                tracing::debug!("Ignoring unexpected open of {id}");
            }
        }
    }

    pub fn handle_message(&mut self, message: Message, now: Instant) {
        match message {
            Message::Welcome(welcome) => self.on_welcome(welcome),
            Message::Kick(kick) => {
                tracing::warn!("Kicked by host: {}", kick.reason);
                self.events.push(ClientEvent::Kicked {
                    reason: kick.reason,
                });
                self.on_closed();
            }
            Message::Ping(ping) => self.outbox.push(Pong { nonce: ping.nonce }),
            Message::Pong(pong) => {
                if let Some(rtt) = self.acks.resolve(pong.nonce, now) {
                    tracing::trace!("Round trip {rtt:?}");
                }
            }
            Message::ChunkData(data) => self.on_chunk_data(data),
            Message::ChunkUnload(unload) => {
                let coord = ChunkCoord::from(unload.coord);
                self.requested.remove(&coord);
                if self.world.remove_chunk(coord).is_some() {
                    self.events.push(ClientEvent::ChunkUnloaded(coord));
                }
            }
            Message::EntitySpawn(spawn) => {
                let id = EntityId(spawn.entity_id);
                if self.player.as_ref().is_some_and(|p| p.id == id) {
                    return;
                }
                let mut body = EntityBody::new(spawn.position, spawn.half_extents);
                body.ignore_gravity = true;
                self.remotes
                    .insert(id, Entity::observed(id, spawn.kind, body));
                self.world.update_entity(id, spawn.position);
                self.events.push(ClientEvent::EntitySpawned(id));
            }
            Message::EntityMove(update) => {
                let id = EntityId(update.entity_id);
                if let Some(remote) = self.remotes.get_mut(&id) {
                    remote.push_snapshot(update.position, update.velocity);
                    self.world.update_entity(id, update.position);
                }
            }
            Message::EntityDespawn(despawn) => {
                let id = EntityId(despawn.entity_id);
                if self.remotes.remove(&id).is_some() {
                    self.world.remove_entity(id);
                    self.events.push(ClientEvent::EntityDespawned(id));
                }
            }
            Message::PositionCorrection(correction) => {
                self.correct(correction.position, correction.velocity, false);
            }
            Message::Respawn(respawn) => self.correct(respawn.position, Vec3::ZERO, true),
            Message::BlockUpdate(update) => {
                match self.world.set_block(update.position, &update.save_key) {
                    Ok(_) => self.events.push(ClientEvent::BlockChanged {
                        position: update.position,
                        save_key: update.save_key,
                    }),
                    Err(WorldError::NotLoaded(coord)) => {
                        tracing::trace!("Block update for unloaded chunk {coord}");
                    }
                    Err(e) => tracing::warn!("Could not apply block update: {e}"),
                }
            }
            Message::UiInteraction(ui) => self.events.push(ClientEvent::UiInteraction {
                element: ui.element,
                args: ui.args,
            }),
            other => tracing::warn!("Unexpected {:?} from host", other.kind()),
        }
    }

    fn on_welcome(&mut self, welcome: Welcome) {
        if let Err(e) = self.session.handle(SessionEvent::Authenticated) {
            tracing::warn!("Ignoring welcome: {e}");
            return;
        }
        let id = EntityId(welcome.entity_id);
        let body = EntityBody::new(welcome.position, self.config.player_half_extents);
        self.player = Some(Entity::simulated(id, PLAYER_KIND, body));
        self.world.update_entity(id, welcome.position);
        tracing::info!("Joined as entity {}", id.0);
        self.events.push(ClientEvent::Welcomed {
            entity: id,
            position: welcome.position,
        });
    }

    fn on_chunk_data(&mut self, data: ChunkData) {
        let coord = ChunkCoord::from(data.coord);
        self.requested.remove(&coord);
        if self.world.is_loaded(coord) {
            self.world.remove_chunk(coord);
        }
        if let Err(e) = self.world.insert_snapshot(snapshot_from_chunk_data(&data)) {
            tracing::warn!("Rejected chunk {coord} from host: {e}");
            return;
        }
        for state in &data.entities {
            let id = EntityId(state.entity_id);
            if let Some(remote) = self.remotes.get_mut(&id) {
                remote.push_snapshot(state.position, state.velocity);
            }
        }
        self.events.push(ClientEvent::ChunkLoaded(coord));
    }

    fn correct(&mut self, position: Vec3, velocity: Vec3, respawn: bool) {
        let Some(player) = self.player.as_mut() else {
            return;
        };
        let delta = position - player.body.position;
        player.body.position = position;
        player.body.velocity = velocity;
        player.body.acceleration = Vec3::ZERO;
        let id = player.id;
        if respawn {
            self.smoothing.reset();
        } else {
            self.smoothing.apply_correction(delta);
        }
        self.world.update_entity(id, position);
        tracing::debug!("Corrected by {delta} (respawn: {respawn})");
        self.events.push(ClientEvent::Corrected { delta, respawn });
    }

    fn on_closed(&mut self) {
        if self.session.disconnect() {
            self.acks.close_all();
            self.events.push(ClientEvent::Disconnected);
        }
    }

    // -- Tick ---------------------------------------------------------------

    /// Predicts the player, advances observed entities and flushes the
    /// outbox.
    pub fn tick(&mut self, dt: f32, now: Instant) -> Result<StepReport, TransportError> {
        let mut report = StepReport::default();
        if self.is_active()
            && let Some(player) = self.player.as_mut()
        {
            report = player.tick(&self.world, &self.config.physics, dt);
            self.outbox.push(PlayerMove {
                position: player.body.position,
                velocity: player.body.velocity,
                pitch: self.pitch,
                yaw: self.yaw,
            });
            let (id, position) = (player.id, player.body.position);
            self.world.update_entity(id, position);
        }
        for remote in self.remotes.values_mut() {
            remote.tick(&self.world, &self.config.physics, dt);
        }
        self.smoothing.update(dt);
        self.acks.expire(now);
        self.inbox.prune(now);
        self.world.events_mut().swap();
        if self.session.state().is_connected() {
            self.flush()?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::AckOutcome;
    use tokio::sync::mpsc;
    use voxlink_voxel::{BlockRegistry, BlockStateDef, BlockTypeDef, FlatGenerator};
    use voxlink_wire::{
        BlockUpdate, ChunkUnload, ConnectionId, EntityDespawn, EntityMove, EntitySpawn,
        EventReceiver, PositionCorrection, Respawn,
    };

    use crate::convert::chunk_data_from_snapshot;
    use voxlink_voxel::ChunkGenerator;

    fn world() -> World {
        let mut registry = BlockRegistry::new();
        registry.register(BlockTypeDef::air()).unwrap();
        registry
            .register(BlockTypeDef::new("stone", vec![BlockStateDef::solid("default")]))
            .unwrap();
        World::new(registry.freeze().unwrap()).unwrap()
    }

    fn client() -> (Client, EventReceiver) {
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let conn = memory_connect_host(&host_tx);
        assert!(matches!(host_rx.try_recv(), Ok(TransportEvent::Open { .. })));
        (Client::new(conn, world(), ClientConfig::default()), host_rx)
    }

    fn memory_connect_host(host_tx: &voxlink_wire::EventSender) -> Arc<dyn Transport> {
        voxlink_wire::memory_connect(host_tx, ConnectionId(1), 64 * 1024).link
    }

    fn sent(host_rx: &mut EventReceiver) -> Vec<Message> {
        let mut inbox = Inbox::new();
        let mut messages = Vec::new();
        while let Ok(event) = host_rx.try_recv() {
            if let TransportEvent::Data { bytes, .. } = event {
                messages.extend(inbox.receive(&bytes).unwrap());
            }
        }
        messages
    }

    fn floor_chunk() -> ChunkData {
        let snapshot = FlatGenerator::new(2, "stone#default", "stone#default")
            .generate(ChunkCoord::new(0, 0, 0));
        chunk_data_from_snapshot(snapshot, Vec::new())
    }

    fn welcomed(client: &mut Client, position: Vec3) {
        let now = Instant::now();
        client.connect().unwrap();
        client.handle_message(
            Message::Welcome(Welcome {
                entity_id: 7,
                position,
            }),
            now,
        );
    }

    #[test]
    fn test_connect_sends_ready_and_identity() {
        let (mut client, mut host_rx) = client();
        client.connect().unwrap();
        assert_eq!(client.state(), PeerState::Authenticating);
        assert_eq!(
            sent(&mut host_rx),
            vec![
                Message::Ready(Ready),
                Message::Identity(Identity {
                    name: "player".into(),
                    token: String::new(),
                }),
            ]
        );
        assert!(client.connect().is_err());
    }

    #[test]
    fn test_welcome_creates_player() {
        let (mut client, _host_rx) = client();
        welcomed(&mut client, Vec3::new(8.5, 3.0, 8.5));
        assert!(client.is_active());
        let player = client.player().unwrap();
        assert!(player.is_simulated());
        assert_eq!(player.id, EntityId(7));
        assert_eq!(
            client.take_events(),
            vec![ClientEvent::Welcomed {
                entity: EntityId(7),
                position: Vec3::new(8.5, 3.0, 8.5)
            }]
        );
    }

    #[test]
    fn test_welcome_before_connect_is_ignored() {
        let (mut client, _host_rx) = client();
        client.handle_message(
            Message::Welcome(Welcome {
                entity_id: 1,
                position: Vec3::ZERO,
            }),
            Instant::now(),
        );
        assert!(client.player().is_none());
        assert_eq!(client.state(), PeerState::Connecting);
    }

    #[test]
    fn test_tick_predicts_and_sends_moves() {
        let (mut client, mut host_rx) = client();
        let now = Instant::now();
        welcomed(&mut client, Vec3::new(8.5, 4.0, 8.5));
        client.handle_message(Message::ChunkData(floor_chunk()), now);
        sent(&mut host_rx);

        for _ in 0..30 {
            client.tick(1.0 / 30.0, now).unwrap();
        }
        let player = client.player().unwrap();
        assert!(player.body.on_ground);
        assert!((player.body.position.y - 2.9).abs() < 0.01);

        let moves = sent(&mut host_rx);
        assert_eq!(moves.len(), 30);
        assert!(moves.iter().all(|m| matches!(m, Message::PlayerMove(_))));
    }

    #[test]
    fn test_small_correction_is_smoothed() {
        let (mut client, mut host_rx) = client();
        let now = Instant::now();
        welcomed(&mut client, Vec3::new(8.5, 3.0, 8.5));
        client.handle_message(Message::ChunkData(floor_chunk()), now);
        client.tick(0.01, now).unwrap();
        let predicted = client.player().unwrap().body.position;

        let target = predicted + Vec3::new(0.2, 0.0, 0.0);
        client.handle_message(
            Message::PositionCorrection(PositionCorrection {
                position: target,
                velocity: Vec3::ZERO,
            }),
            now,
        );
        assert_eq!(client.player().unwrap().body.position, target);
        let rendered = client.render_position().unwrap();
        assert!(rendered.abs_diff_eq(predicted, 1e-5));
        assert!(matches!(
            client.take_events().last(),
            Some(ClientEvent::Corrected { respawn: false, .. })
        ));

        // Prediction resumes from the authoritative position.
        sent(&mut host_rx);
        client.tick(0.01, now).unwrap();
        let moves = sent(&mut host_rx);
        let [Message::PlayerMove(next)] = &moves[..] else {
            panic!("expected one move, got {moves:?}");
        };
        assert!((next.position.x - target.x).abs() < 1e-5);
    }

    #[test]
    fn test_respawn_snaps() {
        let (mut client, _host_rx) = client();
        let now = Instant::now();
        welcomed(&mut client, Vec3::new(8.5, 3.0, 8.5));
        client.handle_message(
            Message::PositionCorrection(PositionCorrection {
                position: Vec3::new(8.6, 3.0, 8.5),
                velocity: Vec3::ZERO,
            }),
            now,
        );
        assert!(!client.smoothing().is_zero());
        let spawn = Vec3::new(8.7, 3.0, 8.5);
        client.handle_message(Message::Respawn(Respawn { position: spawn }), now);
        assert_eq!(client.render_position(), Some(spawn));
        assert_eq!(client.player().unwrap().body.velocity, Vec3::ZERO);
    }

    #[test]
    fn test_chunk_data_and_block_updates() {
        let (mut client, _host_rx) = client();
        let now = Instant::now();
        welcomed(&mut client, Vec3::new(8.5, 3.0, 8.5));
        let coord = ChunkCoord::new(0, 0, 0);
        assert!(client.request_chunk(coord));
        assert!(!client.request_chunk(coord));

        client.handle_message(Message::ChunkData(floor_chunk()), now);
        assert!(client.world().is_loaded(coord));
        assert!(!client.request_chunk(coord));

        let position = IVec3::new(1, 1, 1);
        client.handle_message(
            Message::BlockUpdate(BlockUpdate {
                position,
                save_key: "air#default".into(),
            }),
            now,
        );
        assert_eq!(client.world().is_air(position), Some(true));

        // Fresh data replaces the edited chunk.
        client.handle_message(Message::ChunkData(floor_chunk()), now);
        assert_eq!(client.world().is_air(position), Some(false));

        client.handle_message(
            Message::ChunkUnload(ChunkUnload {
                coord: coord.as_ivec3(),
            }),
            now,
        );
        assert!(!client.world().is_loaded(coord));
        let events = client.take_events();
        assert!(events.contains(&ClientEvent::ChunkUnloaded(coord)));
        assert!(events.contains(&ClientEvent::BlockChanged {
            position,
            save_key: "air#default".into()
        }));
    }

    #[test]
    fn test_request_chunks_around_player() {
        let (mut client, mut host_rx) = client();
        welcomed(&mut client, Vec3::new(8.5, 3.0, 8.5));
        sent(&mut host_rx);
        assert_eq!(client.request_chunks_around(1), 27);
        assert_eq!(client.request_chunks_around(1), 0);
        client.flush().unwrap();
        assert_eq!(sent(&mut host_rx).len(), 27);
    }

    #[test]
    fn test_remote_entities_follow_snapshots() {
        let (mut client, _host_rx) = client();
        let now = Instant::now();
        welcomed(&mut client, Vec3::new(8.5, 3.0, 8.5));
        client.handle_message(Message::ChunkData(floor_chunk()), now);
        client.handle_message(
            Message::EntitySpawn(EntitySpawn {
                entity_id: 9,
                kind: PLAYER_KIND.into(),
                position: Vec3::new(4.5, 3.0, 4.5),
                half_extents: Vec3::new(0.3, 0.9, 0.3),
            }),
            now,
        );
        // Our own spawn is not a remote.
        client.handle_message(
            Message::EntitySpawn(EntitySpawn {
                entity_id: 7,
                kind: PLAYER_KIND.into(),
                position: Vec3::ZERO,
                half_extents: Vec3::ONE,
            }),
            now,
        );
        assert_eq!(client.remote_count(), 1);

        client.handle_message(
            Message::EntityMove(EntityMove {
                entity_id: 9,
                position: Vec3::new(5.5, 3.0, 4.5),
                velocity: Vec3::X,
                pitch: 0.0,
                yaw: 0.0,
            }),
            now,
        );
        client.tick(0.05, now).unwrap();
        let halfway = client.remote(EntityId(9)).unwrap().body.position;
        assert!(halfway.x > 4.5 && halfway.x < 5.5);
        client.tick(0.1, now).unwrap();
        let settled = client.remote(EntityId(9)).unwrap().body.position;
        assert!(settled.abs_diff_eq(Vec3::new(5.5, 3.0, 4.5), 1e-5));

        client.handle_message(
            Message::EntityDespawn(EntityDespawn { entity_id: 9 }),
            now,
        );
        assert!(client.remote(EntityId(9)).is_none());
        assert_eq!(client.world().entity_chunk(EntityId(9)), None);
    }

    #[tokio::test]
    async fn test_ping_resolves_on_pong() {
        let (mut client, mut host_rx) = client();
        let now = Instant::now();
        let waiter = client.ping(now).unwrap();
        assert_eq!(sent(&mut host_rx), vec![Message::Ping(Ping { nonce: 0 })]);
        client.handle_message(
            Message::Pong(Pong { nonce: 0 }),
            now + Duration::from_millis(25),
        );
        assert_eq!(
            waiter.wait().await,
            AckOutcome::Acked {
                rtt: Duration::from_millis(25)
            }
        );
    }

    #[tokio::test]
    async fn test_kick_closes_pending_pings() {
        let (mut client, _host_rx) = client();
        let now = Instant::now();
        welcomed(&mut client, Vec3::ZERO);
        let waiter = client.ping(now).unwrap();
        client.handle_message(
            Message::Kick(Kick {
                reason: "bye".into(),
            }),
            now,
        );
        assert_eq!(waiter.wait().await, AckOutcome::Closed);
        assert_eq!(client.state(), PeerState::Disconnected);
        let events = client.take_events();
        assert!(events.contains(&ClientEvent::Kicked {
            reason: "bye".into()
        }));
        assert_eq!(events.last(), Some(&ClientEvent::Disconnected));
    }
}
