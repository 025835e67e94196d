//! Async driver for a [`Server`].
//!
//! One task owns the server and multiplexes transport events, the fixed
//! tick and a shutdown signal. Network I/O and chunk storage run in their
//! own tasks, so nothing here blocks.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use voxlink_wire::EventReceiver;

use crate::server::Server;

/// Runs the server until `shutdown` flips to `true` (or its sender is
/// dropped) or every transport event sender is gone.
///
/// On exit every peer is kicked and pending chunk saves are written. The
/// server is handed back for inspection.
pub async fn run_host(
    mut server: Server,
    mut events: EventReceiver,
    tick_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Server {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!("Host running, tick every {tick_interval:?}");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Some(event) => server.handle_transport_event(event, Instant::now()),
                None => {
                    tracing::info!("All transports closed");
                    break;
                }
            },
            _ = interval.tick() => server.tick(Instant::now()),
        }
    }

    let saved = server.shutdown("server shutting down").await;
    tracing::info!("Host stopped after {} ticks, {saved} chunks saved", server.ticks());
    server
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use voxlink_voxel::{BlockRegistry, BlockStateDef, BlockTypeDef, FlatGenerator, World};
    use voxlink_wire::{ConnectionId, Inbox, Message, TransportEvent, memory_connect};

    use crate::loader::ChunkLoader;
    use crate::server::ServerConfig;
    use crate::storage::MemoryStore;

    fn server() -> Server {
        let mut registry = BlockRegistry::new();
        registry.register(BlockTypeDef::air()).unwrap();
        registry
            .register(BlockTypeDef::new("stone", vec![BlockStateDef::solid("default")]))
            .unwrap();
        let world = World::new(registry.freeze().unwrap()).unwrap();
        let loader = ChunkLoader::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FlatGenerator::new(0, "stone#default", "stone#default")),
        );
        Server::new(world, loader, ServerConfig::default())
    }

    #[tokio::test]
    async fn test_host_stops_on_shutdown_and_kicks_peers() {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut client = memory_connect(&host_tx, ConnectionId(1), 64 * 1024);
        let host = tokio::spawn(run_host(
            server(),
            host_rx,
            Duration::from_millis(5),
            stop_rx,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(true).unwrap();
        let server = host.await.unwrap();
        assert_eq!(server.peer_count(), 0);
        assert!(server.ticks() > 0);

        let mut inbox = Inbox::new();
        let mut kicked = false;
        while let Ok(event) = client.events.try_recv() {
            if let TransportEvent::Data { bytes, .. } = event {
                kicked |= inbox
                    .receive(&bytes)
                    .unwrap()
                    .iter()
                    .any(|m| matches!(m, Message::Kick(_)));
            }
        }
        assert!(kicked);
    }

    #[tokio::test]
    async fn test_host_stops_when_transports_are_gone() {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        drop(host_tx);
        let server = run_host(server(), host_rx, Duration::from_millis(5), stop_rx).await;
        assert_eq!(server.peer_count(), 0);
    }
}
