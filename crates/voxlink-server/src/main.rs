//! Headless voxlink host.
//!
//! Loads `config.ron`, opens the world directory, preloads the chunks around
//! spawn and serves peers over TCP until interrupted.

mod blocks;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glam::Vec3;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use voxlink_config::{CliArgs, Config, ConfigError};
use voxlink_multiplayer::{
    ChunkLoader, DirStore, Server, ServerConfig, StoreError, WorldDescriptor,
    load_or_create_descriptor, run_host,
};
use voxlink_voxel::{BlockRegistryError, ChunkCoord, FlatGenerator, World, WorldError};
use voxlink_wire::{FrameConfig, TcpAcceptor};

#[derive(Debug, thiserror::Error)]
enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] BlockRegistryError),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("unknown block {0:?} in world config")]
    UnknownBlock(String),
    #[error("invalid bind address {0:?}")]
    BindAddress(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config_dir = match args.config.clone() {
        Some(dir) => dir,
        None => match voxlink_config::default_config_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("{e}, using ./voxlink");
                PathBuf::from(voxlink_config::APP_NAME)
            }
        },
    };

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    voxlink_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = run(config).await {
        error!("Host failed: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), HostError> {
    let world_dir = match &config.world.data_dir {
        Some(dir) => dir.clone(),
        None => voxlink_config::default_data_dir()?
            .join("worlds")
            .join(&config.world.name),
    };
    info!("World directory: {}", world_dir.display());
    let store = Arc::new(DirStore::new(world_dir));

    let descriptor = load_or_create_descriptor(
        store.as_ref(),
        WorldDescriptor::new(&config.world.name, config.world.seed, config.world.spawn),
    )
    .await?;
    info!(
        "World {:?}, seed {}, format v{}",
        descriptor.name, descriptor.seed, descriptor.format_version
    );

    let table = blocks::builtin_table()?;
    for key in [&config.world.fill_block, &config.world.surface_block] {
        if table.memo_id(key).is_none() {
            return Err(HostError::UnknownBlock(key.clone()));
        }
    }
    let world = World::new(table)?;
    let generator = FlatGenerator::new(
        config.world.flat_height,
        config.world.fill_block.clone(),
        config.world.surface_block.clone(),
    );
    let loader = ChunkLoader::new(store, Arc::new(generator));

    let spawn = Vec3::from_array(descriptor.spawn);
    let mut server = Server::new(world, loader, server_config(&config, spawn));
    let preloading = preload_around(&mut server, spawn, config.world.preload_radius);
    info!("Preloading {preloading} chunks around spawn {spawn}");

    let addr: SocketAddr = format!("{}:{}", config.network.bind_address, config.network.port)
        .parse()
        .map_err(|_| HostError::BindAddress(config.network.bind_address.clone()))?;
    let listener = TcpListener::bind(addr).await?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let acceptor = Arc::new(TcpAcceptor::new(FrameConfig {
        max_payload_size: config.network.max_payload_size,
    }));
    let accept_task = {
        let acceptor = Arc::clone(&acceptor);
        tokio::spawn(async move {
            if let Err(e) = acceptor.run(listener, events_tx).await {
                warn!("Accept loop stopped: {e}");
            }
        })
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => warn!("Cannot listen for interrupts: {e}"),
        }
        let _ = stop_tx.send(true);
    });

    let tick = Duration::from_secs_f32(config.tick_interval_seconds());
    let server = run_host(server, events_rx, tick, stop_rx).await;

    acceptor.shutdown();
    let _ = accept_task.await;
    info!("Host exited with {} chunks loaded", server.world().chunk_count());
    Ok(())
}

fn server_config(config: &Config, spawn: Vec3) -> ServerConfig {
    let network = &config.network;
    ServerConfig {
        spawn_position: spawn,
        player_half_extents: Vec3::from_array(config.physics.player_half_extents),
        max_move_distance: config.physics.max_move_distance,
        dirty_chunks_per_tick: config.world.dirty_chunks_per_tick,
        ping_interval: Duration::from_secs_f32(network.ping_interval_seconds.max(0.1)),
        ping_timeout: Duration::from_secs_f32(network.ping_timeout_seconds.max(0.1)),
        max_missed_pings: network.max_missed_pings,
        max_protocol_errors: network.max_protocol_errors,
        auth_token: network.auth_token.clone(),
    }
}

/// Requests every chunk within `radius` of the spawn chunk. Returns how many
/// loads were started.
fn preload_around(server: &mut Server, spawn: Vec3, radius: u32) -> usize {
    let center = ChunkCoord::of_position(spawn);
    let r = radius as i32;
    let mut started = 0;
    for dy in -r..=r {
        for dz in -r..=r {
            for dx in -r..=r {
                if server.preload(center.offset(dx, dy, dz)) {
                    started += 1;
                }
            }
        }
    }
    started
}
