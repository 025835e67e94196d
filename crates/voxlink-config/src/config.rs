//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub world: WorldConfig,
    pub physics: PhysicsConfig,
    pub debug: DebugConfig,
}

/// Listener, heartbeat and protocol limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the host listens on.
    pub bind_address: String,
    pub port: u16,
    /// Largest frame accepted from the TCP transport, in bytes.
    pub max_payload_size: u32,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    pub ping_interval_seconds: f32,
    pub ping_timeout_seconds: f32,
    /// Unanswered pings in a row before a peer is kicked.
    pub max_missed_pings: u32,
    /// Undecodable messages in a row before a peer is kicked.
    pub max_protocol_errors: u32,
    /// Shared secret peers must present in their identity, if set.
    pub auth_token: Option<String>,
}

/// World storage, generation and authority limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    pub name: String,
    /// Where chunks are stored. `None` uses the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub seed: u64,
    /// Cells below this height are solid in freshly generated chunks.
    pub flat_height: i32,
    pub fill_block: String,
    pub surface_block: String,
    pub spawn: [f32; 3],
    /// Chunks around spawn loaded before the first peer connects.
    pub preload_radius: u32,
    pub dirty_chunks_per_tick: usize,
}

/// Limits the host enforces on player bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Half size of the player hitbox in cells.
    pub player_half_extents: [f32; 3],
    /// Longest distance a player may claim to move in one update.
    pub max_move_distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Also write JSON logs to disk in debug builds.
    pub log_to_file: bool,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7777,
            max_payload_size: 1_048_576,
            tick_rate: 20,
            ping_interval_seconds: 5.0,
            ping_timeout_seconds: 10.0,
            max_missed_pings: 3,
            max_protocol_errors: 5,
            auth_token: None,
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: "world".to_string(),
            data_dir: None,
            seed: 0,
            flat_height: 64,
            fill_block: "stone#default".to_string(),
            surface_block: "grass#default".to_string(),
            spawn: [0.5, 65.0, 0.5],
            preload_radius: 1,
            dirty_chunks_per_tick: 16,
        }
    }
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            player_half_extents: [0.3, 0.9, 0.3],
            max_move_distance: 10.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: true,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        let write_error = |source: std::io::Error| ConfigError::Write {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(config_dir).map_err(write_error)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty)?;

        std::fs::write(&path, serialized).map_err(write_error)
    }

    /// Re-reads the file: `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Seconds between ticks. A zero tick rate counts as one per second.
    pub fn tick_interval_seconds(&self) -> f32 {
        1.0 / self.network.tick_rate.max(1) as f32
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
