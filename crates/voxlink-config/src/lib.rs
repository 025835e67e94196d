//! Configuration for voxlink hosts.
//!
//! Settings persist to disk as RON files. CLI flags parsed with clap
//! override what was loaded, and unknown or missing fields fall back to
//! defaults so older and newer files both load.

mod cli;
mod config;
mod error;
mod paths;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, NetworkConfig, PhysicsConfig, WorldConfig};
pub use error::ConfigError;
pub use paths::{APP_NAME, default_config_dir, default_data_dir};
