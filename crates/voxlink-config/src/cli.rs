//! Command-line argument parsing for the voxlink host.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// voxlink host command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "voxlink-server", about = "Headless voxlink host")]
pub struct CliArgs {
    /// Address to listen on.
    #[arg(long)]
    pub bind: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Simulation ticks per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Directory holding the world's chunks.
    #[arg(long)]
    pub world_dir: Option<PathBuf>,

    /// World seed for newly created worlds.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Token peers must present when identifying.
    #[arg(long)]
    pub auth_token: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.bind {
            self.network.bind_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(rate) = args.tick_rate {
            self.network.tick_rate = rate;
        }
        if let Some(ref dir) = args.world_dir {
            self.world.data_dir = Some(dir.clone());
        }
        if let Some(seed) = args.seed {
            self.world.seed = seed;
        }
        if let Some(ref token) = args.auth_token {
            self.network.auth_token = Some(token.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            port: Some(9001),
            world_dir: Some(PathBuf::from("/tmp/world")),
            log_level: Some("trace".to_string()),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.port, 9001);
        assert_eq!(config.world.data_dir, Some(PathBuf::from("/tmp/world")));
        assert_eq!(config.debug.log_level, "trace");
        // Non-overridden fields retain defaults
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.world.seed, 0);
    }

    #[test]
    fn test_cli_no_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "voxlink-server",
            "--port",
            "8000",
            "--auth-token",
            "abc",
            "--tick-rate",
            "30",
        ]);
        assert_eq!(args.port, Some(8000));
        assert_eq!(args.auth_token.as_deref(), Some("abc"));
        assert_eq!(args.tick_rate, Some(30));
        assert!(args.config.is_none());
    }
}
