//! Structured logging for voxlink binaries.
//!
//! Installs a `tracing` subscriber with an env-driven filter, a console layer
//! with uptime timestamps and, in debug builds, a JSON file layer for
//! post-mortem analysis. The level can come from `RUST_LOG` or from
//! [`voxlink_config::DebugConfig::log_level`].

use std::fs::File;
use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use voxlink_config::Config;

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log written in debug builds.
pub const LOG_FILE_NAME: &str = "voxlink.log";

/// Initialize the global tracing subscriber.
///
/// * `log_dir` - directory for the JSON log file (debug builds only)
/// * `debug_build` - whether file logging is enabled at all
/// * `config` - source of the fallback log level
///
/// ```no_run
/// use voxlink_config::Config;
/// use voxlink_log::init_logging;
///
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    let to_file = config.is_none_or(|c| c.debug.log_to_file);
    if debug_build
        && to_file
        && let Some(log_dir) = log_dir
        && let Some(log_file) = open_log_file(log_dir)
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        tracing::debug!("JSON log at {}", log_dir.join(LOG_FILE_NAME).display());
        return;
    }

    subscriber.init();
}

/// The filter string taken from `config`, or [`DEFAULT_FILTER`].
pub fn filter_directives(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.trim().is_empty() => {
            config.debug.log_level.clone()
        }
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Creates `log_dir` and truncates the log file inside it.
pub fn open_log_file(log_dir: &Path) -> Option<File> {
    std::fs::create_dir_all(log_dir).ok()?;
    File::create(log_dir.join(LOG_FILE_NAME)).ok()
}
