//! `tracing` subscriber setup
//!
//! The library only emits events; installing a subscriber is left to the
//! host. [`init_logging`] is a convenience for hosts that have none.

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

static INIT: Once = Once::new();

/// Map a config level name to a `tracing` level. Unknown names fall back to INFO.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a global fmt subscriber once. `RUST_LOG` directives are honoured
/// on top of the configured level. Later calls, or a subscriber installed
/// elsewhere, leave things as they are.
pub fn init_logging(config: &LogConfig) {
    let level = parse_level(&config.level);
    let json = config.json;

    INIT.call_once(|| {
        let filter = EnvFilter::from_default_env().add_directive(level.into());
        let installed = if json {
            tracing_subscriber::fmt()
                .json()
                .with_target(true)
                .with_env_filter(filter)
                .try_init()
        } else {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .try_init()
        };
        if installed.is_ok() {
            tracing::info!(level = %level, json, "logging initialized");
        }
    });
}
