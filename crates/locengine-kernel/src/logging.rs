//! Tracing subscriber setup for hosts that do not install their own.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Installs a global fmt subscriber filtered by `config.directive`.
///
/// Returns `false` if a global subscriber was already set (including by an
/// earlier call); the existing one is left in place. An unparsable directive
/// falls back to `info`.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_new(&config.directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(fmt::layer().json().with_thread_names(true)).try_init()
    } else {
        registry.with(fmt::layer().with_thread_names(true)).try_init()
    };
    result.is_ok()
}
