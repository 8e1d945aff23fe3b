//! Installs a global `tracing` subscriber honoring [`Config`]'s
//! `log_level`/`log_format` knobs.

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Installs a global subscriber. Safe to call once per process; a second
/// call is a silent no-op (matching `tracing`'s own `set_global_default`
/// contract of failing quietly rather than panicking test binaries that
/// initialize more than once).
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if let Err(err) = result {
        tracing::debug!(%err, "tracing subscriber already initialized");
    }
}
