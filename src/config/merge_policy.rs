//! Merge rules: defaults applied before any file or environment source.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with the built-in defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default(
            "store.path",
            super::default_store_path().to_string_lossy().to_string(),
        )?
        .set_default("server.port", 8443)?
        .set_default("server.scheme", "https")?
        .set_default(
            "ingest.max_buffer_bytes",
            super::default_max_buffer_bytes() as i64,
        )?
        .set_default("sweep.interval_secs", 15)
}
