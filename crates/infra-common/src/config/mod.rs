//! Layered configuration loading.
//!
//! Sources are applied in order, later ones overriding earlier ones:
//! struct defaults (via `#[serde(default)]`), an optional TOML/JSON/YAML file,
//! then environment variables `<PREFIX>_<KEY>` with `__` separating nested keys
//! (`DEVASSOC_SIM__POLL_INTERVAL_MS=250`).

use crate::errors::types::{Error, Result};
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a configuration struct from an optional file plus environment overrides.
pub fn load_layered<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> Result<T> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(File::from(path.to_path_buf()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder.build()?;
    let value = settings.try_deserialize::<T>()?;
    tracing::debug!(
        "Loaded configuration (file: {}, env prefix: {})",
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string()),
        env_prefix
    );
    Ok(value)
}
