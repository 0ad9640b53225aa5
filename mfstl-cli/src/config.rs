//! Configuration loading for the `mfstl` binary.

use std::path::Path;

use anyhow::{Context, Result};
use mfstl_core::ConverterConfig;

/// Read converter settings from a TOML file.
///
/// A missing file yields the defaults; keys absent from the file keep their
/// default values.
pub fn load_config(path: &Path) -> Result<ConverterConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(ConverterConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: ConverterConfig =
        toml::from_str(&contents).context("Failed to parse config file as TOML")?;
    Ok(config)
}
