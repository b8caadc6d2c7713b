//! Configuration loading and validation.

mod schema;

pub use schema::{AuditorConfig, Config, IdentityConfig, MSAN_ENV};

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

fn parse_file(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })?;
    // Duplicates inside a single file are an error even if a later merge
    // would hide them.
    config.baseline_index()?;
    Ok(config)
}

/// Load configuration from a TOML file.
/// This starts from the compiled-in baseline, merges default.toml from the
/// same directory if present, then merges the given file on top.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::default();

    if let Some(parent) = path.parent() {
        let default_path = parent.join("default.toml");
        if default_path.exists() && default_path != path {
            config.merge(parse_file(&default_path)?);
            tracing::info!("Loaded default config from {}", default_path.display());
        }
    }

    config.merge(parse_file(path)?);
    tracing::info!("Loaded config from {}", path.display());

    config.validate()?;
    Ok(config)
}

/// Load the config at `path`, or the compiled-in defaults when the file is
/// absent and no path was requested explicitly.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => {
            let path = default_config_path();
            if path.exists() {
                load_config(&path)
            } else {
                tracing::debug!(
                    "No config at {}, using built-in baseline",
                    path.display()
                );
                Ok(Config::default())
            }
        }
    }
}

/// Parse a standalone configuration. Compiled-in defaults are not applied.
pub fn load_config_str(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).map_err(|e| Error::ConfigParse {
        path: PathBuf::from("<string>"),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Get the default configuration path.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/sandbox-audit/config.toml")
}
