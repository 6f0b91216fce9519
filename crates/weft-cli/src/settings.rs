//! Config file loading.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use weft_core::WeftConfig;

pub fn default_config_path() -> PathBuf {
    PathBuf::from("weft.toml")
}

/// Load and validate the config.
///
/// An explicit path must exist. Without one, `weft.toml` is used when
/// present and the built-in defaults otherwise.
pub fn load(explicit: Option<&Path>) -> Result<WeftConfig> {
    let config = match explicit {
        Some(path) => load_from_path(path)?,
        None => {
            let path = default_config_path();
            if path.exists() {
                load_from_path(&path)?
            } else {
                WeftConfig::default()
            }
        }
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

pub fn load_from_path(path: &Path) -> Result<WeftConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading config file at {path:?}"))?;
    parse(&contents).with_context(|| format!("parsing TOML config from {path:?}"))
}

fn parse(contents: &str) -> Result<WeftConfig> {
    Ok(toml::from_str(contents)?)
}
