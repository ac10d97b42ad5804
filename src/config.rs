// src/config.rs

//! Configuration loading for the entry points.
//!
//! A config file is optional: without one the defaults apply. Environment
//! overrides are applied last, then the result is validated.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Load, override from the environment, and validate.
///
/// A missing file falls back to defaults; a malformed one is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) if path.exists() => {
            log::info!("Loading configuration from {}", path.display());
            Config::load(path)
                .map_err(|e| AppError::config(format!("{}: {}", path.display(), e)))?
        }
        Some(path) => {
            log::warn!("No configuration at {}, using defaults", path.display());
            Config::default()
        }
        None => Config::default(),
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}
