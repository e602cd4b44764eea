//! This module contains various utility modules and helper functions.

pub mod log;

use crate::prelude::*;

/// Get the contents of a JSON configuration file.
pub fn read_config_file(path: &str) -> Result<serde_json::Value, Error> {
    let config_file = std::fs::read_to_string(path)
        .map_err(|err| anyhow!("Could not read configuration file: {}", err))?;
    Ok(serde_json::from_str(&config_file)?)
}
