pub mod config;
pub mod countdown;
pub mod reward;
pub mod simulate;

use manifestos_core::Config;
use std::path::Path;

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    })
}
