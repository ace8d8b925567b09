pub mod check;
pub mod clients;
pub mod list;
pub mod run;

use std::path::Path;

use anyi_config::AnyiConfig;

/// Load the configuration from `path`, or from the default locations.
pub fn load_config(path: Option<&Path>) -> Result<AnyiConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AnyiConfig::load_from(path),
        None => AnyiConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}
