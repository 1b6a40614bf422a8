use etl_config::shared::BridgeConfig;
use etl_config::{Environment, load_config, load_config_from};
use std::path::Path;

use crate::error::{BridgeError, BridgeResult};

/// Loads and validates the bridge configuration.
///
/// Reads from `directory` when given, otherwise from `./configuration`.
pub fn load_bridge_config(directory: Option<&Path>) -> BridgeResult<BridgeConfig> {
    let config = match directory {
        Some(directory) => {
            let environment = Environment::load().map_err(BridgeError::config)?;
            load_config_from::<BridgeConfig>(directory, environment)
        }
        None => load_config::<BridgeConfig>(),
    }
    .map_err(BridgeError::config)?;

    config.validate().map_err(BridgeError::config)?;

    Ok(config)
}
