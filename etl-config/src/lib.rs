//! Configuration for the change-stream to warehouse bridge.
//!
//! Provides layered configuration loading ([`load_config`]), runtime environment detection
//! ([`Environment`]), and the shared configuration types consumed by the bridge binary and
//! the `etl` library.

mod environment;
mod load;
pub mod shared;

pub use environment::{Environment, UnsupportedEnvironment};
pub use load::{Config, LoadConfigError, load_config, load_config_from};
