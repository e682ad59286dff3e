//! Engine configuration: types, defaults, and INI file reading.

mod read_config;
mod types;

pub use read_config::{read_config, ConfigError, ConfigSource};
pub use types::{CacheConfig, EngineConfig, RelaysConfig, SourcesConfig, TimeoutsConfig};
