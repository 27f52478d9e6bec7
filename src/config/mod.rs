// Configuration management module
// Connection settings come from the environment, search defaults from a TOML file

pub mod connection;
pub mod settings;


pub use connection::{
    Auth, ConnectionConfig, DEFAULT_DATABASE, DEFAULT_TIMEOUT_SECONDS, ENV_DATABASE, ENV_ENDPOINT,
    ENV_PASSWORD, ENV_TIMEOUT, ENV_TOKEN, ENV_USERNAME,
};
pub use settings::{ConfigError, SearchSettings, Settings};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Settings::config_dir()
}
