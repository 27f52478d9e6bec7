
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::VectorError;
use crate::search::{DEFAULT_OVERFETCH_FACTOR, DEFAULT_TENSOR_WEIGHT, DEFAULT_TOP_K};

const APP_DIR_NAME: &str = "product-vectors";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Defaults applied to searches issued from the command line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub top_k: usize,
    pub tensor_weight: f64,
    pub overfetch_factor: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            tensor_weight: DEFAULT_TENSOR_WEIGHT,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Missing vector service endpoint (set {0})")]
    MissingEndpoint(&'static str),
    #[error("Missing credentials: provide a token or both username and password")]
    MissingCredentials,
    #[error("Incomplete credentials: {0} is set but its counterpart is missing")]
    IncompleteCredentials(&'static str),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid database name: {0:?} (cannot be empty)")]
    InvalidDatabase(String),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid timeout: {0:?} is not a whole number of seconds")]
    InvalidTimeoutValue(String),
    #[error("Invalid top_k: {0} (must be between 1 and 16384)")]
    InvalidTopK(usize),
    #[error("Invalid tensor weight: {0} (must be between 0.0 and 1.0)")]
    InvalidTensorWeight(f64),
    #[error("Invalid overfetch factor: {0} (must be between 1 and 10)")]
    InvalidOverfetchFactor(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for VectorError {
    #[inline]
    fn from(error: ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl Settings {
    /// Default configuration directory (`$XDG_CONFIG_HOME/product-vectors` or the platform equivalent)
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                search: SearchSettings::default(),
                base_dir: config_dir.as_ref().to_path_buf(),
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        settings.base_dir = config_dir.as_ref().to_path_buf();

        settings
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(settings)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content =
            toml::to_string_pretty(self).context("Failed to serialize settings to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.search.validate()
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE_NAME)
    }
}

impl SearchSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=16384).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if !(0.0..=1.0).contains(&self.tensor_weight) {
            return Err(ConfigError::InvalidTensorWeight(self.tensor_weight));
        }

        if !(1..=10).contains(&self.overfetch_factor) {
            return Err(ConfigError::InvalidOverfetchFactor(self.overfetch_factor));
        }

        Ok(())
    }
}
