
use std::fmt;
use std::time::Duration;

use url::Url;

use super::settings::ConfigError;

pub const ENV_ENDPOINT: &str = "MILVUS_ENDPOINT";
pub const ENV_TOKEN: &str = "MILVUS_TOKEN";
pub const ENV_USERNAME: &str = "MILVUS_USERNAME";
pub const ENV_PASSWORD: &str = "MILVUS_PASSWORD";
pub const ENV_DATABASE: &str = "MILVUS_DATABASE";
pub const ENV_TIMEOUT: &str = "MILVUS_TIMEOUT_SECS";

pub const DEFAULT_DATABASE: &str = "default";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const MAX_TIMEOUT_SECONDS: u64 = 600;

/// Credentials accepted by the vector service
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Token(String),
    UserPassword { username: String, password: String },
}

impl Auth {
    /// Value sent in the `Authorization: Bearer ...` header
    #[inline]
    pub fn bearer(&self) -> String {
        match self {
            Self::Token(token) => token.clone(),
            Self::UserPassword { username, password } => format!("{}:{}", username, password),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Token(token) if token.trim().is_empty() => Err(ConfigError::MissingCredentials),
            Self::UserPassword { username, .. } if username.trim().is_empty() => {
                Err(ConfigError::IncompleteCredentials(ENV_PASSWORD))
            }
            Self::UserPassword { password, .. } if password.is_empty() => {
                Err(ConfigError::IncompleteCredentials(ENV_USERNAME))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Everything needed to reach one database on the vector service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub endpoint: Url,
    pub auth: Auth,
    pub database: String,
    pub timeout: Duration,
}

impl ConnectionConfig {
    /// Build a config for `endpoint` with the default database and timeout
    #[inline]
    pub fn new(endpoint: &str, auth: Auth) -> Result<Self, ConfigError> {
        let config = Self {
            endpoint: parse_endpoint(endpoint)?,
            auth,
            database: DEFAULT_DATABASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        };
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the connection settings from the process environment
    #[inline]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the connection settings through `lookup`, treating blank values as unset.
    ///
    /// A token takes precedence when both a token and a username/password pair are present.
    #[inline]
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let endpoint = read(ENV_ENDPOINT).ok_or(ConfigError::MissingEndpoint(ENV_ENDPOINT))?;

        let auth = match (read(ENV_TOKEN), read(ENV_USERNAME), read(ENV_PASSWORD)) {
            (Some(token), username, password) => {
                if username.is_some() || password.is_some() {
                    tracing::warn!(
                        "Both {} and username/password are set; using the token",
                        ENV_TOKEN
                    );
                }
                Auth::Token(token)
            }
            (None, Some(username), Some(password)) => Auth::UserPassword { username, password },
            (None, Some(_), None) => return Err(ConfigError::IncompleteCredentials(ENV_USERNAME)),
            (None, None, Some(_)) => return Err(ConfigError::IncompleteCredentials(ENV_PASSWORD)),
            (None, None, None) => return Err(ConfigError::MissingCredentials),
        };

        let mut config = Self::new(&endpoint, auth)?;

        if let Some(database) = read(ENV_DATABASE) {
            config.database = database;
        }

        if let Some(timeout) = read(ENV_TIMEOUT) {
            let seconds = timeout
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeoutValue(timeout.clone()))?;
            config.timeout = Duration::from_secs(seconds);
        }

        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheme = self.endpoint.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ConfigError::InvalidProtocol(scheme.to_string()));
        }

        self.auth.validate()?;

        if self.database.trim().is_empty() {
            return Err(ConfigError::InvalidDatabase(self.database.clone()));
        }

        let seconds = self.timeout.as_secs();
        if !(1..=MAX_TIMEOUT_SECONDS).contains(&seconds) {
            return Err(ConfigError::InvalidTimeout(seconds));
        }

        Ok(())
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(endpoint.trim())
        .map_err(|_| ConfigError::InvalidUrl(endpoint.to_string()))?;
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(endpoint.to_string()));
    }
    Ok(url)
}
