//! Process-wide connection to the vector service.
//!
//! [`ConnectionProvider`] owns at most one [`MilvusClient`]. Components keep
//! an `Arc<ConnectionProvider>` and ask it for the client on every call, so a
//! `close()` or a re-initialization is visible to the next operation.


use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::milvus::MilvusClient;
use crate::{Result, VectorError};

static GLOBAL_PROVIDER: LazyLock<Arc<ConnectionProvider>> =
    LazyLock::new(|| Arc::new(ConnectionProvider::new()));

#[derive(Debug)]
struct Connection {
    config: ConnectionConfig,
    client: Arc<MilvusClient>,
}

/// Lazily-initialized, mutex-guarded connection handle
#[derive(Debug, Default)]
pub struct ConnectionProvider {
    state: Mutex<Option<Connection>>,
}

/// Result of a connectivity round trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionHealth {
    pub connected: bool,
    pub endpoint: Option<String>,
    pub database: Option<String>,
    pub version: Option<String>,
    pub error: Option<String>,
}

impl ConnectionHealth {
    fn disconnected(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            endpoint: None,
            database: None,
            version: None,
            error: Some(error.into()),
        }
    }
}

impl ConnectionProvider {
    /// An empty provider, independent of the global one
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// The provider shared by the whole process
    #[inline]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_PROVIDER)
    }

    /// Return the current client, creating it from `config` if none exists.
    ///
    /// Fails with [`VectorError::Configuration`] when no client exists and no
    /// config is given, and with [`VectorError::Conflict`] when a client exists
    /// for a different config.
    #[inline]
    pub fn get_client(&self, config: Option<&ConnectionConfig>) -> Result<Arc<MilvusClient>> {
        let mut state = self.lock();

        if let Some(existing) = state.as_ref() {
            return match config {
                Some(requested) if existing.config != *requested => {
                    Err(VectorError::Conflict(format!(
                        "A connection to {} (database '{}') is already open; close it before connecting with a different configuration",
                        existing.config.endpoint, existing.config.database
                    )))
                }
                _ => Ok(Arc::clone(&existing.client)),
            };
        }

        let Some(requested) = config else {
            return Err(VectorError::Configuration(
                "No connection has been initialized; a connection config is required".to_string(),
            ));
        };

        requested.validate()?;
        info!(
            "Connecting to vector service at {} (database '{}')",
            requested.endpoint, requested.database
        );
        let client = Arc::new(MilvusClient::new(requested));
        *state = Some(Connection {
            config: requested.clone(),
            client: Arc::clone(&client),
        });
        Ok(client)
    }

    /// The current client, without initializing one
    #[inline]
    pub fn client(&self) -> Result<Arc<MilvusClient>> {
        self.get_client(None)
    }

    /// Build the config from `MILVUS_*` environment variables and connect with it
    #[inline]
    pub fn initialize_from_environment(&self) -> Result<Arc<MilvusClient>> {
        let config = ConnectionConfig::from_env()?;
        debug!("Loaded connection settings for {}", config.endpoint);
        self.get_client(Some(&config))
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    #[inline]
    pub fn current_config(&self) -> Option<ConnectionConfig> {
        self.lock().as_ref().map(|c| c.config.clone())
    }

    /// Round trip to the service: server version, then database list. Never fails.
    #[inline]
    pub async fn check_health(&self) -> ConnectionHealth {
        let client = match self.client() {
            Ok(client) => client,
            Err(e) => return ConnectionHealth::disconnected(e.to_string()),
        };

        let mut health = ConnectionHealth {
            connected: false,
            endpoint: Some(client.endpoint().to_string()),
            database: Some(client.database().to_string()),
            version: None,
            error: None,
        };

        let round_trip = async {
            let version = client.server_version().await?;
            let databases = client.list_databases().await?;
            Ok::<_, VectorError>((version, databases))
        };

        match round_trip.await {
            Ok((version, databases)) => {
                if !databases.iter().any(|db| db == client.database()) {
                    warn!(
                        "Database '{}' not listed by service (found: {:?})",
                        client.database(),
                        databases
                    );
                }
                debug!("Vector service {} reachable", version);
                health.connected = true;
                health.version = Some(version);
            }
            Err(e) => {
                warn!("Vector service health check failed: {}", e);
                health.error = Some(e.to_string());
            }
        }

        health
    }

    /// Forget the current client. The next `get_client` needs a config again.
    #[inline]
    pub fn close(&self) {
        if self.lock().take().is_some() {
            info!("Closed vector service connection");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
