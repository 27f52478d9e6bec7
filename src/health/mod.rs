//! Connection and collection health reporting.
//!
//! Nothing here returns an error: every failure is captured in the report.


use std::fmt::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::connection::{ConnectionHealth, ConnectionProvider};
use crate::milvus::{LoadState, MilvusClient};
use crate::schema::CollectionKind;

/// State of a single collection as seen by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionHealth {
    pub name: String,
    pub exists: bool,
    pub load_state: Option<LoadState>,
    pub row_count: Option<u64>,
    pub error: Option<String>,
}

impl CollectionHealth {
    fn unavailable(name: &str, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            exists: false,
            load_state: None,
            row_count: None,
            error: Some(error.into()),
        }
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.exists && self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Connected, and every collection in `collections` exists without error
    pub healthy: bool,
    pub connection: ConnectionHealth,
    pub collections: Vec<CollectionHealth>,
    pub checked_at: DateTime<Utc>,
}

/// Every collection in the configured database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub connection: ConnectionHealth,
    pub collections: Vec<CollectionHealth>,
    /// Set when the collection list itself could not be fetched
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HealthChecker {
    provider: Arc<ConnectionProvider>,
}

impl HealthChecker {
    #[inline]
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Connection health plus the state of both product collections
    #[inline]
    pub async fn perform_health_check(&self) -> HealthReport {
        let connection = self.provider.check_health().await;

        let collections = match self.connected_client(&connection) {
            Ok(client) => {
                let mut collections = Vec::with_capacity(CollectionKind::ALL.len());
                for kind in CollectionKind::ALL {
                    collections.push(collection_health(&client, kind.name()).await);
                }
                collections
            }
            Err(reason) => CollectionKind::ALL
                .iter()
                .map(|kind| CollectionHealth::unavailable(kind.name(), reason.clone()))
                .collect(),
        };

        let healthy = connection.connected && collections.iter().all(CollectionHealth::is_healthy);
        if !healthy {
            warn!("Vector service health check reported problems");
        }

        HealthReport {
            healthy,
            connection,
            collections,
            checked_at: Utc::now(),
        }
    }

    /// Row count and load state of every collection the service lists
    #[inline]
    pub async fn get_diagnostics(&self) -> Diagnostics {
        let connection = self.provider.check_health().await;

        let (collections, error) = match self.connected_client(&connection) {
            Ok(client) => match client.list_collections().await {
                Ok(mut names) => {
                    names.sort();
                    debug!("Collecting diagnostics for {} collections", names.len());
                    let mut collections = Vec::with_capacity(names.len());
                    for name in &names {
                        collections.push(collection_health(&client, name).await);
                    }
                    (collections, None)
                }
                Err(e) => {
                    warn!("Failed to list collections: {}", e);
                    (Vec::new(), Some(e.to_string()))
                }
            },
            Err(reason) => (Vec::new(), Some(reason)),
        };

        Diagnostics {
            connection,
            collections,
            error,
            checked_at: Utc::now(),
        }
    }

    fn connected_client(
        &self,
        connection: &ConnectionHealth,
    ) -> std::result::Result<Arc<MilvusClient>, String> {
        if !connection.connected {
            return Err(connection
                .error
                .clone()
                .unwrap_or_else(|| "not connected".to_string()));
        }
        self.provider.client().map_err(|e| e.to_string())
    }
}

async fn collection_health(client: &MilvusClient, name: &str) -> CollectionHealth {
    let exists = match client.has_collection(name).await {
        Ok(exists) => exists,
        Err(e) => return CollectionHealth::unavailable(name, e.to_string()),
    };

    let mut health = CollectionHealth {
        name: name.to_string(),
        exists,
        load_state: None,
        row_count: None,
        error: None,
    };
    if !exists {
        return health;
    }

    let mut errors = Vec::new();
    match client.load_state(name).await {
        Ok(state) => health.load_state = Some(state),
        Err(e) => errors.push(format!("load state: {}", e)),
    }
    match client.row_count(name).await {
        Ok(rows) => health.row_count = Some(rows),
        Err(e) => errors.push(format!("row count: {}", e)),
    }
    if !errors.is_empty() {
        health.error = Some(errors.join("; "));
    }

    health
}

/// Human-readable rendering of a [`HealthReport`]
#[inline]
pub fn format_health_report(report: &HealthReport) -> String {
    let mut out = String::new();
    let status = if report.healthy { "HEALTHY" } else { "UNHEALTHY" };

    let _ = writeln!(out, "Vector service: {}", status);
    let _ = writeln!(
        out,
        "Checked at: {}",
        report.checked_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    write_connection(&mut out, &report.connection);

    let _ = writeln!(out);
    let _ = writeln!(out, "Collections:");
    for collection in &report.collections {
        write_collection(&mut out, collection);
    }

    out
}

/// Human-readable rendering of [`Diagnostics`]
#[inline]
pub fn format_diagnostics(diagnostics: &Diagnostics) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Diagnostics at {}",
        diagnostics.checked_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    write_connection(&mut out, &diagnostics.connection);

    let _ = writeln!(out);
    if let Some(error) = &diagnostics.error {
        let _ = writeln!(out, "Collections unavailable: {}", error);
    } else if diagnostics.collections.is_empty() {
        let _ = writeln!(out, "No collections in this database.");
    } else {
        let _ = writeln!(out, "Collections ({}):", diagnostics.collections.len());
        for collection in &diagnostics.collections {
            write_collection(&mut out, collection);
        }
    }

    out
}

fn write_connection(out: &mut String, connection: &ConnectionHealth) {
    let state = if connection.connected {
        "connected"
    } else {
        "disconnected"
    };
    let _ = writeln!(out, "Connection: {}", state);
    if let Some(endpoint) = &connection.endpoint {
        let _ = writeln!(out, "  Endpoint: {}", endpoint);
    }
    if let Some(database) = &connection.database {
        let _ = writeln!(out, "  Database: {}", database);
    }
    if let Some(version) = &connection.version {
        let _ = writeln!(out, "  Server version: {}", version);
    }
    if let Some(error) = &connection.error {
        let _ = writeln!(out, "  Error: {}", error);
    }
}

fn write_collection(out: &mut String, collection: &CollectionHealth) {
    if !collection.exists {
        let _ = writeln!(out, "  {}: missing", collection.name);
    } else {
        let load_state = collection
            .load_state
            .map_or_else(|| "load state unknown".to_string(), |s| s.to_string());
        let rows = collection
            .row_count
            .map_or_else(|| "? rows".to_string(), |n| format!("{} rows", n));
        let _ = writeln!(out, "  {}: {}, {}", collection.name, load_state, rows);
    }
    if let Some(error) = &collection.error {
        let _ = writeln!(out, "    Error: {}", error);
    }
}
