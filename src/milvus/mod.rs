//! Milvus REST v2 client
//!
//! Thin async wrapper over the service's HTTP API. Every call is a single
//! `POST` with a JSON body; the blocking `ureq` request runs on tokio's
//! blocking pool so independent calls can proceed concurrently.
//!
//! The client never retries. Request deadlines come from the timeout in
//! [`ConnectionConfig`].


mod wire;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::config::{Auth, ConnectionConfig};
use crate::schema::{CollectionSchema, IndexSpec, MetricType};
use crate::{Result, VectorError};
use wire::{
    CollectionRequest, CreateCollectionRequest, CreateIndexRequest, DatabaseRequest,
    DeleteRequest, Envelope, HasData, IndexBody, InsertData, InsertRequest, LoadStateData,
    SearchEfBody, SearchParamsBody, SearchRequest, StatsData, VersionData, count_from_value,
    id_to_string,
};

const VERSION_PATH: &str = "/v2/vectordb/server/version";
const LIST_DATABASES_PATH: &str = "/v2/vectordb/databases/list";
const HAS_COLLECTION_PATH: &str = "/v2/vectordb/collections/has";
const CREATE_COLLECTION_PATH: &str = "/v2/vectordb/collections/create";
const DROP_COLLECTION_PATH: &str = "/v2/vectordb/collections/drop";
const LIST_COLLECTIONS_PATH: &str = "/v2/vectordb/collections/list";
const LOAD_COLLECTION_PATH: &str = "/v2/vectordb/collections/load";
const RELEASE_COLLECTION_PATH: &str = "/v2/vectordb/collections/release";
const LOAD_STATE_PATH: &str = "/v2/vectordb/collections/get_load_state";
const STATS_PATH: &str = "/v2/vectordb/collections/get_stats";
const CREATE_INDEX_PATH: &str = "/v2/vectordb/indexes/create";
const INSERT_PATH: &str = "/v2/vectordb/entities/insert";
const DELETE_PATH: &str = "/v2/vectordb/entities/delete";
const SEARCH_PATH: &str = "/v2/vectordb/entities/search";

/// A filter expression in the service's native syntax, e.g. `product_id == "42"`.
///
/// The string is passed through to the service untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterExpr(String);

impl FilterExpr {
    #[inline]
    pub fn new(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    /// `product_id == "<id>"` with quotes and backslashes in `product_id` escaped
    #[inline]
    pub fn product_id_eq(product_id: &str) -> Self {
        Self::field_eq("product_id", product_id)
    }

    /// `<field> == "<value>"` with quotes and backslashes in `value` escaped
    #[inline]
    pub fn field_eq(field: &str, value: &str) -> Self {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        Self(format!("{} == \"{}\"", field, escaped))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FilterExpr {
    #[inline]
    fn from(expr: &str) -> Self {
        Self::new(expr)
    }
}

impl From<String> for FilterExpr {
    #[inline]
    fn from(expr: String) -> Self {
        Self(expr)
    }
}

/// Whether a collection is resident in the service's query memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    NotExist,
    NotLoad,
    Loading,
    Loaded,
    Unknown,
}

impl LoadState {
    fn from_wire(state: &str) -> Self {
        match state {
            "LoadStateNotExist" => Self::NotExist,
            "LoadStateNotLoad" => Self::NotLoad,
            "LoadStateLoading" => Self::Loading,
            "LoadStateLoaded" => Self::Loaded,
            other => {
                warn!("Unrecognized load state reported by service: {}", other);
                Self::Unknown
            }
        }
    }

    #[inline]
    pub fn is_loaded(self) -> bool {
        self == Self::Loaded
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotExist => "not exist",
            Self::NotLoad => "not loaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// One row returned by a similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: String,
    /// Similarity reported by the service; for COSINE, higher is better
    pub score: f64,
    pub fields: Map<String, Value>,
}

/// Parameters for a single top-K query against one collection
#[derive(Debug, Clone)]
pub struct VectorQuery<'a> {
    pub collection: &'a str,
    pub vector_field: &'a str,
    pub vector: &'a [f32],
    pub limit: usize,
    pub filter: Option<&'a FilterExpr>,
    pub output_fields: Option<&'a [String]>,
    pub metric: MetricType,
    pub ef: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub insert_count: u64,
    pub ids: Vec<String>,
}

#[derive(Clone)]
pub struct MilvusClient {
    base_url: Url,
    database: String,
    auth: Auth,
    agent: ureq::Agent,
}

impl fmt::Debug for MilvusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MilvusClient")
            .field("base_url", &self.base_url.as_str())
            .field("database", &self.database)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl MilvusClient {
    /// Build a client for `config`. No request is made until the first call.
    ///
    /// API paths are resolved below the endpoint, so a gateway prefix such as
    /// `https://gw.example.com/milvus` is kept.
    #[inline]
    pub fn new(config: &ConnectionConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .build()
            .into();

        let mut base_url = config.endpoint.clone();
        if !base_url.path().ends_with('/') {
            let prefixed = format!("{}/", base_url.path());
            base_url.set_path(&prefixed);
        }

        Self {
            base_url,
            database: config.database.clone(),
            auth: config.auth.clone(),
            agent,
        }
    }

    #[inline]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub async fn server_version(&self) -> Result<String> {
        let data: VersionData = self
            .post_required(VERSION_PATH, &DatabaseRequest { db_name: &self.database })
            .await?;
        Ok(data.version)
    }

    #[inline]
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        let data: Option<Vec<String>> = self
            .post(LIST_DATABASES_PATH, &DatabaseRequest { db_name: &self.database })
            .await?;
        Ok(data.unwrap_or_default())
    }

    #[inline]
    pub async fn has_collection(&self, collection: &str) -> Result<bool> {
        let data: HasData = self
            .post_required(HAS_COLLECTION_PATH, &self.collection_request(collection))
            .await?;
        Ok(data.has)
    }

    #[inline]
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let data: Option<Vec<String>> = self
            .post(LIST_COLLECTIONS_PATH, &DatabaseRequest { db_name: &self.database })
            .await?;
        Ok(data.unwrap_or_default())
    }

    /// Declare a collection's fields. The vector index is built separately with [`Self::create_index`].
    #[inline]
    pub async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let request = CreateCollectionRequest {
            db_name: &self.database,
            collection_name: &schema.name,
            schema: schema.into(),
        };
        self.post_unit(CREATE_COLLECTION_PATH, &request).await
    }

    #[inline]
    pub async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        let request = CreateIndexRequest {
            db_name: &self.database,
            collection_name: collection,
            index_params: vec![IndexBody::from(index)],
        };
        self.post_unit(CREATE_INDEX_PATH, &request).await
    }

    #[inline]
    pub async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.post_unit(DROP_COLLECTION_PATH, &self.collection_request(collection))
            .await
    }

    #[inline]
    pub async fn load_collection(&self, collection: &str) -> Result<()> {
        self.post_unit(LOAD_COLLECTION_PATH, &self.collection_request(collection))
            .await
    }

    #[inline]
    pub async fn release_collection(&self, collection: &str) -> Result<()> {
        self.post_unit(RELEASE_COLLECTION_PATH, &self.collection_request(collection))
            .await
    }

    #[inline]
    pub async fn load_state(&self, collection: &str) -> Result<LoadState> {
        let data: LoadStateData = self
            .post_required(LOAD_STATE_PATH, &self.collection_request(collection))
            .await?;
        Ok(LoadState::from_wire(&data.load_state))
    }

    #[inline]
    pub async fn row_count(&self, collection: &str) -> Result<u64> {
        let data: StatsData = self
            .post_required(STATS_PATH, &self.collection_request(collection))
            .await?;
        count_from_value(&data.row_count).ok_or_else(|| {
            VectorError::Transport(format!(
                "Unexpected row count in stats response: {}",
                data.row_count
            ))
        })
    }

    /// Insert pre-built rows in one request
    #[inline]
    pub async fn insert(&self, collection: &str, rows: &[Value]) -> Result<InsertOutcome> {
        let request = InsertRequest {
            db_name: &self.database,
            collection_name: collection,
            data: rows,
        };
        let data: InsertData = self.post(INSERT_PATH, &request).await?.unwrap_or_default();
        Ok(InsertOutcome {
            insert_count: data.insert_count,
            ids: data.insert_ids.iter().map(id_to_string).collect(),
        })
    }

    #[inline]
    pub async fn delete(&self, collection: &str, filter: &FilterExpr) -> Result<()> {
        let request = DeleteRequest {
            db_name: &self.database,
            collection_name: collection,
            filter: filter.as_str(),
        };
        self.post_unit(DELETE_PATH, &request).await
    }

    /// Top-K similarity search. Results come back in the service's order (best first).
    #[inline]
    pub async fn search(&self, query: &VectorQuery<'_>) -> Result<Vec<SearchResult>> {
        let request = SearchRequest {
            db_name: &self.database,
            collection_name: query.collection,
            data: [query.vector],
            anns_field: query.vector_field,
            limit: query.limit,
            filter: query.filter.map(FilterExpr::as_str),
            output_fields: query.output_fields,
            search_params: SearchParamsBody {
                metric_type: query.metric.as_str(),
                params: SearchEfBody {
                    ef: query.ef.max(query.limit),
                },
            },
        };

        let rows: Vec<Map<String, Value>> =
            self.post(SEARCH_PATH, &request).await?.unwrap_or_default();

        rows.into_iter().map(search_result_from_row).collect()
    }

    fn collection_request<'a>(&'a self, collection: &'a str) -> CollectionRequest<'a> {
        CollectionRequest {
            db_name: &self.database,
            collection_name: collection,
        }
    }

    async fn post_unit<B: Serialize>(&self, path: &'static str, body: &B) -> Result<()> {
        let _: Option<Value> = self.post(path, body).await?;
        Ok(())
    }

    async fn post_required<B, T>(&self, path: &'static str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        self.post(path, body).await?.ok_or_else(|| {
            VectorError::Transport(format!("Response from {} carried no data", path))
        })
    }

    async fn post<B, T>(&self, path: &'static str, body: &B) -> Result<Option<T>>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| VectorError::Configuration(format!("Failed to build URL: {}", e)))?;
        let payload = serde_json::to_string(body)?;
        let authorization = format!("Bearer {}", self.auth.bearer());
        let agent = self.agent.clone();

        debug!("POST {} ({} bytes)", url, payload.len());

        let response_text = tokio::task::spawn_blocking(move || {
            agent
                .post(url.as_str())
                .header("Authorization", &authorization)
                .header("Content-Type", "application/json")
                .send(&payload)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .await
        .map_err(|e| VectorError::Transport(format!("Request task for {} failed: {}", path, e)))?
        .map_err(|e| transport_error(path, &e))?;

        let envelope: Envelope<T> = serde_json::from_str(&response_text)?;
        envelope.into_data().inspect_err(|e| {
            warn!("Vector service rejected {}: {}", path, e);
        })
    }
}

fn transport_error(path: &str, error: &ureq::Error) -> VectorError {
    let message = match error {
        ureq::Error::StatusCode(status) => format!("HTTP {} from {}", status, path),
        ureq::Error::Timeout(_) => format!("Request to {} timed out", path),
        other => format!("Request to {} failed: {}", path, other),
    };
    warn!("{}", message);
    VectorError::Transport(message)
}

fn search_result_from_row(mut row: Map<String, Value>) -> Result<SearchResult> {
    let id = row
        .remove("id")
        .map(|id| id_to_string(&id))
        .ok_or_else(|| VectorError::Transport("Search hit is missing its id".to_string()))?;
    let score = row
        .remove("distance")
        .and_then(|d| d.as_f64())
        .ok_or_else(|| {
            VectorError::Transport(format!("Search hit '{}' is missing its distance", id))
        })?;

    Ok(SearchResult {
        id,
        score,
        fields: row,
    })
}
