//! Collection layouts and the manager that creates them on the vector service.
//!
//! Two collections are fixed by the product catalogue:
//!
//! * `product_tensors`: one 13-dimensional knowledge-graph tensor per product
//! * `product_embeddings`: up to three 792-dimensional text embeddings per
//!   product, one per [`TextSource`](crate::ingest::TextSource)
//!
//! Field names are part of the wire contract with the service and must not change.

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connection::ConnectionProvider;
use crate::milvus::LoadState;
use crate::{Result, VectorError};

pub const TENSOR_COLLECTION: &str = "product_tensors";
pub const EMBEDDING_COLLECTION: &str = "product_embeddings";

pub const TENSOR_DIMENSION: usize = 13;
pub const EMBEDDING_DIMENSION: usize = 792;

pub const PRIMARY_KEY_FIELD: &str = "id";
pub const VECTOR_FIELD: &str = "vector";
pub const PRODUCT_ID_FIELD: &str = "product_id";
pub const GENERATED_AT_FIELD: &str = "generated_at";

pub const TENSOR_ID_MAX_LENGTH: u32 = 36;
pub const EMBEDDING_ID_MAX_LENGTH: u32 = 50;

pub const HNSW_INDEX_TYPE: &str = "HNSW";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    VarChar { max_length: u32 },
    Int64,
    FloatVector { dim: usize },
}

impl DataType {
    #[inline]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::VarChar { .. } => "VarChar",
            Self::Int64 => "Int64",
            Self::FloatVector { .. } => "FloatVector",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    pub data_type: DataType,
    pub is_primary: bool,
}

impl FieldSchema {
    #[inline]
    pub fn primary_key(name: impl Into<String>, max_length: u32) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::VarChar { max_length },
            is_primary: true,
        }
    }

    #[inline]
    pub fn varchar(name: impl Into<String>, max_length: u32) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::VarChar { max_length },
            is_primary: false,
        }
    }

    #[inline]
    pub fn int64(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Int64,
            is_primary: false,
        }
    }

    #[inline]
    pub fn float_vector(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::FloatVector { dim },
            is_primary: false,
        }
    }
}

/// Similarity metric configured on the vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MetricType {
    #[default]
    Cosine,
    InnerProduct,
}

impl MetricType {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "COSINE",
            Self::InnerProduct => "IP",
        }
    }
}

/// HNSW build and query parameters for a vector field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub field: String,
    pub metric: MetricType,
    /// Maximum graph degree per node
    pub m: u32,
    /// Candidate list size while building the graph
    pub ef_construction: u32,
    /// Candidate list size at query time; raised to the result limit when smaller
    pub search_ef: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSchema {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSchema>,
    pub index: IndexSpec,
}

impl CollectionSchema {
    /// Declared dimension of the single vector field
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.fields.iter().find_map(|f| match f.data_type {
            DataType::FloatVector { dim } => Some(dim),
            _ => None,
        })
    }

    #[inline]
    pub fn primary_key(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary)
    }

    /// Exactly one primary key, exactly one vector field, and an index on that field
    #[inline]
    pub fn validate(&self) -> Result<()> {
        let primary_keys = self.fields.iter().filter(|f| f.is_primary).count();
        if primary_keys != 1 {
            return Err(VectorError::InvalidArgument(format!(
                "Collection '{}' must declare exactly one primary key, found {}",
                self.name, primary_keys
            )));
        }

        let vectors: Vec<&FieldSchema> = self
            .fields
            .iter()
            .filter(|f| matches!(f.data_type, DataType::FloatVector { .. }))
            .collect();
        let [vector] = vectors.as_slice() else {
            return Err(VectorError::InvalidArgument(format!(
                "Collection '{}' must declare exactly one vector field, found {}",
                self.name,
                vectors.len()
            )));
        };

        if self.dimension() == Some(0) {
            return Err(VectorError::InvalidArgument(format!(
                "Collection '{}' has a zero-dimension vector field",
                self.name
            )));
        }

        if vector.name != self.index.field {
            return Err(VectorError::InvalidArgument(format!(
                "Collection '{}' indexes '{}' but its vector field is '{}'",
                self.name, self.index.field, vector.name
            )));
        }

        Ok(())
    }
}

/// Schema of the knowledge-graph tensor collection
#[inline]
pub fn tensor_schema() -> CollectionSchema {
    CollectionSchema {
        name: TENSOR_COLLECTION.to_string(),
        description: "Knowledge-graph tensors, one per product".to_string(),
        fields: vec![
            FieldSchema::primary_key(PRIMARY_KEY_FIELD, TENSOR_ID_MAX_LENGTH),
            FieldSchema::float_vector(VECTOR_FIELD, TENSOR_DIMENSION),
            FieldSchema::varchar(PRODUCT_ID_FIELD, 36),
            FieldSchema::varchar("sku", 100),
            FieldSchema::varchar("brand", 100),
            FieldSchema::varchar("category", 100),
            FieldSchema::int64(GENERATED_AT_FIELD),
        ],
        index: IndexSpec {
            field: VECTOR_FIELD.to_string(),
            metric: MetricType::Cosine,
            m: 16,
            ef_construction: 128,
            search_ef: 64,
        },
    }
}

/// Schema of the text embedding collection
#[inline]
pub fn embedding_schema() -> CollectionSchema {
    CollectionSchema {
        name: EMBEDDING_COLLECTION.to_string(),
        description: "Text embeddings, one per product and text source".to_string(),
        fields: vec![
            FieldSchema::primary_key(PRIMARY_KEY_FIELD, EMBEDDING_ID_MAX_LENGTH),
            FieldSchema::float_vector(VECTOR_FIELD, EMBEDDING_DIMENSION),
            FieldSchema::varchar(PRODUCT_ID_FIELD, 36),
            FieldSchema::varchar("text_source", 20),
            FieldSchema::varchar("language", 10),
            FieldSchema::varchar("model_version", 50),
            FieldSchema::int64(GENERATED_AT_FIELD),
        ],
        index: IndexSpec {
            field: VECTOR_FIELD.to_string(),
            metric: MetricType::Cosine,
            m: 32,
            ef_construction: 256,
            search_ef: 128,
        },
    }
}

/// The two built-in collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Tensor,
    Embedding,
}

impl CollectionKind {
    pub const ALL: [Self; 2] = [Self::Tensor, Self::Embedding];

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Self::Tensor => TENSOR_COLLECTION,
            Self::Embedding => EMBEDDING_COLLECTION,
        }
    }

    #[inline]
    pub fn dimension(self) -> usize {
        match self {
            Self::Tensor => TENSOR_DIMENSION,
            Self::Embedding => EMBEDDING_DIMENSION,
        }
    }

    #[inline]
    pub fn schema(self) -> CollectionSchema {
        match self {
            Self::Tensor => tensor_schema(),
            Self::Embedding => embedding_schema(),
        }
    }

    /// Fails with [`VectorError::DimensionMismatch`] unless `vector` has this collection's dimension
    #[inline]
    pub fn check_dimension(self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension() {
            Ok(())
        } else {
            Err(VectorError::DimensionMismatch {
                collection: self.name().to_string(),
                expected: self.dimension(),
                actual: vector.len(),
            })
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Creates, loads and releases collections through the current connection
#[derive(Debug, Clone)]
pub struct CollectionManager {
    provider: Arc<ConnectionProvider>,
}

impl CollectionManager {
    #[inline]
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Create `schema` and build its vector index. Does nothing if the collection already exists.
    #[inline]
    pub async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        schema.validate()?;
        let client = self.provider.client()?;

        if client.has_collection(&schema.name).await? {
            info!(
                "Collection '{}' already exists, skipping creation",
                schema.name
            );
            return Ok(());
        }

        info!(
            "Creating collection '{}' ({} fields, dim {})",
            schema.name,
            schema.fields.len(),
            schema.dimension().unwrap_or_default()
        );
        client.create_collection(schema).await?;

        debug!(
            "Building {} index on '{}.{}' (M={}, efConstruction={})",
            HNSW_INDEX_TYPE,
            schema.name,
            schema.index.field,
            schema.index.m,
            schema.index.ef_construction
        );
        client.create_index(&schema.name, &schema.index).await?;

        info!("Collection '{}' created", schema.name);
        Ok(())
    }

    /// Create both built-in collections
    #[inline]
    pub async fn ensure_product_collections(&self) -> Result<()> {
        for kind in CollectionKind::ALL {
            self.create_collection(&kind.schema()).await?;
        }
        Ok(())
    }

    /// Whether `name` exists. Transport failures are reported as `false`.
    #[inline]
    pub async fn collection_exists(&self, name: &str) -> bool {
        let client = match self.provider.client() {
            Ok(client) => client,
            Err(e) => {
                warn!("Cannot check collection '{}': {}", name, e);
                return false;
            }
        };

        match client.has_collection(name).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Failed to check whether '{}' exists: {}", name, e);
                false
            }
        }
    }

    /// Bring a collection into query memory. Loading a loaded collection is a no-op on the service.
    #[inline]
    pub async fn load_collection(&self, name: &str) -> Result<()> {
        debug!("Loading collection '{}'", name);
        self.provider.client()?.load_collection(name).await
    }

    #[inline]
    pub async fn release_collection(&self, name: &str) -> Result<()> {
        debug!("Releasing collection '{}'", name);
        self.provider.client()?.release_collection(name).await
    }

    #[inline]
    pub async fn load_state(&self, name: &str) -> Result<LoadState> {
        self.provider.client()?.load_state(name).await
    }

    #[inline]
    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        warn!("Dropping collection '{}'", name);
        self.provider.client()?.drop_collection(name).await
    }
}
