//! Similarity search over the tensor and embedding collections.
//!
//! Three modes:
//!
//! * [`SearchMode::Tensor`]: top-K over `product_tensors`, ranked in service order
//! * [`SearchMode::Embedding`]: top-K over `product_embeddings`, reduced to the
//!   best row per product
//! * [`SearchMode::Hybrid`]: both searches run concurrently with an over-fetched
//!   limit, then go through [`fusion::fuse`]
//!
//! Collections are loaded before every query. Nothing is cached between calls.

pub mod fusion;


use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::SearchSettings;
use crate::connection::ConnectionProvider;
use crate::ingest::TextSource;
use crate::milvus::{FilterExpr, SearchResult, VectorQuery};
use crate::schema::{CollectionKind, PRODUCT_ID_FIELD, VECTOR_FIELD};
use crate::{Result, VectorError};
use fusion::{EMBEDDING_SCORE_KEY, TENSOR_SCORE_KEY};

pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_TENSOR_WEIGHT: f64 = 0.5;
pub const DEFAULT_OVERFETCH_FACTOR: usize = 2;

const EMBEDDING_ID_KEY: &str = "embedding_id";
const TEXT_SOURCE_FIELD: &str = "text_source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Tensor,
    Embedding,
    #[default]
    Hybrid,
}

impl SearchMode {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tensor => "tensor",
            Self::Embedding => "embedding",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = VectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tensor" => Ok(Self::Tensor),
            "embedding" => Ok(Self::Embedding),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(VectorError::InvalidArgument(format!(
                "Unknown search mode '{}' (expected tensor, embedding or hybrid)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Passed to the service untouched. In hybrid mode it goes to both collections.
    pub filter: Option<FilterExpr>,
    /// In hybrid mode each collection is asked only for the fields it declares
    pub output_fields: Option<Vec<String>>,
    /// Weight of the tensor score in hybrid mode; the embedding score gets `1 - tensor_weight`
    pub tensor_weight: f64,
    /// Hybrid sub-searches request `top_k * overfetch_factor` candidates each
    pub overfetch_factor: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            filter: None,
            output_fields: None,
            tensor_weight: DEFAULT_TENSOR_WEIGHT,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }
}

impl From<&SearchSettings> for SearchOptions {
    #[inline]
    fn from(settings: &SearchSettings) -> Self {
        Self {
            top_k: settings.top_k,
            tensor_weight: settings.tensor_weight,
            overfetch_factor: settings.overfetch_factor,
            ..Self::default()
        }
    }
}

impl SearchOptions {
    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn with_filter(mut self, filter: impl Into<FilterExpr>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[inline]
    pub fn with_output_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    #[inline]
    pub fn with_tensor_weight(mut self, weight: f64) -> Self {
        self.tensor_weight = weight;
        self
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(VectorError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tensor_weight) {
            return Err(VectorError::InvalidArgument(format!(
                "tensor_weight must be within [0, 1], got {}",
                self.tensor_weight
            )));
        }
        if self.overfetch_factor == 0 {
            return Err(VectorError::InvalidArgument(
                "overfetch_factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn candidate_limit(&self) -> usize {
        self.top_k.saturating_mul(self.overfetch_factor)
    }

    /// A copy whose `output_fields` keeps only the fields `kind` declares
    fn for_collection(&self, kind: CollectionKind) -> Self {
        let schema = kind.schema();
        let output_fields = self.output_fields.as_ref().map(|fields| {
            fields
                .iter()
                .filter(|name| schema.fields.iter().any(|f| &f.name == *name))
                .cloned()
                .collect()
        });
        Self {
            output_fields,
            ..self.clone()
        }
    }
}

/// A product with its final score and 1-based rank.
///
/// `metadata` holds the requested output fields plus score provenance
/// (`tensor_score`, `embedding_score`, `combined_score`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedProduct {
    pub id: String,
    pub score: f64,
    pub rank: usize,
    pub metadata: Map<String, Value>,
}

/// A mode plus whichever vectors it needs
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub mode: SearchMode,
    pub tensor_vector: Option<Vec<f32>>,
    pub embedding_vector: Option<Vec<f32>>,
    pub options: SearchOptions,
}

#[derive(Debug, Clone)]
pub struct SearchEngine {
    provider: Arc<ConnectionProvider>,
}

impl SearchEngine {
    #[inline]
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Dispatch on `request.mode`
    #[inline]
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<RankedProduct>> {
        match request.mode {
            SearchMode::Tensor => {
                let vector = request
                    .tensor_vector
                    .as_deref()
                    .ok_or(VectorError::MissingVector("tensor"))?;
                self.search_tensor(vector, &request.options).await
            }
            SearchMode::Embedding => {
                let vector = request
                    .embedding_vector
                    .as_deref()
                    .ok_or(VectorError::MissingVector("embedding"))?;
                self.search_embedding(vector, &request.options).await
            }
            SearchMode::Hybrid => {
                let tensor = request
                    .tensor_vector
                    .as_deref()
                    .ok_or(VectorError::MissingVector("tensor"))?;
                let embedding = request
                    .embedding_vector
                    .as_deref()
                    .ok_or(VectorError::MissingVector("embedding"))?;
                self.search_hybrid(tensor, embedding, &request.options).await
            }
        }
    }

    /// Top-K over the tensor collection, ranked in the order the service returns
    #[inline]
    pub async fn search_tensor(
        &self,
        vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<RankedProduct>> {
        CollectionKind::Tensor.check_dimension(vector)?;
        options.validate()?;

        let results = self
            .query(CollectionKind::Tensor, vector, options.top_k, options)
            .await?;

        let ranked = results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                let mut metadata = result.fields;
                metadata.insert(TENSOR_SCORE_KEY.to_string(), result.score.into());
                RankedProduct {
                    id: result.id,
                    score: result.score,
                    rank: index + 1,
                    metadata,
                }
            })
            .collect();

        Ok(ranked)
    }

    /// Top-K over the embedding collection, one result per product
    #[inline]
    pub async fn search_embedding(
        &self,
        vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<RankedProduct>> {
        CollectionKind::Embedding.check_dimension(vector)?;
        options.validate()?;

        let mut output_fields = options.output_fields.clone().unwrap_or_default();
        for required in [PRODUCT_ID_FIELD, TEXT_SOURCE_FIELD] {
            if !output_fields.iter().any(|f| f == required) {
                output_fields.push(required.to_string());
            }
        }
        let options = SearchOptions {
            output_fields: Some(output_fields),
            ..options.clone()
        };

        let results = self
            .query(CollectionKind::Embedding, vector, options.top_k, &options)
            .await?;
        let rows = results.len();

        let per_row = results.into_iter().map(|result| {
            let product_id = product_id_of_embedding_row(&result);
            let mut metadata = result.fields;
            metadata.insert(EMBEDDING_ID_KEY.to_string(), Value::String(result.id));
            metadata.insert(EMBEDDING_SCORE_KEY.to_string(), result.score.into());
            RankedProduct {
                id: product_id,
                score: result.score,
                rank: 0,
                metadata,
            }
        });

        let deduped = fusion::dedup_best_per_id(per_row.collect());
        debug!(
            "Embedding search: {} rows reduced to {} products",
            rows,
            deduped.len()
        );
        Ok(deduped)
    }

    /// Concurrent tensor and embedding searches fused into one ranking.
    ///
    /// Each sub-search only requests the `output_fields` its own collection
    /// declares. The filter is sent to both collections unchanged, so it may
    /// only reference fields they share (`product_id`, `generated_at`).
    /// If either sub-search fails the whole search fails.
    #[inline]
    pub async fn search_hybrid(
        &self,
        tensor_vector: &[f32],
        embedding_vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<RankedProduct>> {
        CollectionKind::Tensor.check_dimension(tensor_vector)?;
        CollectionKind::Embedding.check_dimension(embedding_vector)?;
        options.validate()?;

        let candidates = SearchOptions {
            top_k: options.candidate_limit(),
            ..options.clone()
        };
        let tensor_candidates = candidates.for_collection(CollectionKind::Tensor);
        let embedding_candidates = candidates.for_collection(CollectionKind::Embedding);

        let (tensor, embedding) = tokio::try_join!(
            self.search_tensor(tensor_vector, &tensor_candidates),
            self.search_embedding(embedding_vector, &embedding_candidates),
        )?;

        let tensor_count = tensor.len();
        let embedding_count = embedding.len();
        let fused = fusion::fuse(tensor, embedding, options.tensor_weight, options.top_k);

        info!(
            "Hybrid search: {} tensor + {} embedding candidates fused into {} results (w={})",
            tensor_count,
            embedding_count,
            fused.len(),
            options.tensor_weight
        );
        Ok(fused)
    }

    async fn query(
        &self,
        kind: CollectionKind,
        vector: &[f32],
        limit: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let client = self.provider.client()?;
        let schema = kind.schema();

        client.load_collection(kind.name()).await?;

        debug!("Searching {} for top {}", kind.name(), limit);
        client
            .search(&VectorQuery {
                collection: kind.name(),
                vector_field: VECTOR_FIELD,
                vector,
                limit,
                filter: options.filter.as_ref(),
                output_fields: options.output_fields.as_deref(),
                metric: schema.index.metric,
                ef: schema.index.search_ef,
            })
            .await
    }
}

/// The `product_id` output field, or the id with its `_{text_source}` suffix removed
fn product_id_of_embedding_row(result: &SearchResult) -> String {
    if let Some(Value::String(product_id)) = result.fields.get(PRODUCT_ID_FIELD) {
        return product_id.clone();
    }

    result
        .id
        .rsplit_once('_')
        .filter(|(_, suffix)| suffix.parse::<TextSource>().is_ok())
        .map_or_else(|| result.id.clone(), |(product_id, _)| product_id.to_string())
}
