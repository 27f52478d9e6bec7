//! Writing product vectors into the two collections.
//!
//! Primary keys are derived from the record, never generated: a tensor row is
//! keyed by its product id, an embedding row by `{product_id}_{text_source}`.
//! Re-inserting the same record therefore targets the same row.

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::connection::ConnectionProvider;
use crate::milvus::FilterExpr;
use crate::schema::{CollectionKind, DataType, PRIMARY_KEY_FIELD};
use crate::{Result, VectorError};

/// Which text an embedding was generated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSource {
    Name,
    Description,
    Combined,
}

impl TextSource {
    pub const ALL: [Self; 3] = [Self::Name, Self::Description, Self::Combined];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Combined => "combined",
        }
    }
}

impl fmt::Display for TextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextSource {
    type Err = VectorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| VectorError::InvalidArgument(format!("Unknown text source: {}", s)))
    }
}

/// A row destined for one of the fixed collections
pub trait VectorRecord {
    const KIND: CollectionKind;

    fn primary_key(&self) -> String;
    fn product_id(&self) -> &str;
    fn vector(&self) -> &[f32];
    /// The row as sent to the service, keyed by the collection's field names
    fn to_row(&self) -> Value;

    /// Dimension, product id and text length checks.
    ///
    /// Every text value, the primary key included, must fit its field's
    /// `max_length`, which the service counts in bytes.
    fn validate(&self) -> Result<()> {
        Self::KIND.check_dimension(self.vector())?;

        if self.product_id().trim().is_empty() {
            return Err(VectorError::InvalidArgument(
                "product_id cannot be empty".to_string(),
            ));
        }

        let row = self.to_row();
        for field in Self::KIND.schema().fields {
            let DataType::VarChar { max_length } = field.data_type else {
                continue;
            };
            let Some(value) = row.get(&field.name).and_then(Value::as_str) else {
                continue;
            };
            if value.len() > max_length as usize {
                return Err(VectorError::InvalidArgument(format!(
                    "Field '{}' is {} bytes, the limit in {} is {}",
                    field.name,
                    value.len(),
                    Self::KIND.name(),
                    max_length
                )));
            }
        }

        Ok(())
    }
}

#[inline]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 13-dimensional knowledge-graph tensor for one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub product_id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub category: String,
    /// Epoch milliseconds
    #[serde(default = "now_millis")]
    pub generated_at: i64,
}

impl TensorRecord {
    #[inline]
    pub fn new(product_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            product_id: product_id.into(),
            vector,
            sku: String::new(),
            brand: String::new(),
            category: String::new(),
            generated_at: now_millis(),
        }
    }
}

impl VectorRecord for TensorRecord {
    const KIND: CollectionKind = CollectionKind::Tensor;

    fn primary_key(&self) -> String {
        self.product_id.clone()
    }

    fn product_id(&self) -> &str {
        &self.product_id
    }

    fn vector(&self) -> &[f32] {
        &self.vector
    }

    fn to_row(&self) -> Value {
        json!({
            "id": self.primary_key(),
            "vector": self.vector,
            "product_id": self.product_id,
            "sku": self.sku,
            "brand": self.brand,
            "category": self.category,
            "generated_at": self.generated_at,
        })
    }
}

/// 792-dimensional text embedding for one product and text source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub product_id: String,
    pub text_source: TextSource,
    pub vector: Vec<f32>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub model_version: String,
    #[serde(default = "now_millis")]
    pub generated_at: i64,
}

impl EmbeddingRecord {
    #[inline]
    pub fn new(product_id: impl Into<String>, text_source: TextSource, vector: Vec<f32>) -> Self {
        Self {
            product_id: product_id.into(),
            text_source,
            vector,
            language: default_language(),
            model_version: String::new(),
            generated_at: now_millis(),
        }
    }
}

fn default_language() -> String {
    "en".to_string()
}

/// `{product_id}_{text_source}`
#[inline]
pub fn embedding_key(product_id: &str, text_source: TextSource) -> String {
    format!("{}_{}", product_id, text_source)
}

impl VectorRecord for EmbeddingRecord {
    const KIND: CollectionKind = CollectionKind::Embedding;

    fn primary_key(&self) -> String {
        embedding_key(&self.product_id, self.text_source)
    }

    fn product_id(&self) -> &str {
        &self.product_id
    }

    fn vector(&self) -> &[f32] {
        &self.vector
    }

    fn to_row(&self) -> Value {
        json!({
            "id": self.primary_key(),
            "vector": self.vector,
            "product_id": self.product_id,
            "text_source": self.text_source,
            "language": self.language,
            "model_version": self.model_version,
            "generated_at": self.generated_at,
        })
    }
}

/// Failure attributed to one record of a batch, or to the whole request when `index` is `None`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemError {
    pub index: Option<usize>,
    pub id: Option<String>,
    pub message: String,
}

/// Outcome of [`VectorIngestor::insert_batch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchInsertResult {
    pub success: bool,
    pub inserted: usize,
    pub failed: usize,
    pub errors: Vec<BatchItemError>,
}

impl Default for BatchInsertResult {
    fn default() -> Self {
        Self {
            success: true,
            inserted: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }
}

impl BatchInsertResult {
    fn record_item_failure(&mut self, index: usize, id: String, message: String) {
        self.failed += 1;
        self.errors.push(BatchItemError {
            index: Some(index),
            id: Some(id),
            message,
        });
    }

    fn record_request_failure(&mut self, rows: usize, message: String) {
        self.failed += rows;
        self.errors.push(BatchItemError {
            index: None,
            id: None,
            message,
        });
    }

    fn finish(mut self) -> Self {
        self.success = self.failed == 0;
        self
    }
}

/// Insert, update and delete rows through the current connection
#[derive(Debug, Clone)]
pub struct VectorIngestor {
    provider: Arc<ConnectionProvider>,
}

impl VectorIngestor {
    #[inline]
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self { provider }
    }

    #[inline]
    pub async fn insert_one<R: VectorRecord>(&self, record: &R) -> Result<()> {
        record.validate()?;
        let client = self.provider.client()?;

        debug!(
            "Inserting '{}' into {}",
            record.primary_key(),
            R::KIND.name()
        );
        client.insert(R::KIND.name(), &[record.to_row()]).await?;
        Ok(())
    }

    /// Insert all valid records in one request.
    ///
    /// Never fails: invalid records and service errors are reported in the result.
    #[inline]
    pub async fn insert_batch<R: VectorRecord>(&self, records: &[R]) -> BatchInsertResult {
        let mut result = BatchInsertResult::default();
        if records.is_empty() {
            return result;
        }

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match record.validate() {
                Ok(()) => rows.push(record.to_row()),
                Err(e) => {
                    result.record_item_failure(index, record.primary_key(), e.to_string());
                }
            }
        }

        if rows.is_empty() {
            warn!(
                "No valid records in batch of {} for {}",
                records.len(),
                R::KIND.name()
            );
            return result.finish();
        }

        let outcome = match self.provider.client() {
            Ok(client) => client.insert(R::KIND.name(), &rows).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => {
                let accepted = usize::try_from(outcome.insert_count)
                    .unwrap_or(usize::MAX)
                    .max(outcome.ids.len())
                    .min(rows.len());
                result.inserted = accepted;
                if accepted < rows.len() {
                    result.record_request_failure(
                        rows.len() - accepted,
                        format!(
                            "Service accepted {} of {} rows",
                            accepted,
                            rows.len()
                        ),
                    );
                }
            }
            Err(e) => {
                warn!(
                    "Batch insert of {} rows into {} failed: {}",
                    rows.len(),
                    R::KIND.name(),
                    e
                );
                result.record_request_failure(rows.len(), e.to_string());
            }
        }

        let result = result.finish();
        info!(
            "Batch insert into {}: {} inserted, {} failed",
            R::KIND.name(),
            result.inserted,
            result.failed
        );
        result
    }

    /// Remove every row of `product_id`; in the embedding collection this covers all text sources
    #[inline]
    pub async fn delete_by_product_id(&self, kind: CollectionKind, product_id: &str) -> Result<()> {
        let filter = FilterExpr::product_id_eq(product_id);
        debug!("Deleting from {} where {}", kind.name(), filter);
        self.provider.client()?.delete(kind.name(), &filter).await
    }

    /// Replace the row keyed by `record` with a delete followed by an insert.
    ///
    /// Not atomic: if the insert fails after the delete succeeded, the row is gone.
    #[inline]
    pub async fn update<R: VectorRecord>(&self, record: &R) -> Result<()> {
        record.validate()?;
        let key = record.primary_key();
        let client = self.provider.client()?;

        client
            .delete(R::KIND.name(), &FilterExpr::field_eq(PRIMARY_KEY_FIELD, &key))
            .await?;

        if let Err(e) = client.insert(R::KIND.name(), &[record.to_row()]).await {
            warn!(
                "Row '{}' in {} was deleted but re-insert failed: {}",
                key,
                R::KIND.name(),
                e
            );
            return Err(e);
        }

        debug!("Updated '{}' in {}", key, R::KIND.name());
        Ok(())
    }
}
