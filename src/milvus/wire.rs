// Request and response bodies for the Milvus REST v2 API

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{CollectionSchema, DataType, FieldSchema, HNSW_INDEX_TYPE, IndexSpec};
use crate::{Result, VectorError};

/// Codes reported for a successful call. v1-compatible gateways answer 200.
const SUCCESS_CODES: [i64; 2] = [0, 200];

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub code: i64,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// Returns the payload, or a service error if the call was rejected
    pub fn into_data(self) -> Result<Option<T>> {
        if SUCCESS_CODES.contains(&self.code) {
            Ok(self.data)
        } else {
            Err(VectorError::Service {
                code: self.code,
                message: self
                    .message
                    .unwrap_or_else(|| "no message returned".to_string()),
            })
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatabaseRequest<'a> {
    pub db_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CollectionRequest<'a> {
    pub db_name: &'a str,
    pub collection_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionData {
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HasData {
    pub has: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoadStateData {
    pub load_state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatsData {
    pub row_count: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateCollectionRequest<'a> {
    pub db_name: &'a str,
    pub collection_name: &'a str,
    pub schema: SchemaBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SchemaBody {
    pub auto_id: bool,
    pub enable_dynamic_field: bool,
    pub fields: Vec<FieldBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FieldBody {
    pub field_name: String,
    pub data_type: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_primary: bool,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub element_type_params: Map<String, Value>,
}

impl From<&FieldSchema> for FieldBody {
    fn from(field: &FieldSchema) -> Self {
        let mut element_type_params = Map::new();
        match field.data_type {
            DataType::VarChar { max_length } => {
                element_type_params.insert("max_length".to_string(), max_length.into());
            }
            DataType::FloatVector { dim } => {
                element_type_params.insert("dim".to_string(), dim.into());
            }
            DataType::Int64 => {}
        }

        Self {
            field_name: field.name.clone(),
            data_type: field.data_type.wire_name(),
            is_primary: field.is_primary,
            element_type_params,
        }
    }
}

impl From<&CollectionSchema> for SchemaBody {
    fn from(schema: &CollectionSchema) -> Self {
        Self {
            auto_id: false,
            enable_dynamic_field: false,
            fields: schema.fields.iter().map(FieldBody::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateIndexRequest<'a> {
    pub db_name: &'a str,
    pub collection_name: &'a str,
    pub index_params: Vec<IndexBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexBody {
    pub field_name: String,
    pub index_name: String,
    pub metric_type: &'static str,
    pub params: IndexParamsBody,
}

#[derive(Debug, Serialize)]
pub(crate) struct IndexParamsBody {
    pub index_type: &'static str,
    #[serde(rename = "M")]
    pub m: u32,
    #[serde(rename = "efConstruction")]
    pub ef_construction: u32,
}

impl From<&IndexSpec> for IndexBody {
    fn from(index: &IndexSpec) -> Self {
        Self {
            field_name: index.field.clone(),
            index_name: format!("{}_hnsw", index.field),
            metric_type: index.metric.as_str(),
            params: IndexParamsBody {
                index_type: HNSW_INDEX_TYPE,
                m: index.m,
                ef_construction: index.ef_construction,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InsertRequest<'a> {
    pub db_name: &'a str,
    pub collection_name: &'a str,
    pub data: &'a [Value],
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InsertData {
    #[serde(default)]
    pub insert_count: u64,
    #[serde(default)]
    pub insert_ids: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteRequest<'a> {
    pub db_name: &'a str,
    pub collection_name: &'a str,
    pub filter: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchRequest<'a> {
    pub db_name: &'a str,
    pub collection_name: &'a str,
    pub data: [&'a [f32]; 1],
    pub anns_field: &'a str,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_fields: Option<&'a [String]>,
    pub search_params: SearchParamsBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchParamsBody {
    pub metric_type: &'static str,
    pub params: SearchEfBody,
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchEfBody {
    pub ef: usize,
}

/// Renders a primary key returned by the service, which may be a string or a number
pub(crate) fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reads a count that the service may encode as a number or a decimal string
pub(crate) fn count_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
