use super::*;
use crate::schema::{EMBEDDING_DIMENSION, TENSOR_DIMENSION};
use crate::test_support::{ok, provider_for, service_error};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INSERT_PATH: &str = "/v2/vectordb/entities/insert";
const DELETE_PATH: &str = "/v2/vectordb/entities/delete";

fn tensor(product_id: &str) -> TensorRecord {
    TensorRecord {
        sku: format!("SKU-{}", product_id),
        brand: "Acme".to_string(),
        category: "skincare".to_string(),
        generated_at: 1_700_000_000_000,
        ..TensorRecord::new(product_id, vec![0.5; TENSOR_DIMENSION])
    }
}

fn embedding(product_id: &str, source: TextSource) -> EmbeddingRecord {
    EmbeddingRecord {
        model_version: "text-embed-v3".to_string(),
        generated_at: 1_700_000_000_000,
        ..EmbeddingRecord::new(product_id, source, vec![0.01; EMBEDDING_DIMENSION])
    }
}

#[test]
fn primary_keys_are_deterministic() {
    assert_eq!(tensor("p-1").primary_key(), "p-1");
    assert_eq!(
        embedding("p-1", TextSource::Description).primary_key(),
        "p-1_description"
    );
    assert_eq!(embedding_key("p-2", TextSource::Combined), "p-2_combined");
}

#[test]
fn text_source_parsing() {
    assert_eq!("name".parse::<TextSource>().ok(), Some(TextSource::Name));
    assert_eq!(
        "combined".parse::<TextSource>().ok(),
        Some(TextSource::Combined)
    );
    assert!("title".parse::<TextSource>().is_err());
    assert_eq!(
        serde_json::to_value(TextSource::Description).expect("serialize"),
        serde_json::json!("description")
    );
}

#[test]
fn rows_use_collection_field_names() {
    let row = embedding("p-1", TextSource::Name).to_row();
    assert_eq!(row["id"], "p-1_name");
    assert_eq!(row["product_id"], "p-1");
    assert_eq!(row["text_source"], "name");
    assert_eq!(row["language"], "en");
    assert_eq!(row["generated_at"], 1_700_000_000_000_i64);
    assert_eq!(
        row["vector"].as_array().map(Vec::len),
        Some(EMBEDDING_DIMENSION)
    );

    let row = tensor("p-1").to_row();
    assert_eq!(row["id"], "p-1");
    assert_eq!(row["sku"], "SKU-p-1");
    assert_eq!(row["category"], "skincare");
}

#[test]
fn wrong_dimension_is_rejected() {
    let mut record = tensor("p-1");
    record.vector.push(1.0);
    match record.validate() {
        Err(VectorError::DimensionMismatch {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 13);
            assert_eq!(actual, 14);
        }
        other => panic!("unexpected validation result: {other:?}"),
    }

    let mut record = embedding("p-1", TextSource::Name);
    record.vector.truncate(768);
    assert!(matches!(
        record.validate(),
        Err(VectorError::DimensionMismatch { actual: 768, .. })
    ));
}

#[test]
fn overlong_keys_and_empty_ids_are_rejected() {
    let long_id = "x".repeat(40);
    assert!(tensor(&long_id).validate().is_err());
    assert!(embedding(&long_id, TextSource::Description).validate().is_err());
    assert!(embedding(&"x".repeat(36), TextSource::Combined).validate().is_ok());
    assert!(tensor(" ").validate().is_err());
}

#[tokio::test]
async fn empty_batch_makes_no_request() {
    let ingestor = VectorIngestor::new(Arc::new(ConnectionProvider::new()));
    let result = ingestor.insert_batch::<TensorRecord>(&[]).await;
    assert_eq!(
        result,
        BatchInsertResult {
            success: true,
            inserted: 0,
            failed: 0,
            errors: Vec::new(),
        }
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INSERT_PATH))
        .respond_with(ok(serde_json::json!({ "insertCount": 0 })))
        .expect(0)
        .mount(&server)
        .await;
    let ingestor = VectorIngestor::new(provider_for(&server));
    let result = ingestor.insert_batch::<EmbeddingRecord>(&[]).await;
    assert!(result.success);
}

#[tokio::test]
async fn insert_one_builds_composite_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INSERT_PATH))
        .and(body_partial_json(serde_json::json!({
            "collectionName": "product_embeddings",
            "data": [{ "id": "p-9_combined", "product_id": "p-9", "text_source": "combined" }]
        })))
        .respond_with(ok(serde_json::json!({ "insertCount": 1, "insertIds": ["p-9_combined"] })))
        .expect(1)
        .mount(&server)
        .await;

    let ingestor = VectorIngestor::new(provider_for(&server));
    ingestor
        .insert_one(&embedding("p-9", TextSource::Combined))
        .await
        .expect("insert should succeed");
}

#[tokio::test]
async fn insert_one_rejects_bad_dimension_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok(serde_json::json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let ingestor = VectorIngestor::new(provider_for(&server));
    let mut record = tensor("p-1");
    record.vector = vec![1.0; 3];
    let err = ingestor
        .insert_one(&record)
        .await
        .expect_err("should reject");
    assert!(matches!(err, VectorError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn batch_reports_invalid_items_and_inserts_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INSERT_PATH))
        .respond_with(ok(serde_json::json!({ "insertCount": 2, "insertIds": ["a", "c"] })))
        .expect(1)
        .mount(&server)
        .await;

    let mut invalid = tensor("b");
    invalid.vector = vec![0.0; 5];
    let records = vec![tensor("a"), invalid, tensor("c")];

    let ingestor = VectorIngestor::new(provider_for(&server));
    let result = ingestor.insert_batch(&records).await;

    assert!(!result.success);
    assert_eq!(result.inserted, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].index, Some(1));
    assert_eq!(result.errors[0].id.as_deref(), Some("b"));
    assert!(result.errors[0].message.contains("Dimension mismatch"));
}

#[tokio::test]
async fn batch_service_failure_is_captured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INSERT_PATH))
        .respond_with(service_error(1100, "invalid parameter"))
        .mount(&server)
        .await;

    let records = vec![tensor("a"), tensor("b")];
    let ingestor = VectorIngestor::new(provider_for(&server));
    let result = ingestor.insert_batch(&records).await;

    assert!(!result.success);
    assert_eq!(result.inserted, 0);
    assert_eq!(result.failed, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].index, None);
    assert!(result.errors[0].message.contains("invalid parameter"));
}

#[tokio::test]
async fn batch_without_connection_is_captured() {
    let ingestor = VectorIngestor::new(Arc::new(ConnectionProvider::new()));
    let result = ingestor.insert_batch(&[tensor("a")]).await;
    assert!(!result.success);
    assert_eq!(result.failed, 1);
}

#[tokio::test]
async fn delete_by_product_id_uses_filter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DELETE_PATH))
        .and(body_partial_json(serde_json::json!({
            "collectionName": "product_embeddings",
            "filter": "product_id == \"p-3\""
        })))
        .respond_with(ok(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let ingestor = VectorIngestor::new(provider_for(&server));
    ingestor
        .delete_by_product_id(CollectionKind::Embedding, "p-3")
        .await
        .expect("delete should succeed");
}

#[tokio::test]
async fn update_deletes_then_inserts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DELETE_PATH))
        .and(body_partial_json(serde_json::json!({
            "collectionName": "product_tensors",
            "filter": "id == \"p-4\""
        })))
        .respond_with(ok(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(INSERT_PATH))
        .respond_with(ok(serde_json::json!({ "insertCount": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let ingestor = VectorIngestor::new(provider_for(&server));
    ingestor
        .update(&tensor("p-4"))
        .await
        .expect("update should succeed");
}

#[tokio::test]
async fn update_surfaces_insert_failure_after_delete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DELETE_PATH))
        .respond_with(ok(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(INSERT_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let ingestor = VectorIngestor::new(provider_for(&server));
    let err = ingestor
        .update(&tensor("p-5"))
        .await
        .expect_err("insert failure should surface");
    assert!(matches!(err, VectorError::Transport(_)));
}

#[tokio::test]
async fn update_with_invalid_record_leaves_row_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DELETE_PATH))
        .respond_with(ok(serde_json::json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let ingestor = VectorIngestor::new(provider_for(&server));
    let mut record = embedding("p-6", TextSource::Name);
    record.vector.clear();
    assert!(ingestor.update(&record).await.is_err());
}

#[test]
fn text_fields_are_limited_to_their_schema_length() {
    let mut record = tensor("p-1");
    record.brand = "x".repeat(200);
    assert!(record.validate().is_err());

    let mut record = tensor("p-1");
    record.sku = "x".repeat(100);
    record.category = "x".repeat(100);
    assert!(record.validate().is_ok());

    let mut record = embedding("p-1", TextSource::Name);
    record.model_version = "v".repeat(51);
    assert!(record.validate().is_err());

    let mut record = embedding("p-1", TextSource::Name);
    record.language = "english-us-x".to_string();
    assert!(record.validate().is_err());
}

#[test]
fn text_length_is_counted_in_bytes() {
    // 36 chars but 72 bytes
    let product_id = "é".repeat(36);
    assert!(tensor(&product_id).validate().is_err());

    let mut record = tensor("p-1");
    record.brand = "é".repeat(50);
    assert!(record.validate().is_ok());
    record.brand.push('é');
    assert!(record.validate().is_err());
}

#[tokio::test]
async fn batch_reports_overlong_text_per_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INSERT_PATH))
        .respond_with(ok(serde_json::json!({ "insertCount": 1, "insertIds": ["good"] })))
        .expect(1)
        .mount(&server)
        .await;

    let mut bad = tensor("bad");
    bad.brand = "x".repeat(200);
    let records = vec![tensor("good"), bad];

    let ingestor = VectorIngestor::new(provider_for(&server));
    let result = ingestor.insert_batch(&records).await;

    assert!(!result.success);
    assert_eq!(result.inserted, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].index, Some(1));
    assert_eq!(result.errors[0].id.as_deref(), Some("bad"));
    assert!(result.errors[0].message.contains("brand"));
}
