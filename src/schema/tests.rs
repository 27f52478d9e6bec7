use super::*;
use crate::test_support::{ok, provider_for};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HAS_PATH: &str = "/v2/vectordb/collections/has";
const CREATE_PATH: &str = "/v2/vectordb/collections/create";
const INDEX_PATH: &str = "/v2/vectordb/indexes/create";

#[test]
fn built_in_schemas_are_valid() {
    for kind in CollectionKind::ALL {
        let schema = kind.schema();
        schema.validate().expect("built-in schema should validate");
        assert_eq!(schema.name, kind.name());
        assert_eq!(schema.dimension(), Some(kind.dimension()));
        assert_eq!(
            schema.primary_key().map(|f| f.name.as_str()),
            Some(PRIMARY_KEY_FIELD)
        );
        assert_eq!(schema.index.metric, MetricType::Cosine);
    }
    assert_eq!(tensor_schema().dimension(), Some(13));
    assert_eq!(embedding_schema().dimension(), Some(792));
}

#[test]
fn embedding_index_is_built_with_more_effort() {
    let tensor = tensor_schema().index;
    let embedding = embedding_schema().index;
    assert!(embedding.m > tensor.m);
    assert!(embedding.ef_construction > tensor.ef_construction);
    assert!(embedding.search_ef > tensor.search_ef);
}

#[test]
fn primary_key_lengths_fit_composite_ids() {
    let key_length = |schema: &CollectionSchema| match schema.primary_key().map(|f| f.data_type) {
        Some(DataType::VarChar { max_length }) => max_length,
        other => panic!("unexpected primary key type: {other:?}"),
    };
    assert_eq!(key_length(&tensor_schema()), TENSOR_ID_MAX_LENGTH);
    assert_eq!(key_length(&embedding_schema()), EMBEDDING_ID_MAX_LENGTH);
}

#[test]
fn validation_rejects_malformed_schemas() {
    let mut no_key = tensor_schema();
    no_key.fields.retain(|f| !f.is_primary);
    assert!(no_key.validate().is_err());

    let mut two_vectors = tensor_schema();
    two_vectors
        .fields
        .push(FieldSchema::float_vector("other_vector", 4));
    assert!(two_vectors.validate().is_err());

    let mut wrong_index = embedding_schema();
    wrong_index.index.field = "embedding".to_string();
    assert!(wrong_index.validate().is_err());

    let mut zero_dim = tensor_schema();
    for field in &mut zero_dim.fields {
        if let DataType::FloatVector { dim } = &mut field.data_type {
            *dim = 0;
        }
    }
    assert!(zero_dim.validate().is_err());
}

#[test]
fn dimension_check_names_the_collection() {
    assert!(CollectionKind::Tensor.check_dimension(&[0.0; 13]).is_ok());
    let err = CollectionKind::Embedding
        .check_dimension(&[0.0; 13])
        .expect_err("13 dims is wrong for embeddings");
    assert_eq!(
        err.to_string(),
        "Dimension mismatch for collection 'product_embeddings': expected 792, got 13"
    );
}

#[tokio::test]
async fn create_is_a_no_op_for_existing_collection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HAS_PATH))
        .respond_with(ok(json!({ "has": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ok(json!({})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(INDEX_PATH))
        .respond_with(ok(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let manager = CollectionManager::new(provider_for(&server));
    manager
        .create_collection(&tensor_schema())
        .await
        .expect("existing collection is not an error");
}

#[tokio::test]
async fn create_declares_fields_then_builds_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HAS_PATH))
        .respond_with(ok(json!({ "has": false })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .and(body_partial_json(json!({ "collectionName": "product_embeddings" })))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(INDEX_PATH))
        .and(body_partial_json(json!({
            "collectionName": "product_embeddings",
            "indexParams": [{
                "fieldName": "vector",
                "metricType": "COSINE",
                "params": { "index_type": "HNSW", "M": 32, "efConstruction": 256 }
            }]
        })))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let manager = CollectionManager::new(provider_for(&server));
    manager
        .create_collection(&embedding_schema())
        .await
        .expect("collection should be created");
}

#[tokio::test]
async fn create_surfaces_index_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HAS_PATH))
        .respond_with(ok(json!({ "has": false })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ok(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(INDEX_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let manager = CollectionManager::new(provider_for(&server));
    assert!(manager.create_collection(&tensor_schema()).await.is_err());
}

#[tokio::test]
async fn exists_reports_false_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HAS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let manager = CollectionManager::new(provider_for(&server));
    assert!(!manager.collection_exists(TENSOR_COLLECTION).await);

    let unconnected = CollectionManager::new(Arc::new(ConnectionProvider::new()));
    assert!(!unconnected.collection_exists(TENSOR_COLLECTION).await);
}

#[tokio::test]
async fn exists_reports_service_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HAS_PATH))
        .and(body_partial_json(json!({ "collectionName": "product_tensors" })))
        .respond_with(ok(json!({ "has": true })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(HAS_PATH))
        .and(body_partial_json(json!({ "collectionName": "product_embeddings" })))
        .respond_with(ok(json!({ "has": false })))
        .mount(&server)
        .await;

    let manager = CollectionManager::new(provider_for(&server));
    assert!(manager.collection_exists(TENSOR_COLLECTION).await);
    assert!(!manager.collection_exists(EMBEDDING_COLLECTION).await);
}

#[tokio::test]
async fn ensure_creates_both_collections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HAS_PATH))
        .respond_with(ok(json!({ "has": false })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ok(json!({})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(INDEX_PATH))
        .respond_with(ok(json!({})))
        .expect(2)
        .mount(&server)
        .await;

    let manager = CollectionManager::new(provider_for(&server));
    manager
        .ensure_product_collections()
        .await
        .expect("both collections should be created");
}

#[tokio::test]
async fn load_and_release_target_the_named_collection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/load"))
        .and(body_partial_json(json!({ "collectionName": "product_tensors" })))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/release"))
        .and(body_partial_json(json!({ "collectionName": "product_tensors" })))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/get_load_state"))
        .respond_with(ok(json!({ "loadState": "LoadStateLoaded" })))
        .mount(&server)
        .await;

    let manager = CollectionManager::new(provider_for(&server));
    manager
        .load_collection(TENSOR_COLLECTION)
        .await
        .expect("load should succeed");
    assert_eq!(
        manager
            .load_state(TENSOR_COLLECTION)
            .await
            .expect("load state"),
        LoadState::Loaded
    );
    manager
        .release_collection(TENSOR_COLLECTION)
        .await
        .expect("release should succeed");
}
