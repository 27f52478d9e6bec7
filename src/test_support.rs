// Shared fixtures for unit tests that talk to a mocked vector service

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::{MockServer, ResponseTemplate};

use crate::config::{Auth, ConnectionConfig};
use crate::connection::ConnectionProvider;

pub(crate) fn provider_for(server: &MockServer) -> Arc<ConnectionProvider> {
    let config = ConnectionConfig::new(&server.uri(), Auth::Token("test-token".to_string()))
        .expect("should build config")
        .with_timeout(Duration::from_secs(5));
    let provider = Arc::new(ConnectionProvider::new());
    provider
        .get_client(Some(&config))
        .expect("should connect to mock server");
    provider
}

pub(crate) fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": data }))
}

pub(crate) fn service_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": code, "message": message }))
}
