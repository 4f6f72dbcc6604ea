//! OpenAI embedding provider against a mock HTTP server.
#![cfg(feature = "openai")]

use std::sync::Arc;
use std::time::Duration;

use govcon_search::{EmbeddingClient, EmbeddingProvider, OpenAIEmbeddingProvider, SearchError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> OpenAIEmbeddingProvider {
    OpenAIEmbeddingProvider::new("sk-test").unwrap().with_dimensions(3).with_base_url(server.uri())
}

async fn respond_with(template: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST")).and(path("/embeddings")).respond_with(template).mount(&server).await;
    server
}

fn api_error(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({ "error": { "message": message } }))
}

#[tokio::test]
async fn returns_the_first_embedding() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "text-embedding-3-small",
            "input": "FISMA compliance",
            "dimensions": 3
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server);
    let embedding = provider.embed("FISMA compliance").await.unwrap();
    assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    assert_eq!(provider.dimensions(), 3);
    assert_eq!(provider.name(), "OpenAI");
}

#[tokio::test]
async fn unauthorized_is_an_auth_failure() {
    let server = respond_with(api_error(401, "Incorrect API key provided")).await;
    let err = provider(&server).embed("q").await.unwrap_err();
    match err {
        SearchError::EmbeddingAuthFailed { message, .. } => {
            assert!(message.contains("Incorrect API key"));
        }
        other => panic!("expected auth failure, got {other:?}"),
    }
}

#[tokio::test]
async fn throttling_is_rate_limited() {
    let server = respond_with(api_error(429, "Rate limit reached")).await;
    let err = provider(&server).embed("q").await.unwrap_err();
    assert!(matches!(err, SearchError::EmbeddingRateLimited { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn server_errors_are_unavailable() {
    let server = respond_with(ResponseTemplate::new(503).set_body_string("upstream down")).await;
    let err = provider(&server).embed("q").await.unwrap_err();
    assert!(matches!(err, SearchError::EmbeddingUnavailable { .. }));
}

#[tokio::test]
async fn unparseable_body_is_malformed() {
    let server = respond_with(ResponseTemplate::new(200).set_body_string("not json")).await;
    let err = provider(&server).embed("q").await.unwrap_err();
    assert!(matches!(err, SearchError::EmbeddingMalformed { .. }));

    let server = respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] }))).await;
    let err = provider(&server).embed("q").await.unwrap_err();
    assert!(matches!(err, SearchError::EmbeddingMalformed { .. }));
}

#[tokio::test]
async fn client_rejects_wrong_dimensions() {
    let server = respond_with(
        ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "embedding": [0.1, 0.2] }] })),
    )
    .await;
    let client = EmbeddingClient::new(Arc::new(provider(&server)), Duration::from_secs(3));
    let err = client.embed("q").await.unwrap_err();
    assert!(matches!(err, SearchError::EmbeddingMalformed { .. }));
}

#[tokio::test]
async fn client_deadline_beats_a_slow_server() {
    let server = respond_with(
        ResponseTemplate::new(200)
            .set_body_json(json!({ "data": [{ "embedding": [0.1, 0.2, 0.3] }] }))
            .set_delay(Duration::from_secs(5)),
    )
    .await;
    let client = EmbeddingClient::new(Arc::new(provider(&server)), Duration::from_millis(200));
    let err = client.embed("q").await.unwrap_err();
    assert!(matches!(err, SearchError::EmbeddingTimeout { .. }));
}

#[test]
fn empty_api_key_is_rejected() {
    assert!(matches!(OpenAIEmbeddingProvider::new(""), Err(SearchError::ConfigError(_))));
}
