//! HTTP API tests driven through the router without a listener.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::{engine, unit, FakeAuthorizer, FakeEmbedder, FakeExtractor, FakeGenerator, URL};
use repo_rag::answer::AnswerPipeline;
use repo_rag::config::RetrievalConfig;
use repo_rag::server::{build_router, AppState};
use repo_rag_core::store::memory::InMemoryStore;
use repo_rag_core::store::Store;

fn router(store: InMemoryStore, generator: FakeGenerator, authorizer: FakeAuthorizer) -> Router {
    let store = Arc::new(store);
    let embedder = Arc::new(FakeEmbedder::new());
    let engine = engine(
        store.clone(),
        Arc::new(FakeExtractor::returning(vec![])),
        embedder.clone(),
        3,
    );
    let answer = AnswerPipeline::new(
        store,
        embedder,
        Arc::new(generator),
        Arc::new(authorizer),
        RetrievalConfig::default(),
    );
    build_router(AppState {
        engine,
        answer: Arc::new(answer),
    })
}

fn default_router(store: InMemoryStore) -> Router {
    router(
        store,
        FakeGenerator::replying("ok"),
        FakeAuthorizer::allowing(),
    )
}

async fn seed_repository(store: &InMemoryStore) {
    let mut tx = store.begin().await.unwrap();
    let repo = tx.create_repository(URL).await.unwrap();
    let chunk = tx.insert_code_chunk(&repo.id, "a.rs", "fn a() {}").await.unwrap();
    tx.set_embedding(&chunk.id, &unit(4)).await.unwrap();
    tx.commit().await.unwrap();
}

async fn post_json(router: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_reports_ok() {
    let (status, body) = get(default_router(InMemoryStore::new()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_banner_is_plain_text() {
    let request = Request::builder().uri("/api").body(Body::empty()).unwrap();
    let response = default_router(InMemoryStore::new())
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("repo-rag "));
}

#[tokio::test]
async fn test_submit_returns_created_envelope() {
    let (status, body) = post_json(
        default_router(InMemoryStore::new()),
        "/api/site",
        json!({ "url": URL, "skipPaths": ["docs"] }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "rag workflow started");
    assert!(!body["data"]["instanceId"].as_str().unwrap().is_empty());
    assert_eq!(body["data"]["status"], "queued");
}

#[tokio::test]
async fn test_submit_rejects_non_github_url() {
    let (status, body) = post_json(
        default_router(InMemoryStore::new()),
        "/api/site",
        json!({ "url": "https://example.com/widgets" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "github url is required");
}

#[tokio::test]
async fn test_submit_existing_repository_conflicts() {
    let store = InMemoryStore::new();
    seed_repository(&store).await;

    let (status, body) = post_json(default_router(store), "/api/site", json!({ "url": URL })).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "repository already exists in db");
}

#[tokio::test]
async fn test_status_reports_submitted_instance() {
    let router = default_router(InMemoryStore::new());
    let (_, submitted) = post_json(router.clone(), "/api/site", json!({ "url": URL })).await;
    let id = submitted["data"]["instanceId"].as_str().unwrap().to_string();

    let (status, body) = get(router, &format!("/api/workflow/{}", id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["instanceId"], id.as_str());
    let state = body["data"]["status"].as_str().unwrap();
    assert!(["queued", "running", "complete"].contains(&state), "status {}", state);
}

#[tokio::test]
async fn test_status_of_unknown_instance_is_404() {
    let (status, body) = get(default_router(InMemoryStore::new()), "/api/workflow/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_ask_answers_from_ingested_repository() {
    let store = InMemoryStore::new();
    seed_repository(&store).await;

    let (status, body) = post_json(
        router(
            store,
            FakeGenerator::replying("It defines a."),
            FakeAuthorizer::allowing(),
        ),
        "/api/ask",
        json!({ "url": URL, "question": "What is in a.rs?" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "It defines a.");
}

#[tokio::test]
async fn test_ask_unknown_repository_is_404() {
    let (status, body) = post_json(
        default_router(InMemoryStore::new()),
        "/api/ask",
        json!({ "url": URL, "question": "anything?" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "repo not found in db");
}

#[tokio::test]
async fn test_ask_denied_access_is_403() {
    let store = InMemoryStore::new();
    seed_repository(&store).await;

    let (status, body) = post_json(
        router(store, FakeGenerator::replying("unused"), FakeAuthorizer::denying()),
        "/api/ask",
        json!({ "url": URL, "question": "anything?", "token": "bad" }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_ask_generation_failure_hides_details() {
    let store = InMemoryStore::new();
    seed_repository(&store).await;

    let (status, body) = post_json(
        router(
            store,
            FakeGenerator::failing("upstream secret detail"),
            FakeAuthorizer::allowing(),
        ),
        "/api/ask",
        json!({ "url": URL, "question": "anything?" }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "internal server error");
}
