#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;

use picksearch_api::config::Config;
use picksearch_api::create_router;
use picksearch_api::services::session_cache::MemorySessionCache;
use picksearch_api::services::store::MemoryStore;
use picksearch_api::services::AppState;

/// Build the real router on the in-memory backends; no external
/// infrastructure needed.
pub async fn create_test_app() -> Router {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    std::env::set_var("RATE_LIMIT_DISABLED", "1");

    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemorySessionCache::new());
    let app_state = Arc::new(AppState::with_backends(
        Config::for_testing(),
        store,
        cache,
    ));

    create_router(app_state)
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub async fn put_json(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Create a survey, save its questions, and open it for respondents.
/// Returns (survey_id, secret_key, completion_secret_code).
pub async fn seed_open_survey(
    app: &Router,
    survey_type: &str,
    questions: serde_json::Value,
) -> (String, String, String) {
    let (status, survey) = post_json(
        app,
        "/api/v1/surveys/",
        serde_json::json!({
            "owner_id": "owner-1",
            "title": "Integration survey",
            "survey_type": survey_type,
            "target_participants": 100,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "survey create failed: {survey}");

    let id = survey["_id"].as_str().unwrap().to_string();
    let secret_key = survey["secret_key"].as_str().unwrap().to_string();
    let code = survey["completion_secret_code"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) =
        put_json(app, &format!("/api/v1/surveys/{}/questions", id), questions).await;
    assert_eq!(status, StatusCode::OK, "question save failed: {body}");

    let (status, body) = post_json(
        app,
        &format!("/api/v1/surveys/{}/status", id),
        serde_json::json!({ "status": "open" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "survey open failed: {body}");

    (id, secret_key, code)
}
