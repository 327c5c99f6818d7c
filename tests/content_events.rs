//! Internal listener: content-event webhook and manual invalidation.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use roamcache::cache::{InvalidationCoordinator, MemoryPageStore, PageStore};
use roamcache::domain::invalidation::content_registry;
use roamcache::infra::http::{InternalState, build_internal_router};
use serde_json::{Value, json};
use tower::ServiceExt;

const TOKEN: &str = "webhook-secret";

async fn router(token: Option<&str>) -> (Router, Arc<MemoryPageStore>) {
    let store = Arc::new(MemoryPageStore::new());
    for url in ["/", "/tour/baikal", "/tours/", "/article/visa-rules", "/news/"] {
        store.put(url, "<p>cached</p>").await.expect("put");
    }

    let coordinator = InvalidationCoordinator::new(store.clone(), Arc::new(content_registry()));
    let router = build_internal_router(InternalState {
        coordinator: Arc::new(coordinator),
        webhook_token: token.map(Arc::from),
    });
    (router, store)
}

fn post_json(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn article_event_invalidates_its_pages() {
    let (router, store) = router(None).await;
    let event = json!({
        "kind": "article",
        "change": "created",
        "current": { "slug": "visa-rules", "kind": "news" }
    });

    let (status, report) = call(
        &router,
        post_json("/_internal/content-events", event, None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["source"], "article");
    assert_eq!(report["removed"], 3);
    assert_eq!(report["cdn"]["status"], "skipped");
    assert!(store.get("/tour/baikal").await.expect("get").is_some());
    assert!(store.get("/").await.expect("get").is_none());
}

#[tokio::test]
async fn inert_kind_is_acknowledged_and_ignored() {
    let (router, store) = router(None).await;
    let event = json!({
        "kind": "form_submission",
        "change": "created",
        "current": { "email": "guest@example.com" }
    });

    let (status, body) = call(
        &router,
        post_json("/_internal/content-events", event, None),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "ignored");
    assert_eq!(store.count().await.expect("count"), 5);
}

#[tokio::test]
async fn undecodable_snapshot_is_rejected() {
    let (router, store) = router(None).await;
    let event = json!({
        "kind": "tour",
        "change": "updated",
        "current": { "name": "missing slug" }
    });

    let (status, _) = call(
        &router,
        post_json("/_internal/content-events", event, None),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.count().await.expect("count"), 5);
}

#[tokio::test]
async fn token_is_required_when_configured() {
    let (router, _) = router(Some(TOKEN)).await;

    let (status, _) = call(
        &router,
        post_json("/_internal/cache/clear", json!({}), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &router,
        post_json("/_internal/cache/clear", json!({}), Some("wrong")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, report) = call(
        &router,
        post_json("/_internal/cache/clear", json!({}), Some(TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["removed"], 5);
    assert_eq!(report["target"], "all");
}

#[tokio::test]
async fn health_does_not_require_token() {
    let (router, _) = router(Some(TOKEN)).await;
    let request = Request::builder()
        .uri("/_internal/health")
        .body(Body::empty())
        .expect("request builds");

    let response = router.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn manual_purge_validates_prefix() {
    let (router, store) = router(None).await;

    let (status, _) = call(
        &router,
        post_json("/_internal/cache/purge", json!({ "prefix": "tour" }), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, report) = call(
        &router,
        post_json("/_internal/cache/purge", json!({ "prefix": "/tour" }), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["removed"], 2);
    assert_eq!(report["source"], "manual");
    assert!(store.get("/news/").await.expect("get").is_some());
}
