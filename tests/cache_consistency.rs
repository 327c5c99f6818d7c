//! End-to-end behaviour of the page cache: gate, store and coordinator wired
//! together around a call-counting renderer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use http_body_util::BodyExt;
use httpmock::MockServer;
use roamcache::cache::{
    CacheConfig, CacheEntry, CacheState, CdnOutcome, ChangeKind, CloudflareConfig,
    CloudflarePurger, ContentEvent, InvalidationCoordinator, InvalidationTarget, MemoryPageStore,
    PAGE_CACHE_HEADER, PageStore, StoreError,
};
use roamcache::domain::entities::{DestinationRef, ItineraryDayRecord, TourRecord};
use roamcache::domain::invalidation::content_registry;
use roamcache::domain::types::EntityKind;
use roamcache::infra::http::with_page_cache;
use serde_json::json;
use tower::ServiceExt;
use url::Url;

#[derive(Clone, Default)]
struct Renders(Arc<AtomicUsize>);

impl Renders {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

async fn tours(State(renders): State<Renders>) -> Html<&'static str> {
    renders.bump();
    Html("<main><h1>All tours</h1></main>")
}

async fn tour(State(renders): State<Renders>) -> Html<&'static str> {
    renders.bump();
    Html("<main><h1>Lake Baikal in winter</h1></main>")
}

async fn missing(State(renders): State<Renders>) -> Response {
    renders.bump();
    (StatusCode::NOT_FOUND, Html("<h1>Not found</h1>")).into_response()
}

async fn api(State(renders): State<Renders>) -> Json<serde_json::Value> {
    renders.bump();
    Json(json!({ "ok": true }))
}

struct Harness {
    router: Router,
    store: Arc<MemoryPageStore>,
    renders: Renders,
}

fn harness(config: CacheConfig) -> Harness {
    let store = Arc::new(MemoryPageStore::new());
    let renders = Renders::default();
    let renderer = Router::new()
        .route("/tours/", get(tours))
        .route("/tour/{slug}", get(tour).post(tour))
        .route("/admin/", get(tours))
        .route("/missing", get(missing))
        .route("/api/data", get(api))
        .with_state(renders.clone());

    let router = with_page_cache(renderer, CacheState::new(config, store.clone()));
    Harness {
        router,
        store,
        renders,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String, String) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let marker = response
        .headers()
        .get(PAGE_CACHE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    (
        status,
        marker,
        String::from_utf8(body.to_vec()).expect("utf-8 body"),
    )
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

fn coordinator(store: Arc<MemoryPageStore>) -> InvalidationCoordinator {
    InvalidationCoordinator::new(store, Arc::new(content_registry()))
}

async fn seed(store: &MemoryPageStore, urls: &[&str]) {
    for url in urls {
        store.put(url, "<p>cached</p>").await.expect("put");
    }
}

#[tokio::test]
async fn clear_is_idempotent() {
    let store = Arc::new(MemoryPageStore::new());
    seed(&store, &["/", "/tours/", "/tour/baikal"]).await;
    let coordinator = coordinator(store.clone());

    let first = coordinator.clear_all().await.expect("clear");
    let second = coordinator.clear_all().await.expect("clear again");

    assert_eq!(first.removed, 3);
    assert_eq!(second.removed, 0);
    assert_eq!(store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn prefix_invalidation_removes_only_matching_urls() {
    let store = Arc::new(MemoryPageStore::new());
    seed(
        &store,
        &["/tour/baikal", "/tour/altai", "/tours/", "/region/siberia"],
    )
    .await;

    let report = coordinator(store.clone())
        .purge_prefix("/tour/")
        .await
        .expect("purge");

    assert_eq!(report.removed, 2);
    assert!(store.get("/tour/baikal").await.expect("get").is_none());
    assert!(store.get("/tours/").await.expect("get").is_some());
    assert!(store.get("/region/siberia").await.expect("get").is_some());
}

#[tokio::test]
async fn duplicate_entries_heal_on_read() {
    let store = MemoryPageStore::new();
    store.put("/tours/", "<p>first</p>").await.expect("put");
    store.put("/tours/", "<p>second</p>").await.expect("put");

    let entry = store.get("/tours/").await.expect("get").expect("entry");

    assert_eq!(entry.content, "<p>first</p>");
    assert_eq!(store.count().await.expect("count"), 1);
}

#[tokio::test]
async fn ineligible_requests_bypass_the_store() {
    let h = harness(CacheConfig::default());

    let (_, marker, _) = send(&h.router, get_request("/tours/?page=2")).await;
    assert_eq!(marker, "BYPASS; reason=query-string");

    let request = Request::builder()
        .uri("/tours/")
        .header(header::COOKIE, "sessionid=abc123")
        .body(Body::empty())
        .expect("request builds");
    let (_, marker, _) = send(&h.router, request).await;
    assert_eq!(marker, "BYPASS; reason=authenticated");

    let (_, marker, _) = send(&h.router, get_request("/admin/")).await;
    assert_eq!(marker, "BYPASS; reason=bypass-path");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/tour/baikal")
        .body(Body::empty())
        .expect("request builds");
    let (_, marker, _) = send(&h.router, request).await;
    assert_eq!(marker, "BYPASS; reason=method");

    assert_eq!(h.renders.count(), 4);
    assert_eq!(h.store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn disabled_cache_bypasses_everything() {
    let h = harness(CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    });

    send(&h.router, get_request("/tours/")).await;
    let (_, marker, _) = send(&h.router, get_request("/tours/")).await;

    assert_eq!(marker, "BYPASS; reason=disabled");
    assert_eq!(h.renders.count(), 2);
}

#[tokio::test]
async fn authenticated_responses_are_marked_uncacheable() {
    let h = harness(CacheConfig::default());
    let request = Request::builder()
        .uri("/tours/")
        .header(header::COOKIE, "sessionid=abc123")
        .body(Body::empty())
        .expect("request builds");

    let response = h.router.clone().oneshot(request).await.expect("response");

    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("no-cache, no-store, must-revalidate")
    );
    assert_eq!(
        response
            .headers()
            .get(header::PRAGMA)
            .and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );
}

#[tokio::test]
async fn miss_then_hit_renders_once() {
    let h = harness(CacheConfig::default());

    let (status, marker, first_body) = send(&h.router, get_request("/tours/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marker, "MISS");

    let (status, marker, second_body) = send(&h.router, get_request("/tours/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marker, "HIT");
    assert_eq!(first_body, second_body);

    assert_eq!(h.renders.count(), 1);
}

#[tokio::test]
async fn head_is_served_from_cache_but_never_stored() {
    let h = harness(CacheConfig::default());
    let head = || {
        Request::builder()
            .method(Method::HEAD)
            .uri("/tours/")
            .body(Body::empty())
            .expect("request builds")
    };

    let (_, marker, _) = send(&h.router, head()).await;
    assert_eq!(marker, "MISS; not-stored=head");
    assert_eq!(h.store.count().await.expect("count"), 0);

    send(&h.router, get_request("/tours/")).await;
    let (_, marker, body) = send(&h.router, head()).await;
    assert_eq!(marker, "HIT");
    assert!(body.is_empty());
}

#[tokio::test]
async fn tour_write_invalidates_its_pages() {
    let h = harness(CacheConfig::default());
    send(&h.router, get_request("/tour/baikal")).await;
    send(&h.router, get_request("/tours/")).await;
    assert_eq!(h.renders.count(), 2);

    let tour = TourRecord {
        slug: "baikal".to_string(),
        name: "Lake Baikal in winter".to_string(),
        destinations: vec![DestinationRef {
            slug: "irkutsk".to_string(),
            region: Some("siberia".to_string()),
        }],
    };
    let report = coordinator(h.store.clone())
        .saved(&tour, None)
        .await
        .expect("invalidation");
    assert_eq!(report.removed, 2);

    let (_, marker, _) = send(&h.router, get_request("/tour/baikal")).await;
    assert_eq!(marker, "MISS");
    assert_eq!(h.renders.count(), 3);
}

#[tokio::test]
async fn global_write_clears_every_page() {
    let h = harness(CacheConfig::default());
    send(&h.router, get_request("/tour/baikal")).await;
    send(&h.router, get_request("/tours/")).await;

    let event = ContentEvent::new(
        EntityKind::SiteSettings,
        ChangeKind::Updated,
        json!({ "site_title": "Roam Siberia" }),
    );
    let report = coordinator(h.store.clone())
        .entity_saved(&event)
        .await
        .expect("invalidation")
        .expect("site settings are registered");

    assert_eq!(report.target, InvalidationTarget::All);
    assert_eq!(report.removed, 2);
    assert_eq!(h.store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn non_cacheable_responses_pass_through() {
    let h = harness(CacheConfig::default());

    let (status, marker, _) = send(&h.router, get_request("/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(marker, "MISS; not-stored=status");

    let (status, marker, body) = send(&h.router, get_request("/api/data")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marker, "MISS; not-stored=content-type");
    assert_eq!(body, r#"{"ok":true}"#);

    assert_eq!(h.store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn oversized_pages_are_not_stored() {
    let h = harness(CacheConfig {
        body_limit_bytes: 8,
        ..CacheConfig::default()
    });

    let (status, marker, body) = send(&h.router, get_request("/tours/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(marker, "MISS; not-stored=too-large");
    assert_eq!(body, "<main><h1>All tours</h1></main>");
    assert_eq!(h.store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn cdn_failure_does_not_undo_local_invalidation() {
    let server = MockServer::start_async().await;
    let purge = server
        .mock_async(|when, then| {
            when.method("POST").path("/zones/zone-1/purge_cache");
            then.status(500).body("upstream exploded");
        })
        .await;

    let store = Arc::new(MemoryPageStore::new());
    seed(&store, &["/tour/baikal", "/region/siberia"]).await;

    let purger = CloudflarePurger::new(CloudflareConfig {
        api_base: Url::parse(&server.base_url()).expect("mock url"),
        zone_id: "zone-1".to_string(),
        api_token: "token".to_string(),
        site: Url::parse("https://roam.example").expect("site url"),
        timeout: Duration::from_secs(2),
    })
    .expect("purger builds");
    let coordinator = coordinator(store.clone()).with_cdn(Arc::new(purger));

    let report = coordinator
        .purge_prefix("/tour/")
        .await
        .expect("local invalidation succeeds");

    purge.assert_async().await;
    assert_eq!(report.removed, 1);
    assert!(matches!(report.cdn, CdnOutcome::Failed { .. }));
    assert!(store.get("/tour/baikal").await.expect("get").is_none());
    assert!(store.get("/region/siberia").await.expect("get").is_some());
}

#[tokio::test]
async fn encoded_paths_share_the_decoded_cache_key() {
    let h = harness(CacheConfig::default());

    let (_, marker, _) = send(&h.router, get_request("/tour/silk%2Droad")).await;
    assert_eq!(marker, "MISS");
    assert!(h.store.get("/tour/silk-road").await.expect("get").is_some());

    let (_, marker, _) = send(&h.router, get_request("/tour/silk-road")).await;
    assert_eq!(marker, "HIT");
    assert_eq!(h.renders.count(), 1);

    let day = ItineraryDayRecord {
        tour: "silk-road".to_string(),
        day: 2,
        title: "Samarkand".to_string(),
    };
    let report = coordinator(h.store.clone())
        .saved(&day, None)
        .await
        .expect("invalidation");
    assert_eq!(report.removed, 1);

    let (_, marker, _) = send(&h.router, get_request("/tour/silk%2Droad")).await;
    assert_eq!(marker, "MISS");
    assert_eq!(h.renders.count(), 2);
}

#[tokio::test]
async fn undecodable_paths_bypass_the_store() {
    let h = harness(CacheConfig::default());

    let (status, marker, _) = send(&h.router, get_request("/tour/%FF")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(marker, "BYPASS; reason=undecodable-path");
    assert_eq!(h.store.count().await.expect("count"), 0);
}

/// Store whose backend never answers in time.
struct UnavailableStore;

#[async_trait]
impl PageStore for UnavailableStore {
    async fn get(&self, _url: &str) -> Result<Option<CacheEntry>, StoreError> {
        Err(StoreError::Timeout)
    }

    async fn put(&self, _url: &str, _content: &str) -> Result<(), StoreError> {
        Err(StoreError::Timeout)
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<usize, StoreError> {
        Err(StoreError::Timeout)
    }

    async fn delete_exact(&self, _url: &str) -> Result<usize, StoreError> {
        Err(StoreError::Timeout)
    }

    async fn clear_all(&self) -> Result<usize, StoreError> {
        Err(StoreError::Timeout)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Err(StoreError::Timeout)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Err(StoreError::Timeout)
    }
}

/// Store that can read but rejects every write.
struct ReadOnlyStore(MemoryPageStore);

#[async_trait]
impl PageStore for ReadOnlyStore {
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.0.get(url).await
    }

    async fn put(&self, _url: &str, _content: &str) -> Result<(), StoreError> {
        Err(StoreError::Timeout)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        self.0.delete_prefix(prefix).await
    }

    async fn delete_exact(&self, url: &str) -> Result<usize, StoreError> {
        self.0.delete_exact(url).await
    }

    async fn clear_all(&self) -> Result<usize, StoreError> {
        self.0.clear_all().await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.0.count().await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn tours_router(store: Arc<dyn PageStore>, renders: &Renders) -> Router {
    let renderer = Router::new()
        .route("/tours/", get(tours))
        .with_state(renders.clone());
    with_page_cache(renderer, CacheState::new(CacheConfig::default(), store))
}

#[tokio::test]
async fn store_lookup_failure_renders_fresh() {
    let renders = Renders::default();
    let router = tours_router(Arc::new(UnavailableStore), &renders);

    for _ in 0..2 {
        let (status, marker, body) = send(&router, get_request("/tours/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(marker, "MISS; not-stored=store-unavailable");
        assert_eq!(body, "<main><h1>All tours</h1></main>");
    }
    assert_eq!(renders.count(), 2);
}

#[tokio::test]
async fn store_write_failure_still_serves_the_render() {
    let renders = Renders::default();
    let router = tours_router(Arc::new(ReadOnlyStore(MemoryPageStore::new())), &renders);

    let (status, marker, body) = send(&router, get_request("/tours/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marker, "MISS; not-stored=store-unavailable");
    assert_eq!(body, "<main><h1>All tours</h1></main>");

    let (_, marker, _) = send(&router, get_request("/tours/")).await;
    assert_eq!(marker, "MISS; not-stored=store-unavailable");
    assert_eq!(renders.count(), 2);
}
