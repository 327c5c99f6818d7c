//! Page cache gate.
//!
//! Sits in front of the renderer. Eligible requests are answered from the
//! page store when possible; misses are rendered, captured and stored.
//! Every response carries an `x-page-cache` marker describing what happened.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::config::CacheConfig;
use super::eligibility::{
    BypassReason, Eligibility, RequestFacts, Viewer, evaluate, normalized_path,
};
use super::minify::minify_html;
use super::response::{NotStored, buffer_response, check_storable};
use super::store::{CacheEntry, PageStore};

pub const PAGE_CACHE_HEADER: HeaderName = HeaderName::from_static("x-page-cache");

const METRIC_HIT_TOTAL: &str = "roamcache_page_cache_hit_total";
const METRIC_MISS_TOTAL: &str = "roamcache_page_cache_miss_total";
const METRIC_BYPASS_TOTAL: &str = "roamcache_page_cache_bypass_total";
const METRIC_STORE_TOTAL: &str = "roamcache_page_cache_store_total";

/// Shared state for the gate and the viewer classifier.
#[derive(Clone)]
pub struct CacheState {
    pub config: Arc<CacheConfig>,
    pub store: Arc<dyn PageStore>,
}

impl CacheState {
    pub fn new(config: CacheConfig, store: Arc<dyn PageStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }
}

/// Mark the request with its [`Viewer`] and keep authenticated responses out
/// of browser and proxy caches.
///
/// Must wrap [`page_cache_layer`] so the gate sees the classification.
pub async fn classify_viewer(
    State(cache): State<CacheState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let viewer = viewer_from_cookies(request.headers(), &cache.config.session_cookie);
    request.extensions_mut().insert(viewer);

    let mut response = next.run(request).await;
    if viewer == Viewer::Authenticated {
        let headers = response.headers_mut();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    }
    response
}

pub fn viewer_from_cookies(headers: &HeaderMap, session_cookie: &str) -> Viewer {
    let has_session = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(name, value)| name == session_cookie && !value.is_empty());

    if has_session {
        Viewer::Authenticated
    } else {
        Viewer::Anonymous
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let decoded = normalized_path(request.uri().path());
    let raw_path = request.uri().path().to_string();
    let facts = RequestFacts {
        method: &method,
        path: decoded.as_deref().unwrap_or(&raw_path),
        query: request.uri().query(),
        viewer: request
            .extensions()
            .get::<Viewer>()
            .copied()
            .unwrap_or_default(),
    };

    let eligibility = match (evaluate(&cache.config, &facts), decoded) {
        (Eligibility::Eligible, Some(path)) => Ok(path),
        (Eligibility::Eligible, None) => Err(BypassReason::UndecodablePath),
        (Eligibility::NotEligible(reason), _) => Err(reason),
    };
    let path = match eligibility {
        Ok(path) => path,
        Err(reason) => {
            counter!(METRIC_BYPASS_TOTAL, "reason" => reason.as_str()).increment(1);
            debug!(
                cache = "page",
                outcome = "bypass",
                reason = reason.as_str(),
                "Bypassing page cache"
            );
            let mut response = next.run(request).await;
            set_marker(&mut response, &format!("BYPASS; reason={}", reason.as_str()));
            return response;
        }
    };

    match cache.store.get(&path).await {
        Ok(Some(entry)) => {
            counter!(METRIC_HIT_TOTAL).increment(1);
            debug!(cache = "page", outcome = "hit", "Serving cached page");
            return cached_page(entry, &method);
        }
        Ok(None) => {}
        Err(err) => {
            warn!(
                cache = "page",
                error = %err,
                "Page store lookup failed; rendering fresh"
            );
            let mut response = next.run(request).await;
            set_marker(&mut response, "MISS; not-stored=store-unavailable");
            return response;
        }
    }

    counter!(METRIC_MISS_TOTAL).increment(1);
    debug!(cache = "page", outcome = "miss", "Rendering page");

    let response = next.run(request).await;
    store_rendered(&cache, &method, &path, response).await
}

async fn store_rendered(
    cache: &CacheState,
    method: &Method,
    path: &str,
    response: Response,
) -> Response {
    let limit = cache.config.body_limit_bytes;
    if let Err(reason) = check_storable(method, &response, limit) {
        return not_stored(response, reason.as_str());
    }

    let (mut response, bytes) = match buffer_response(response).await {
        Ok(buffered) => buffered,
        Err((_, err)) => {
            warn!(cache = "page", error = %err, "Renderer body could not be read");
            let mut response = StatusCode::BAD_GATEWAY.into_response();
            set_marker(&mut response, "MISS; not-stored=body-error");
            return response;
        }
    };

    if bytes.len() > limit {
        return not_stored(response, NotStored::TooLarge.as_str());
    }
    let Ok(html) = std::str::from_utf8(&bytes) else {
        return not_stored(response, NotStored::Encoding.as_str());
    };

    let content = if cache.config.minify_html {
        minify_html(html).unwrap_or_else(|err| {
            warn!(cache = "page", error = %err, "Minification failed; storing page as rendered");
            html.to_string()
        })
    } else {
        html.to_string()
    };

    match cache.store.put(path, &content).await {
        Ok(()) => {
            counter!(METRIC_STORE_TOTAL).increment(1);
            debug!(
                cache = "page",
                rendered_bytes = bytes.len(),
                stored_bytes = content.len(),
                "Stored rendered page"
            );
            set_marker(&mut response, "MISS");
        }
        Err(err) => {
            warn!(cache = "page", error = %err, "Page store write failed");
            set_marker(&mut response, "MISS; not-stored=store-unavailable");
        }
    }

    response
}

fn not_stored(mut response: Response, reason: &str) -> Response {
    debug!(cache = "page", reason, "Rendered page not stored");
    set_marker(&mut response, &format!("MISS; not-stored={reason}"));
    response
}

fn cached_page(entry: CacheEntry, method: &Method) -> Response {
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(entry.content)
    };

    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    set_marker(&mut response, "HIT");
    response
}

fn set_marker(response: &mut Response, marker: &str) {
    if let Ok(value) = HeaderValue::from_str(marker) {
        response.headers_mut().insert(PAGE_CACHE_HEADER, value);
    }
}
