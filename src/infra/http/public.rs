use std::sync::Arc;

use axum::{Router, middleware};

use crate::cache::{CacheState, classify_viewer, page_cache_layer};

use super::{
    middleware::{log_responses, set_request_context},
    upstream::{UpstreamRenderer, proxy_to_origin},
};

/// Public site: every path is proxied to the origin through the page cache.
pub fn build_public_router(cache: CacheState, renderer: Arc<UpstreamRenderer>) -> Router {
    let origin = Router::new().fallback(proxy_to_origin).with_state(renderer);
    with_page_cache(origin, cache)
}

/// Wrap a rendering router with the page cache gate.
///
/// The viewer classifier runs outside the gate so the gate can read the
/// classification from request extensions.
pub fn with_page_cache(renderer: Router, cache: CacheState) -> Router {
    renderer
        .layer(middleware::from_fn_with_state(
            cache.clone(),
            page_cache_layer,
        ))
        .layer(middleware::from_fn_with_state(cache, classify_viewer))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}
