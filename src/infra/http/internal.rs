//! Operator and CMS-facing endpoints, served on the internal listener only.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::{
    application::error::{AppError, HttpError},
    cache::{ContentEvent, InvalidationCoordinator},
};

use super::{
    middleware::{log_responses, set_request_context},
    store_health_response,
};

const SOURCE: &str = "infra::http::internal";

#[derive(Clone)]
pub struct InternalState {
    pub coordinator: Arc<InvalidationCoordinator>,
    /// Shared secret expected as a bearer token. `None` leaves the
    /// endpoints open, which is only acceptable on a private listener.
    pub webhook_token: Option<Arc<str>>,
}

pub fn build_internal_router(state: InternalState) -> Router {
    let protected = Router::new()
        .route("/_internal/content-events", post(content_event))
        .route("/_internal/cache/clear", post(clear_cache))
        .route("/_internal/cache/purge", post(purge_prefix))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_token,
        ));

    Router::new()
        .route("/_internal/health", get(health))
        .merge(protected)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn require_internal_token(
    State(state): State<InternalState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.webhook_token.as_deref() else {
        return next.run(request).await;
    };

    let authorized = extract_token(request.headers())
        .map(|provided| {
            provided
                .as_bytes()
                .ct_eq(expected.as_bytes())
                .unwrap_u8()
                == 1
        })
        .unwrap_or(false);

    if !authorized {
        return HttpError::new(
            SOURCE,
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "missing or invalid internal token",
        )
        .into_response();
    }

    next.run(request).await
}

fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn content_event(
    State(state): State<InternalState>,
    Json(event): Json<ContentEvent>,
) -> Result<Response, AppError> {
    match state.coordinator.entity_saved(&event).await? {
        Some(report) => Ok((StatusCode::OK, Json(report)).into_response()),
        None => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "ignored", "kind": event.kind.as_str() })),
        )
            .into_response()),
    }
}

async fn clear_cache(State(state): State<InternalState>) -> Result<Response, AppError> {
    let report = state.coordinator.clear_all().await?;
    info!(removed = report.removed, "Page cache cleared by operator");
    Ok(Json(report).into_response())
}

#[derive(Debug, Deserialize)]
struct PurgeRequest {
    prefix: String,
}

async fn purge_prefix(
    State(state): State<InternalState>,
    Json(body): Json<PurgeRequest>,
) -> Result<Response, AppError> {
    let prefix = body.prefix.trim();
    if !prefix.starts_with('/') {
        return Err(AppError::validation("prefix must start with `/`"));
    }

    let report = state.coordinator.purge_prefix(prefix).await?;
    Ok(Json(report).into_response())
}

async fn health(State(state): State<InternalState>) -> Response {
    store_health_response(state.coordinator.store().health_check().await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer s3cret"),
        );
        assert_eq!(extract_token(&headers), Some("s3cret"));
    }

    #[test]
    fn other_schemes_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_token(&headers), None);
    }
}
