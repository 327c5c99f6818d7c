//! Reverse proxy to the CMS origin that renders pages.

use std::sync::Arc;

use axum::{
    body::{self, Body},
    extract::State,
    http::{HeaderMap, HeaderName, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use reqwest::{Client, redirect};
use thiserror::Error;
use url::Url;

use crate::{application::error::HttpError, config::UpstreamSettings, infra::error::InfraError};

const SOURCE: &str = "infra::http::upstream";
const REQUEST_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// Hop-by-hop headers plus the ones the proxy recomputes itself.
/// `accept-encoding` is dropped so the origin answers uncompressed and the
/// page can be stored as text.
const SKIPPED_REQUEST_HEADERS: &[HeaderName] = &[
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
    header::ACCEPT_ENCODING,
];

const SKIPPED_RESPONSE_HEADERS: &[HeaderName] = &[
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("origin request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("cannot build origin url for `{path}`: {source}")]
    InvalidUrl {
        path: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },
}

impl UpstreamError {
    fn into_http(self) -> HttpError {
        match &self {
            UpstreamError::Request(err) if err.is_timeout() => HttpError::from_error(
                SOURCE,
                StatusCode::GATEWAY_TIMEOUT,
                "Origin timed out",
                &self,
            ),
            UpstreamError::RequestTooLarge { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large",
                &self,
            ),
            UpstreamError::Request(_) | UpstreamError::InvalidUrl { .. } => {
                HttpError::from_error(SOURCE, StatusCode::BAD_GATEWAY, "Origin unavailable", &self)
            }
        }
    }
}

/// Renders pages by forwarding the request to the CMS origin.
#[derive(Clone)]
pub struct UpstreamRenderer {
    client: Client,
    origin: Url,
}

impl UpstreamRenderer {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|err| {
                InfraError::configuration(format!("failed to build upstream client: {err}"))
            })?;

        Ok(Self {
            client,
            origin: settings.origin.clone(),
        })
    }

    pub async fn render(&self, request: Request<Body>) -> Result<Response, UpstreamError> {
        let (parts, body) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|value| value.as_str())
            .unwrap_or("/");
        let url = self
            .origin
            .join(path_and_query)
            .map_err(|source| UpstreamError::InvalidUrl {
                path: path_and_query.to_string(),
                source,
            })?;

        let body = body::to_bytes(body, REQUEST_BODY_LIMIT_BYTES)
            .await
            .map_err(|_| UpstreamError::RequestTooLarge {
                limit: REQUEST_BODY_LIMIT_BYTES,
            })?;

        let mut headers = forwarded_headers(&parts.headers, SKIPPED_REQUEST_HEADERS);
        if let Some(host) = parts.headers.get(header::HOST) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
        }

        let origin_response = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = origin_response.status();
        let headers = forwarded_headers(origin_response.headers(), SKIPPED_RESPONSE_HEADERS);
        let bytes = origin_response.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn forwarded_headers(source: &HeaderMap, skipped: &[HeaderName]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(source.len());
    for (name, value) in source {
        if !skipped.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Fallback handler for the public router.
pub async fn proxy_to_origin(
    State(renderer): State<Arc<UpstreamRenderer>>,
    request: Request<Body>,
) -> Response {
    match renderer.render(request).await {
        Ok(response) => response,
        Err(err) => err.into_http().into_response(),
    }
}
