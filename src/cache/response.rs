//! Capturing rendered responses for storage.

use axum::{
    body::Body,
    http::{HeaderMap, Method, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use thiserror::Error;

/// Why a rendered response was passed through without being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotStored {
    Head,
    Status,
    ContentType,
    SetCookie,
    Encoding,
    TooLarge,
}

impl NotStored {
    pub fn as_str(self) -> &'static str {
        match self {
            NotStored::Head => "head",
            NotStored::Status => "status",
            NotStored::ContentType => "content-type",
            NotStored::SetCookie => "set-cookie",
            NotStored::Encoding => "encoding",
            NotStored::TooLarge => "too-large",
        }
    }
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("failed to buffer response body: {0}")]
    Body(String),
}

/// Decide from the head of a response whether its body is worth capturing.
pub fn check_storable(
    method: &Method,
    response: &Response,
    body_limit: usize,
) -> Result<(), NotStored> {
    if method == Method::HEAD {
        return Err(NotStored::Head);
    }
    if response.status() != StatusCode::OK {
        return Err(NotStored::Status);
    }

    let headers = response.headers();
    if !is_html(headers) {
        return Err(NotStored::ContentType);
    }
    if headers.contains_key(header::SET_COOKIE) {
        return Err(NotStored::SetCookie);
    }
    if headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| !value.eq_ignore_ascii_case("identity"))
    {
        return Err(NotStored::Encoding);
    }
    if headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
        .is_some_and(|length| length > body_limit)
    {
        return Err(NotStored::TooLarge);
    }

    Ok(())
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("text/html")
        })
}

/// Collect the whole body, handing back a rebuilt response carrying the same
/// bytes alongside a copy for the store.
pub async fn buffer_response(
    response: Response,
) -> Result<(Response, Bytes), (Response, BufferError)> {
    let (parts, body) = response.into_parts();
    match BodyExt::collect(body).await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let rebuilt = Response::from_parts(parts, Body::from(bytes.clone()));
            Ok((rebuilt, bytes))
        }
        Err(error) => {
            let rebuilt = Response::from_parts(parts, Body::empty());
            Err((rebuilt, BufferError::Body(error.to_string())))
        }
    }
}
