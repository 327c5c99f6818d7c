mod internal;
mod middleware;
mod public;
mod upstream;

pub use internal::{InternalState, build_internal_router};
pub use middleware::{RequestContext, log_responses, set_request_context};
pub use public::{build_public_router, with_page_cache};
pub use upstream::{UpstreamError, UpstreamRenderer};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{application::error::ErrorReport, cache::StoreError};

fn store_health_response(result: Result<(), StoreError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::store_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
