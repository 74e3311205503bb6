//! CORS and security headers.
//!
//! Native mobile clients send no `Origin` header and pass straight through.
//! Browser requests get CORS headers only when the origin is allowlisted;
//! preflight `OPTIONS` requests short-circuit with 204 and never reach the
//! router.

use axum::extract::{Extension, Request};
use axum::http::header::{HeaderValue, ORIGIN, VARY};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::api::ApiConfig;

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Device-Id";
const MAX_AGE: &str = "86400";

pub async fn cors(
    Extension(config): Extension<Arc<ApiConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let allowed_origin = origin.filter(|origin| config.origin_allowed(origin));

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_headers(response.headers_mut(), allowed_origin.as_deref());
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), allowed_origin.as_deref());
    response
}

fn apply_headers(headers: &mut HeaderMap, allowed_origin: Option<&str>) {
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    let Some(origin) = allowed_origin else {
        return;
    };
    let Ok(origin) = HeaderValue::from_str(origin) else {
        return;
    };

    headers.insert("access-control-allow-origin", origin);
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert("access-control-max-age", HeaderValue::from_static(MAX_AGE));
    // Responses differ by Origin, keep caches honest
    headers.insert(VARY, HeaderValue::from_static("Origin"));
}
