//! Rate-limit enforcement.
//!
//! Every request is counted against its client IP, keyed by the request
//! path; the login endpoint gets a much tighter window. Requests carrying a
//! valid access token are additionally counted per user, so one account
//! cannot spread load across addresses. A limiter database error fails
//! closed with the generic 500 envelope.

use axum::extract::{Extension, Request};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

use crate::api::extract;
use crate::api::response::{error_response, error_with_details, ErrorCode};
use crate::api::ApiConfig;
use crate::rate_limit::{self, IdentifierKind, RateLimitVerdict};
use crate::store::GarageDb;
use crate::tokens::TokenService;

pub async fn rate_limit(
    Extension(GarageDb(pool)): Extension<GarageDb>,
    Extension(config): Extension<Arc<ApiConfig>>,
    Extension(tokens): Extension<Arc<TokenService>>,
    request: Request,
    next: Next,
) -> Response {
    let now = unix_now();
    let ip = extract::client_ip(&request).unwrap_or_else(|| "unknown".to_string());
    let path = request.uri().path().to_string();
    let policy = config.limits();

    let ip_verdict = match rate_limit::check(
        &pool,
        policy,
        &ip,
        IdentifierKind::Ip,
        Some(path.as_str()),
        now,
    )
    .await
    {
        Ok(verdict) => verdict,
        Err(err) => {
            error!("Rate limiter unavailable: {:#}", err);
            return internal_error();
        }
    };
    if !ip_verdict.allowed {
        return too_many_requests(ip_verdict, now);
    }

    // Token validation here is signature-only and cheap; the auth layer
    // still owns the authoritative check.
    let user_id = extract::bearer_token(request.headers())
        .and_then(|token| tokens.validate_access_token(token))
        .map(|claims| claims.sub);

    let mut effective = ip_verdict;
    if let Some(user_id) = user_id {
        let user_verdict = match rate_limit::check(
            &pool,
            policy,
            &user_id.to_string(),
            IdentifierKind::User,
            Some(path.as_str()),
            now,
        )
        .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                error!("Rate limiter unavailable: {:#}", err);
                return internal_error();
            }
        };
        if !user_verdict.allowed {
            return too_many_requests(user_verdict, now);
        }
        effective = user_verdict;
    }

    let mut response = next.run(request).await;
    set_limit_headers(&mut response, effective);
    response
}

fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::InternalError,
        "An unexpected error occurred",
    )
}

fn too_many_requests(verdict: RateLimitVerdict, now: i64) -> Response {
    let retry_after = verdict.retry_after(now).max(1);
    let mut response = error_with_details(
        StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::RateLimited,
        "Too many requests, slow down",
        json!({"retry_after": retry_after}),
    );
    set_limit_headers(&mut response, verdict);
    response
        .headers_mut()
        .insert("retry-after", int_header(retry_after));
    response
}

fn set_limit_headers(response: &mut Response, verdict: RateLimitVerdict) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", int_header(verdict.limit));
    headers.insert("x-ratelimit-remaining", int_header(verdict.remaining));
    headers.insert("x-ratelimit-reset", int_header(verdict.reset));
}

fn int_header(value: i64) -> HeaderValue {
    HeaderValue::from(value)
}

fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}
