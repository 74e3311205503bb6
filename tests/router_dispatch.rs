//! Router dispatch and pipeline behavior that needs no database: envelope
//! fallbacks, path captures, middleware ordering and the CORS layer.

use axum::body::Body;
use axum::extract::{Path, Request};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Router};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use garageminder::api::{self, middleware::cors, middleware::rate_limit, ApiConfig};
use garageminder::store::GarageDb;
use garageminder::tokens::TokenService;

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn full_router() -> Router {
    let (router, _openapi) = api::router().split_for_parts();
    router
        .fallback(api::not_found)
        .method_not_allowed_fallback(api::method_not_allowed)
}

#[tokio::test]
async fn unknown_path_is_enveloped_404() {
    let response = full_router()
        .oneshot(
            Request::builder()
                .uri("/no/such/path")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], Value::Bool(false));
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn wrong_method_is_enveloped_405() {
    // /health exists but only as GET
    let response = full_router()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "METHOD_NOT_ALLOWED");
}

#[tokio::test]
async fn path_capture_matches_one_segment() {
    let app = Router::new().route(
        "/vehicles/{id}",
        get(|Path(id): Path<String>| async move { id }),
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/vehicles/abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"abc-123");

    // captures never span a slash
    let response = app
        .oneshot(
            Request::builder()
                .uri("/vehicles/a/b")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

async fn trace_alpha(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .append("x-trace", HeaderValue::from_static("alpha"));
    response
}

async fn trace_beta(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .append("x-trace", HeaderValue::from_static("beta"));
    response
}

async fn block_flagged(request: Request, next: Next) -> Response {
    if request.headers().contains_key("x-block") {
        return Response::builder()
            .status(StatusCode::FORBIDDEN)
            .body(Body::empty())
            .unwrap();
    }
    next.run(request).await
}

#[tokio::test]
async fn later_layers_wrap_earlier_ones() {
    // beta is added last, so it is outermost and appends after alpha
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .layer(from_fn(trace_alpha))
        .layer(from_fn(trace_beta));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let traces: Vec<_> = response
        .headers()
        .get_all("x-trace")
        .iter()
        .map(|value| value.to_str().unwrap())
        .collect();
    assert_eq!(traces, vec!["alpha", "beta"]);
}

#[tokio::test]
async fn short_circuit_skips_inner_layers_and_handler() {
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .layer(from_fn(trace_alpha))
        .layer(from_fn(block_flagged));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-block", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    // inner trace layer never ran
    assert!(response.headers().get("x-trace").is_none());
}

#[tokio::test]
async fn limiter_store_outage_fails_closed_with_500() {
    // port 1 refuses immediately; the short acquire timeout bounds the test
    let pool = sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_millis(200))
        .connect_lazy("postgres://garage@127.0.0.1:1/unreachable")
        .unwrap();
    let config = Arc::new(ApiConfig::new());
    let tokens = Arc::new(TokenService::new(
        pool.clone(),
        secrecy::SecretString::from("0123456789abcdef0123456789abcdef"),
        "garageminder-api".to_string(),
        1800,
        2_592_000,
    ));

    let app = Router::new()
        .route("/ping", get(|| async { "pong" }))
        .layer(from_fn(rate_limit::rate_limit))
        .layer(Extension(config))
        .layer(Extension(GarageDb(pool)))
        .layer(Extension(tokens));

    let response = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["success"], Value::Bool(false));
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
}

fn cors_router(origins: Vec<String>) -> Router {
    let config = Arc::new(ApiConfig::new().with_cors_origins(origins));
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .layer(from_fn(cors::cors))
        .layer(Extension(config))
}

#[tokio::test]
async fn preflight_short_circuits_with_204() {
    let app = cors_router(vec!["https://app.example.com".to_string()]);

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/anything/at/all")
                .header("origin", "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "https://app.example.com"
    );
    assert!(response.headers().contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn unlisted_origin_gets_no_cors_headers() {
    let app = cors_router(vec!["https://app.example.com".to_string()]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/ping")
                .header("origin", "https://evil.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());
    // security headers are unconditional
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
}

#[tokio::test]
async fn native_client_without_origin_passes() {
    let app = cors_router(vec!["https://app.example.com".to_string()]);

    let response = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
}
