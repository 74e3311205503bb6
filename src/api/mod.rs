use crate::{
    cli::globals::GlobalArgs,
    rate_limit::{RateLimitPolicy, RateLimitRule},
    store::{GarageDb, WpDb},
    tokens::{secret, TokenService},
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::from_fn,
    response::Response,
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::{any::Any, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::{CatchPanicLayer, ResponseForPanic},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn, Span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub mod extract;
pub mod handlers;
pub mod middleware;
mod openapi;
pub mod response;
pub mod validate;

pub use openapi::openapi;

use response::{error_response, error_with_details, ErrorCode};

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Token issuer name embedded in every access token.
pub const TOKEN_ISSUER: &str = "garageminder-api";

const DEFAULT_ACCESS_TTL: i64 = 1800;
const DEFAULT_REFRESH_TTL: i64 = 30 * 24 * 3600;
const CLEANUP_INTERVAL_SECONDS: u64 = 3600;

/// Runtime configuration shared through request extensions.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    issuer: String,
    access_ttl: i64,
    refresh_ttl: i64,
    cors_origins: Vec<String>,
    debug: bool,
    user_limit: RateLimitRule,
    ip_limit: RateLimitRule,
    login_limit: RateLimitRule,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            issuer: TOKEN_ISSUER.to_string(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            cors_origins: Vec::new(),
            debug: false,
            user_limit: RateLimitRule {
                max_requests: 100,
                window_seconds: 60,
            },
            ip_limit: RateLimitRule {
                max_requests: 200,
                window_seconds: 60,
            },
            login_limit: RateLimitRule {
                max_requests: 10,
                window_seconds: 300,
            },
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub const fn with_access_ttl(mut self, seconds: i64) -> Self {
        self.access_ttl = seconds;
        self
    }

    #[must_use]
    pub const fn with_refresh_ttl(mut self, seconds: i64) -> Self {
        self.refresh_ttl = seconds;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub const fn access_ttl(&self) -> i64 {
        self.access_ttl
    }

    #[must_use]
    pub const fn refresh_ttl(&self) -> i64 {
        self.refresh_ttl
    }

    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }

    #[must_use]
    pub const fn user_limit(&self) -> RateLimitRule {
        self.user_limit
    }

    #[must_use]
    pub const fn ip_limit(&self) -> RateLimitRule {
        self.ip_limit
    }

    #[must_use]
    pub const fn login_limit(&self) -> RateLimitRule {
        self.login_limit
    }

    #[must_use]
    pub const fn limits(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            ip: self.ip_limit,
            user: self.user_limit,
            login: self.login_limit,
        }
    }

    /// An origin passes when allowlisted exactly or the list carries `*`.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.cors_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: &str, wp_dsn: &str, globals: &GlobalArgs) -> Result<()> {
    // Signing secret first so a bad file fails before any port binds
    let signing_secret = secret::load_or_generate(&globals.secret_file)?;

    let garage_pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to garage database")?;

    let wp_pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(wp_dsn)
        .await
        .context("Failed to connect to identity database")?;

    let config = Arc::new(
        ApiConfig::new()
            .with_cors_origins(globals.cors_origins.clone())
            .with_debug(globals.debug),
    );

    let tokens = Arc::new(TokenService::new(
        garage_pool.clone(),
        signing_secret,
        config.issuer().to_string(),
        config.access_ttl(),
        config.refresh_ttl(),
    ));

    // Background task prunes expired and long-revoked refresh tokens
    spawn_token_cleanup(tokens.clone());

    let (router, _openapi) = router().split_for_parts();
    let app = router
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(axum::Extension(config.clone()))
                .layer(axum::Extension(WpDb(wp_pool)))
                .layer(axum::Extension(GarageDb(garage_pool)))
                .layer(axum::Extension(tokens))
                .layer(from_fn(middleware::cors::cors))
                .layer(from_fn(middleware::request_log::request_log))
                .layer(CatchPanicLayer::custom(PanicResponder {
                    debug: config.debug(),
                }))
                .layer(from_fn(middleware::rate_limit::rate_limit)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn spawn_token_cleanup(tokens: Arc<TokenService>) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECONDS));
        loop {
            interval.tick().await;
            match tokens.cleanup().await {
                Ok(0) => {}
                Ok(removed) => info!("Cleaned up {} stale refresh tokens", removed),
                Err(err) => warn!("Refresh token cleanup failed: {:#}", err),
            }
        }
    });
}

/// Envelope 404 for unmatched paths.
pub async fn not_found() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorCode::NotFound,
        "Resource not found",
    )
}

/// Envelope 405 for matched paths with the wrong method.
pub async fn method_not_allowed() -> Response {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        ErrorCode::MethodNotAllowed,
        "Method not allowed for this resource",
    )
}

/// Panic boundary: turns a panicking handler into the generic 500 envelope.
/// Panic payloads reach the client only in debug mode.
#[derive(Clone)]
struct PanicResponder {
    debug: bool,
}

impl ResponseForPanic for PanicResponder {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response {
        let detail = err
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| err.downcast_ref::<&str>().map(ToString::to_string));
        error!(
            "Handler panicked: {}",
            detail.as_deref().unwrap_or("<non-string payload>")
        );

        if self.debug {
            error_with_details(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                "An unexpected error occurred",
                json!({ "panic": detail }),
            )
        } else {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                "An unexpected error occurred",
            )
        }
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.issuer(), "garageminder-api");
        assert_eq!(config.access_ttl(), 1800);
        assert_eq!(config.refresh_ttl(), 2_592_000);
        assert_eq!(config.user_limit().max_requests, 100);
        assert_eq!(config.ip_limit().max_requests, 200);
        assert_eq!(config.login_limit().max_requests, 10);
        assert_eq!(config.login_limit().window_seconds, 300);
        assert!(!config.debug());
    }

    #[test]
    fn origin_allowlist() {
        let config = ApiConfig::new()
            .with_cors_origins(vec!["https://app.example.com".to_string()]);
        assert!(config.origin_allowed("https://app.example.com"));
        assert!(!config.origin_allowed("https://evil.example.com"));

        let wildcard = ApiConfig::new().with_cors_origins(vec!["*".to_string()]);
        assert!(wildcard.origin_allowed("https://anything.example.com"));

        let empty = ApiConfig::new();
        assert!(!empty.origin_allowed("https://app.example.com"));
    }
}
