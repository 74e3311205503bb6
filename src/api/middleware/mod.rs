//! Request pipeline.
//!
//! Layer order is outermost first: CORS, request logging, rate limiting,
//! then authentication, with the admin gate stacked on top of auth for the
//! admin router only. The logger runs outside auth, so the authenticated
//! user id travels back to it through a response extension.

pub mod admin;
pub mod auth;
pub mod cors;
pub mod rate_limit;
pub mod request_log;

/// Authenticated WordPress user, inserted into request extensions by the
/// auth middleware for handlers downstream.
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub display_name: String,
}

/// Response extension breadcrumb: who the request authenticated as, for the
/// request logger sitting outside the auth layer.
#[derive(Clone, Copy, Debug)]
pub struct AuthUserId(pub i64);
