//! # GarageMinder Mobile API
//!
//! REST gateway for the GarageMinder mobile apps. It authenticates clients
//! against the WordPress user store, issues its own access/refresh tokens,
//! enforces per-identity rate limits, and exposes vehicles, reminders, sync
//! and admin reporting on top of the garage application database.
//!
//! ## Authentication
//!
//! Login verifies passwords against whatever hash format WordPress left in
//! `user_pass` (legacy MD5, `$wp$` pre-hashed bcrypt, phpass portable, or a
//! modern bcrypt/argon2 hash) and returns a short-lived signed access token
//! plus an opaque refresh token. Only the SHA-256 of a refresh token is ever
//! stored; refresh rotates the token and revokes the old one.
//!
//! ## Request pipeline
//!
//! Every request flows through, in order: CORS, request logging, panic
//! boundary, rate limiting, and (for protected routes) bearer auth and the
//! admin capability check. Middleware short-circuit with the standard JSON
//! envelope; the request log row is written exactly once per request.
//!
//! ## Databases
//!
//! Two Postgres pools: the WordPress-shaped identity store (read-only) and
//! the garage store (vehicles, reminders, `api_*` tables). Schema is owned
//! by the applications; `db/schema.sql` documents the `api_*` tables this
//! crate relies on, including the uniqueness constraint the rate limiter's
//! insert-then-increment path depends on.

pub mod api;
pub mod cli;
pub mod password;
pub mod rate_limit;
pub mod store;
pub mod tokens;
