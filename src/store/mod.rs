//! Database access.
//!
//! Two pools, two newtypes: [`WpDb`] points at the WordPress installation
//! that owns user accounts, [`GarageDb`] at the application database with
//! vehicles, reminders and API bookkeeping tables. The newtypes exist so the
//! two cannot be confused when both live in request extensions.

pub mod users;

use sqlx::PgPool;

/// WordPress database (users, usermeta, membership tables). Read-only here.
#[derive(Clone)]
pub struct WpDb(pub PgPool);

/// Application database (vehicles, reminders, tokens, rate limits, logs).
#[derive(Clone)]
pub struct GarageDb(pub PgPool);
