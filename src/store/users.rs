//! WordPress user lookups.
//!
//! The WordPress schema is what it is: capabilities live in a serialized
//! PHP blob in `wp_usermeta` and membership data in the Simple WordPress
//! Membership tables. Queries here read those structures as-is rather than
//! mirroring users into the application database.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;

/// Credential row used by login: includes the stored password hash.
#[derive(Debug)]
pub struct WpCredentials {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
}

/// Public user fields, safe to return to clients.
#[derive(Debug)]
pub struct WpUser {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub display_name: String,
    pub registered: String,
}

/// Find a user by login name or email address, for authentication.
pub async fn find_by_login(pool: &PgPool, identifier: &str) -> Result<Option<WpCredentials>> {
    let query = r"
        SELECT id, user_login, user_email, display_name, user_pass
        FROM wp_users
        WHERE user_login = $1 OR user_email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identifier)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to look up user by login")?;

    Ok(row.map(|row| WpCredentials {
        id: row.get("id"),
        login: row.get("user_login"),
        email: row.get("user_email"),
        display_name: row.get("display_name"),
        password_hash: row.get("user_pass"),
    }))
}

pub async fn find_by_id(pool: &PgPool, user_id: i64) -> Result<Option<WpUser>> {
    let query = r"
        SELECT id, user_login, user_email, display_name, user_registered::text AS registered
        FROM wp_users
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to look up user by id")?;

    Ok(row.map(wp_user_from_row))
}

/// Whether the user carries the `administrator` role.
///
/// `wp_capabilities` is a serialized PHP array; a substring probe for the
/// quoted role name is how WordPress-adjacent tooling reads it without a
/// PHP deserializer.
pub async fn is_admin(pool: &PgPool, user_id: i64) -> Result<bool> {
    let query = r"
        SELECT meta_value FROM wp_usermeta
        WHERE user_id = $1 AND meta_key = 'wp_capabilities'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to read user capabilities")?;

    Ok(row.is_some_and(|row| {
        let blob: String = row.get("meta_value");
        blob.contains("\"administrator\"")
    }))
}

/// Membership level alias from Simple WordPress Membership, if the user is
/// enrolled. Callers treat `None` as the free tier.
pub async fn subscription_level(pool: &PgPool, email: &str) -> Result<Option<String>> {
    let query = r"
        SELECT l.alias
        FROM wp_swpm_members_tbl m
        JOIN wp_swpm_membership_tbl l ON l.id = m.membership_level
        WHERE m.email = $1 AND m.account_state = 'active'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to read membership level")?;

    Ok(row.map(|row| row.get("alias")))
}

/// Paged user listing for the admin surface.
pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<WpUser>> {
    let query = r"
        SELECT id, user_login, user_email, display_name, user_registered::text AS registered
        FROM wp_users
        ORDER BY id
        LIMIT $1 OFFSET $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list users")?;

    Ok(rows.into_iter().map(wp_user_from_row).collect())
}

pub async fn count(pool: &PgPool) -> Result<i64> {
    let query = "SELECT COUNT(*) AS total FROM wp_users";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count users")?;

    Ok(row.get("total"))
}

fn wp_user_from_row(row: sqlx::postgres::PgRow) -> WpUser {
    WpUser {
        id: row.get("id"),
        login: row.get("user_login"),
        email: row.get("user_email"),
        display_name: row.get("display_name"),
        registered: row.get("registered"),
    }
}
