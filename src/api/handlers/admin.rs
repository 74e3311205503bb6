//! Admin reporting. Reached only through the auth + admin middleware pair.

use anyhow::{Context, Result};
use axum::extract::{Extension, Query};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use utoipa::IntoParams;

use crate::api::response::{paginated, success, ApiResult};
use crate::store::{users, GarageDb, WpDb};

const DEFAULT_PER_PAGE: i64 = 25;
const MAX_PER_PAGE: i64 = 100;

#[derive(Deserialize, IntoParams, Debug)]
pub struct PageParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/admin/stats",
    responses(
        (status = 200, description = "Aggregate request, auth, device and sync statistics"),
        (status = 403, description = "Authenticated but not an administrator"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn stats(
    Extension(WpDb(wp_pool)): Extension<WpDb>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
) -> ApiResult {
    let requests = request_stats(&pool).await?;
    let top_endpoints = top_endpoints(&pool).await?;
    let (devices, active_tokens) = auth_stats(&pool).await?;
    let total_users = users::count(&wp_pool).await?;

    Ok(success(json!({
        "users": { "total": total_users },
        "requests_24h": requests,
        "top_endpoints_24h": top_endpoints,
        "devices": { "registered": devices },
        "sessions": { "active_refresh_tokens": active_tokens },
    })))
}

#[utoipa::path(
    get,
    path = "/admin/users",
    params(PageParams),
    responses(
        (status = 200, description = "Paginated user listing"),
        (status = 403, description = "Authenticated but not an administrator"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn list_users(
    Extension(WpDb(pool)): Extension<WpDb>,
    Query(params): Query<PageParams>,
) -> ApiResult {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);
    let offset = (page - 1) * per_page;

    let listing = users::list(&pool, per_page, offset).await?;
    let total = users::count(&pool).await?;

    let items: Vec<_> = listing
        .into_iter()
        .map(|user| {
            json!({
                "id": user.id,
                "username": user.login,
                "email": user.email,
                "display_name": user.display_name,
                "registered": user.registered,
            })
        })
        .collect();

    Ok(paginated(items, page, per_page, total))
}

async fn request_stats(pool: &PgPool) -> Result<serde_json::Value> {
    let query = r"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE status_code >= 400) AS errors,
               COALESCE(AVG(duration_ms), 0)::bigint AS avg_duration_ms
        FROM api_request_log
        WHERE created_at > NOW() - INTERVAL '24 hours'
    ";
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
        .context("failed to aggregate request stats")?;

    Ok(json!({
        "total": row.get::<i64, _>("total"),
        "errors": row.get::<i64, _>("errors"),
        "avg_duration_ms": row.get::<i64, _>("avg_duration_ms"),
    }))
}

async fn top_endpoints(pool: &PgPool) -> Result<Vec<serde_json::Value>> {
    let query = r"
        SELECT path, COUNT(*) AS hits
        FROM api_request_log
        WHERE created_at > NOW() - INTERVAL '24 hours'
        GROUP BY path
        ORDER BY hits DESC
        LIMIT 5
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to rank endpoints")?;

    Ok(rows
        .into_iter()
        .map(|row| {
            json!({
                "path": row.get::<String, _>("path"),
                "hits": row.get::<i64, _>("hits"),
            })
        })
        .collect())
}

async fn auth_stats(pool: &PgPool) -> Result<(i64, i64)> {
    let query = r"
        SELECT
            (SELECT COUNT(*) FROM api_devices) AS devices,
            (SELECT COUNT(*) FROM api_refresh_tokens
             WHERE revoked = FALSE AND expires_at > NOW()) AS active_tokens
    ";
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
        .context("failed to aggregate auth stats")?;

    Ok((row.get("devices"), row.get("active_tokens")))
}
