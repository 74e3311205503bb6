//! Mobile sync endpoints: device registration, sync status and batched
//! odometer pushes for clients coming back online.

use anyhow::{Context, Result};
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::Instrument;
use utoipa::ToSchema;

use super::vehicles::MAX_ODOMETER_JUMP;
use crate::api::extract;
use crate::api::middleware::CurrentUser;
use crate::api::response::{error_response, success, success_with_status, ApiResult, ErrorCode};
use crate::api::validate::Validator;
use crate::store::GarageDb;

/// Largest batch one push may carry.
pub const MAX_PUSH_UPDATES: usize = 50;

const PLATFORMS: &[&str] = &["android", "ios"];

#[derive(Deserialize, ToSchema, Debug)]
pub struct DeviceRequest {
    #[serde(default)]
    pub device_id: String,
    pub device_name: Option<String>,
    #[serde(default)]
    pub platform: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct PushUpdate {
    #[serde(default)]
    pub vehicle_id: String,
    pub odometer: i64,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct PushRequest {
    #[serde(default)]
    pub updates: Vec<PushUpdate>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct PushResult {
    pub vehicle_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

#[utoipa::path(
    get,
    path = "/sync/status",
    params(("X-Device-Id" = String, Header, description = "Device identifier")),
    responses(
        (status = 200, description = "Sync counters for this user and device"),
        (status = 400, description = "Missing X-Device-Id header"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "sync"
)]
pub async fn status(
    headers: HeaderMap,
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
) -> ApiResult {
    let Some(device_id) = extract::device_id(&headers).map(str::to_string) else {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::BadRequest,
            "X-Device-Id header is required",
        ));
    };

    let device = load_device(&pool, user.id, &device_id).await?;
    let (vehicles, reminders) = count_user_data(&pool, user.id).await?;
    let last_push_at = last_push(&pool, user.id, &device_id).await?;

    Ok(success(json!({
        "device": device,
        "last_push_at": last_push_at,
        "vehicles": vehicles,
        "reminders": reminders,
    })))
}

#[utoipa::path(
    post,
    path = "/sync/device",
    request_body = DeviceRequest,
    responses(
        (status = 201, description = "Device registered for the first time"),
        (status = 200, description = "Known device refreshed"),
        (status = 422, description = "Missing device id or unsupported platform"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "sync"
)]
pub async fn register_device(
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
    payload: Option<Json<DeviceRequest>>,
) -> ApiResult {
    let Some(Json(request)) = payload else {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::BadRequest,
            "Missing request body",
        ));
    };

    let mut validator = Validator::new();
    validator.required("device_id", &request.device_id);
    validator.one_of("platform", &request.platform, PLATFORMS);
    if let Err(response) = validator.finish() {
        return Ok(response);
    }

    let created = upsert_device(
        &pool,
        user.id,
        &request.device_id,
        request.device_name.as_deref(),
        &request.platform,
    )
    .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(success_with_status(
        status,
        json!({
            "device_id": request.device_id,
            "registered": created,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/sync/push",
    request_body = PushRequest,
    responses(
        (status = 200, description = "Batch processed; per-item results in the body"),
        (status = 422, description = "Empty batch or more than 50 updates"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "sync"
)]
pub async fn push(
    headers: HeaderMap,
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
    payload: Option<Json<PushRequest>>,
) -> ApiResult {
    let Some(Json(request)) = payload else {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::BadRequest,
            "Missing request body",
        ));
    };

    let mut validator = Validator::new();
    if request.updates.is_empty() {
        validator.add("updates", "updates must not be empty");
    }
    if request.updates.len() > MAX_PUSH_UPDATES {
        validator.add(
            "updates",
            format!("updates must contain at most {MAX_PUSH_UPDATES} items"),
        );
    }
    if let Err(response) = validator.finish() {
        return Ok(response);
    }

    // One transaction for the whole batch: items that break the odometer
    // rules are skipped and reported, everything else lands together.
    let mut tx = pool.begin().await.context("begin sync push transaction")?;
    let mut results = Vec::with_capacity(request.updates.len());
    let mut applied: i64 = 0;

    for update in &request.updates {
        let outcome = apply_update(&mut tx, user.id, update).await?;
        if outcome.success {
            applied += 1;
        }
        results.push(outcome);
    }

    if let Some(device_id) = extract::device_id(&headers) {
        record_push(&mut tx, user.id, device_id, applied).await?;
    }

    tx.commit().await.context("commit sync push transaction")?;

    Ok(success(json!({
        "applied": applied,
        "failed": results.iter().filter(|result| !result.success).count(),
        "results": results,
    })))
}

async fn apply_update(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    update: &PushUpdate,
) -> Result<PushResult> {
    let fail = |error| PushResult {
        vehicle_id: update.vehicle_id.clone(),
        success: false,
        error: Some(error),
    };

    if update.vehicle_id.trim().is_empty() || update.odometer < 0 {
        return Ok(fail(ErrorCode::ValidationError.as_str()));
    }

    let query = "SELECT current_odo FROM vehicles WHERE id = $1 AND user_id = $2 FOR UPDATE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&update.vehicle_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lock vehicle for push")?;

    let Some(row) = row else {
        return Ok(fail(ErrorCode::NotFound.as_str()));
    };
    let current: i64 = row.get("current_odo");

    if update.odometer < current {
        return Ok(fail(ErrorCode::OdometerDecrease.as_str()));
    }
    if update.odometer - current > MAX_ODOMETER_JUMP {
        return Ok(fail(ErrorCode::OdometerJumpTooLarge.as_str()));
    }

    let query = "UPDATE vehicles SET current_odo = $1, updated_at = NOW() WHERE id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(update.odometer)
        .bind(&update.vehicle_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to apply pushed odometer")?;

    let query = r"
        INSERT INTO odometer_log (vehicle_id, reading, source)
        VALUES ($1, $2, 'sync')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&update.vehicle_id)
        .bind(update.odometer)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to log pushed odometer")?;

    Ok(PushResult {
        vehicle_id: update.vehicle_id.clone(),
        success: true,
        error: None,
    })
}

async fn record_push(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    device_id: &str,
    applied: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO api_sync_status (user_id, device_id, last_push_at, pushed_updates)
        VALUES ($1, $2, NOW(), $3)
        ON CONFLICT (user_id, device_id)
        DO UPDATE SET last_push_at = NOW(),
                      pushed_updates = api_sync_status.pushed_updates + $3
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(device_id)
        .bind(applied)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to record sync push")?;

    Ok(())
}

async fn load_device(
    pool: &PgPool,
    user_id: i64,
    device_id: &str,
) -> Result<Option<serde_json::Value>> {
    let query = r"
        SELECT device_id, device_name, platform, last_seen_at::text AS last_seen_at
        FROM api_devices
        WHERE user_id = $1 AND device_id = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load device")?;

    Ok(row.map(|row| {
        json!({
            "device_id": row.get::<String, _>("device_id"),
            "device_name": row.get::<Option<String>, _>("device_name"),
            "platform": row.get::<String, _>("platform"),
            "last_seen_at": row.get::<Option<String>, _>("last_seen_at"),
        })
    }))
}

async fn count_user_data(pool: &PgPool, user_id: i64) -> Result<(i64, i64)> {
    let query = r"
        SELECT
            (SELECT COUNT(*) FROM vehicles WHERE user_id = $1) AS vehicles,
            (SELECT COUNT(*) FROM reminders WHERE user_id = $1) AS reminders
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count user data")?;

    Ok((row.get("vehicles"), row.get("reminders")))
}

async fn last_push(pool: &PgPool, user_id: i64, device_id: &str) -> Result<Option<String>> {
    let query = r"
        SELECT last_push_at::text AS last_push_at
        FROM api_sync_status
        WHERE user_id = $1 AND device_id = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load sync status")?;

    Ok(row.and_then(|row| row.get("last_push_at")))
}

/// First registration inserts; a known device only refreshes its metadata.
async fn upsert_device(
    pool: &PgPool,
    user_id: i64,
    device_id: &str,
    device_name: Option<&str>,
    platform: &str,
) -> Result<bool> {
    let query = r"
        INSERT INTO api_devices (user_id, device_id, device_name, platform, last_seen_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (user_id, device_id) DO NOTHING
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let inserted = sqlx::query(query)
        .bind(user_id)
        .bind(device_id)
        .bind(device_name)
        .bind(platform)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to register device")?;

    if inserted.rows_affected() > 0 {
        return Ok(true);
    }

    let query = r"
        UPDATE api_devices
        SET device_name = $3, platform = $4, last_seen_at = NOW()
        WHERE user_id = $1 AND device_id = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(device_id)
        .bind(device_name)
        .bind(platform)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to refresh device")?;

    Ok(false)
}
