//! Vehicle endpoints.
//!
//! Odometer writes are guarded: readings never go backwards and a single
//! update may not jump more than [`MAX_ODOMETER_JUMP`] miles, which catches
//! fat-fingered extra digits before they poison reminder math.

use anyhow::{Context, Result};
use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use utoipa::{IntoParams, ToSchema};

use super::reminders::{self, Scope};
use crate::api::middleware::CurrentUser;
use crate::api::response::{error_response, success, ApiResult, ErrorCode};
use crate::api::validate::Validator;
use crate::store::GarageDb;

/// Largest accepted single-update odometer increase.
pub const MAX_ODOMETER_JUMP: i64 = 10_000;

#[derive(Serialize, ToSchema, Debug)]
pub struct Vehicle {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub make: String,
    pub model: String,
    pub odometer: i64,
    pub updated_at: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct OdometerRequest {
    pub odometer: i64,
    pub note: Option<String>,
}

#[utoipa::path(
    get,
    path = "/vehicles",
    responses(
        (status = 200, description = "All vehicles owned by the authenticated user"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "vehicles"
)]
pub async fn list(
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
) -> ApiResult {
    let vehicles = list_for_user(&pool, user.id).await?;
    Ok(success(vehicles))
}

#[utoipa::path(
    get,
    path = "/vehicles/{id}",
    params(("id" = String, Path, description = "Vehicle id")),
    responses(
        (status = 200, description = "One vehicle", body = Vehicle),
        (status = 404, description = "Not found or owned by someone else"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "vehicles"
)]
pub async fn detail(
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
    Path(id): Path<String>,
) -> ApiResult {
    match find_owned(&pool, user.id, &id).await? {
        Some(vehicle) => Ok(success(vehicle)),
        None => Ok(not_found()),
    }
}

#[utoipa::path(
    put,
    path = "/vehicles/{id}/odometer",
    params(("id" = String, Path, description = "Vehicle id")),
    request_body = OdometerRequest,
    responses(
        (status = 200, description = "Odometer updated"),
        (status = 404, description = "Not found or owned by someone else"),
        (status = 422, description = "Reading decreases or jumps more than 10 000"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "vehicles"
)]
pub async fn update_odometer(
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
    Path(id): Path<String>,
    payload: Option<Json<OdometerRequest>>,
) -> ApiResult {
    let Some(Json(request)) = payload else {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::BadRequest,
            "Missing request body",
        ));
    };

    let mut validator = Validator::new();
    validator.non_negative("odometer", request.odometer);
    if let Some(note) = request.note.as_deref() {
        validator.max_length("note", note, 500);
    }
    if let Err(response) = validator.finish() {
        return Ok(response);
    }

    let Some(vehicle) = find_owned(&pool, user.id, &id).await? else {
        return Ok(not_found());
    };

    if let Err(response) = check_odometer(vehicle.odometer, request.odometer) {
        return Ok(response);
    }

    apply_odometer(&pool, &id, request.odometer, request.note.as_deref()).await?;

    Ok(success(json!({
        "vehicle_id": id,
        "odometer": request.odometer,
        "previous_odometer": vehicle.odometer,
    })))
}

#[utoipa::path(
    get,
    path = "/vehicles/{id}/reminders",
    params(("id" = String, Path, description = "Vehicle id")),
    responses(
        (status = 200, description = "Reminders attached to one vehicle"),
        (status = 404, description = "Vehicle not found or owned by someone else"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "vehicles"
)]
pub async fn list_reminders(
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
    Path(id): Path<String>,
) -> ApiResult {
    if find_owned(&pool, user.id, &id).await?.is_none() {
        return Ok(not_found());
    }

    let reminders = reminders::fetch(&pool, user.id, Scope::ForVehicle(id)).await?;
    Ok(success(reminders))
}

#[derive(Deserialize, IntoParams, Debug)]
pub struct DueQuery {
    /// Days ahead a date-based reminder counts as due. Defaults to 30.
    pub days: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/vehicles/{id}/reminders/due",
    params(
        ("id" = String, Path, description = "Vehicle id"),
        DueQuery
    ),
    responses(
        (status = 200, description = "Reminders on one vehicle due within the window, plus any with a reached odometer target"),
        (status = 404, description = "Vehicle not found or owned by someone else"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "vehicles"
)]
pub async fn list_reminders_due(
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
    Path(id): Path<String>,
    Query(query): Query<DueQuery>,
) -> ApiResult {
    if find_owned(&pool, user.id, &id).await?.is_none() {
        return Ok(not_found());
    }

    let window_days = query.days.unwrap_or(reminders::DUE_WINDOW_DAYS);
    let reminders = reminders::fetch(
        &pool,
        user.id,
        Scope::DueForVehicle {
            vehicle_id: id.clone(),
            window_days,
        },
    )
    .await?;

    Ok(success(json!({
        "vehicle_id": id,
        "window_days": window_days,
        "count": reminders.len(),
        "reminders": reminders,
    })))
}

/// Monotonicity and jump guard, in precedence order.
fn check_odometer(current: i64, proposed: i64) -> Result<(), axum::response::Response> {
    if proposed < current {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::OdometerDecrease,
            "Odometer reading cannot decrease",
        ));
    }
    if proposed - current > MAX_ODOMETER_JUMP {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::OdometerJumpTooLarge,
            "Odometer increase exceeds the 10000 mile limit for one update",
        ));
    }
    Ok(())
}

fn not_found() -> axum::response::Response {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorCode::NotFound,
        "Vehicle not found",
    )
}

const VEHICLE_COLUMNS: &str = r"
    id, user_id, year, make, model, nickname, current_odo, updated_at::text AS updated_at
";

async fn list_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Vehicle>> {
    let query = format!(
        "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE user_id = $1 ORDER BY make, model, id"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list vehicles")?;

    Ok(rows.into_iter().map(vehicle_from_row).collect())
}

pub(super) async fn find_owned(
    pool: &PgPool,
    user_id: i64,
    vehicle_id: &str,
) -> Result<Option<Vehicle>> {
    let query =
        format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id = $1 AND user_id = $2");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(vehicle_id)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load vehicle")?;

    Ok(row.map(vehicle_from_row))
}

pub(super) async fn apply_odometer(
    pool: &PgPool,
    vehicle_id: &str,
    reading: i64,
    note: Option<&str>,
) -> Result<()> {
    let query = "UPDATE vehicles SET current_odo = $1, updated_at = NOW() WHERE id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(reading)
        .bind(vehicle_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update odometer")?;

    let query = r"
        INSERT INTO odometer_log (vehicle_id, reading, note, source)
        VALUES ($1, $2, $3, 'api')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(vehicle_id)
        .bind(reading)
        .bind(note)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to append odometer log")?;

    Ok(())
}

fn vehicle_from_row(row: sqlx::postgres::PgRow) -> Vehicle {
    let year: Option<i32> = row.get("year");
    let make: String = row.get("make");
    let model: String = row.get("model");
    let nickname: Option<String> = row.get("nickname");

    Vehicle {
        id: row.get("id"),
        name: display_name(nickname.as_deref(), year, &make, &model),
        year,
        make,
        model,
        odometer: row.get("current_odo"),
        updated_at: row.get("updated_at"),
    }
}

/// Nickname when set, otherwise "year make model" without empty gaps.
fn display_name(nickname: Option<&str>, year: Option<i32>, make: &str, model: &str) -> String {
    if let Some(nickname) = nickname {
        let trimmed = nickname.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut parts = Vec::new();
    if let Some(year) = year {
        parts.push(year.to_string());
    }
    if !make.is_empty() {
        parts.push(make.to_string());
    }
    if !model.is_empty() {
        parts.push(model.to_string());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odometer_guard_precedence() {
        // decrease reported before jump check
        assert!(check_odometer(50_000, 49_999).is_err());
        assert!(check_odometer(50_000, 50_000).is_ok());
        assert!(check_odometer(50_000, 60_000).is_ok());
        assert!(check_odometer(50_000, 60_001).is_err());
    }

    #[tokio::test]
    async fn odometer_guard_codes() {
        use http_body_util::BodyExt;

        let response = check_odometer(1000, 500).unwrap_err();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "ODOMETER_DECREASE");

        let response = check_odometer(1000, 20_000).unwrap_err();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "ODOMETER_JUMP_TOO_LARGE");
    }

    #[test]
    fn display_name_prefers_nickname() {
        assert_eq!(
            display_name(Some("Daily Driver"), Some(2019), "Honda", "Civic"),
            "Daily Driver"
        );
        assert_eq!(
            display_name(Some("   "), Some(2019), "Honda", "Civic"),
            "2019 Honda Civic"
        );
        assert_eq!(display_name(None, None, "Honda", "Civic"), "Honda Civic");
        assert_eq!(display_name(None, Some(1987), "", ""), "1987");
    }
}
