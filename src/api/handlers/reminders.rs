//! Maintenance reminder endpoints.
//!
//! A reminder is due by date, by odometer, or both; urgency folds the two
//! axes into one label the mobile client can sort and badge on.

use anyhow::{Context, Result};
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use utoipa::ToSchema;

use crate::api::middleware::CurrentUser;
use crate::api::response::{error_response, success, ApiResult, ErrorCode};
use crate::store::GarageDb;

/// Days ahead a date-based reminder starts counting as due.
pub const DUE_WINDOW_DAYS: i64 = 30;
/// Miles ahead an odometer-based reminder starts counting as due.
pub const DUE_WINDOW_MILES: i64 = 2000;

const URGENT_DAYS: i64 = 7;
const URGENT_MILES: i64 = 500;

#[derive(Serialize, ToSchema, Debug)]
pub struct Reminder {
    pub id: i64,
    pub vehicle_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_odometer: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until_due: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miles_until_due: Option<i64>,
    pub urgency: &'static str,
}

/// Fold the date and odometer axes into one urgency label; the nearer axis
/// wins.
#[must_use]
pub fn classify(days_until: Option<i64>, miles_until: Option<i64>) -> &'static str {
    let overdue = days_until.is_some_and(|days| days < 0)
        || miles_until.is_some_and(|miles| miles < 0);
    if overdue {
        return "overdue";
    }

    let urgent = days_until.is_some_and(|days| days <= URGENT_DAYS)
        || miles_until.is_some_and(|miles| miles <= URGENT_MILES);
    if urgent {
        return "urgent";
    }

    let upcoming = days_until.is_some_and(|days| days <= DUE_WINDOW_DAYS)
        || miles_until.is_some_and(|miles| miles <= DUE_WINDOW_MILES);
    if upcoming {
        return "upcoming";
    }

    "normal"
}

#[utoipa::path(
    get,
    path = "/reminders",
    responses(
        (status = 200, description = "All reminders for the authenticated user"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "reminders"
)]
pub async fn list(
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
) -> ApiResult {
    let reminders = fetch(&pool, user.id, Scope::All).await?;
    Ok(success(reminders))
}

#[utoipa::path(
    get,
    path = "/reminders/due",
    responses(
        (status = 200, description = "Reminders due within 30 days or 2000 miles, overdue included"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "reminders"
)]
pub async fn due(
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
) -> ApiResult {
    let reminders = fetch(&pool, user.id, Scope::Due).await?;
    Ok(success(reminders))
}

#[utoipa::path(
    get,
    path = "/reminders/{id}",
    params(("id" = i64, Path, description = "Reminder id")),
    responses(
        (status = 200, description = "One reminder", body = Reminder),
        (status = 404, description = "Not found or owned by someone else"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "reminders"
)]
pub async fn detail(
    Extension(user): Extension<CurrentUser>,
    Extension(GarageDb(pool)): Extension<GarageDb>,
    Path(id): Path<i64>,
) -> ApiResult {
    let mut reminders = fetch(&pool, user.id, Scope::ById(id)).await?;
    match reminders.pop() {
        Some(reminder) => Ok(success(reminder)),
        None => Ok(error_response(
            StatusCode::NOT_FOUND,
            ErrorCode::NotFound,
            "Reminder not found",
        )),
    }
}

pub(super) enum Scope {
    All,
    Due,
    ById(i64),
    ForVehicle(String),
    DueForVehicle {
        vehicle_id: String,
        window_days: i64,
    },
}

/// Load reminders with due distances computed in SQL, then classify.
///
/// Ownership is enforced in the query; a reminder someone else owns is
/// indistinguishable from a missing one.
pub(super) async fn fetch(pool: &PgPool, user_id: i64, scope: Scope) -> Result<Vec<Reminder>> {
    let base = r"
        SELECT r.id, r.vehicle_id, r.title, r.notes,
               r.next_date::text AS due_date,
               r.next_odo AS due_odometer,
               (r.next_date - CURRENT_DATE)::bigint AS days_until_due,
               (r.next_odo - v.current_odo)::bigint AS miles_until_due
        FROM reminders r
        JOIN vehicles v ON v.id = r.vehicle_id
        WHERE r.user_id = $1
    ";

    let (query, extra_text, extra_id) = match &scope {
        Scope::All => (format!("{base} ORDER BY r.next_date NULLS LAST, r.id"), None, None),
        Scope::Due => (
            format!(
                "{base} AND ((r.next_date IS NOT NULL AND r.next_date - CURRENT_DATE <= {DUE_WINDOW_DAYS})
                   OR (r.next_odo IS NOT NULL AND r.next_odo - v.current_odo <= {DUE_WINDOW_MILES}))
                 ORDER BY r.next_date NULLS LAST, r.id"
            ),
            None,
            None,
        ),
        Scope::ById(id) => (format!("{base} AND r.id = $2"), None, Some(*id)),
        Scope::ForVehicle(vehicle_id) => (
            format!("{base} AND r.vehicle_id = $2 ORDER BY r.next_date NULLS LAST, r.id"),
            Some(vehicle_id.clone()),
            None,
        ),
        // per-vehicle due list: caller-chosen date window, odometer axis
        // counts only once the target reading is reached
        Scope::DueForVehicle {
            vehicle_id,
            window_days,
        } => (
            format!(
                "{base} AND r.vehicle_id = $2
                   AND ((r.next_date IS NOT NULL AND r.next_date - CURRENT_DATE <= {window_days})
                     OR (r.next_odo IS NOT NULL AND r.next_odo <= v.current_odo))
                 ORDER BY r.next_date NULLS LAST, r.id"
            ),
            Some(vehicle_id.clone()),
            None,
        ),
    };

    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let mut prepared = sqlx::query(&query).bind(user_id);
    if let Some(vehicle_id) = extra_text {
        prepared = prepared.bind(vehicle_id);
    }
    if let Some(id) = extra_id {
        prepared = prepared.bind(id);
    }
    let rows = prepared
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to load reminders")?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let days_until_due: Option<i64> = row.get("days_until_due");
            let miles_until_due: Option<i64> = row.get("miles_until_due");
            Reminder {
                id: row.get("id"),
                vehicle_id: row.get("vehicle_id"),
                title: row.get("title"),
                notes: row.get("notes"),
                due_date: row.get("due_date"),
                due_odometer: row.get("due_odometer"),
                days_until_due,
                miles_until_due,
                urgency: classify(days_until_due, miles_until_due),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overdue_beats_everything() {
        assert_eq!(classify(Some(-1), None), "overdue");
        assert_eq!(classify(None, Some(-1)), "overdue");
        assert_eq!(classify(Some(-1), Some(5000)), "overdue");
        assert_eq!(classify(Some(90), Some(-10)), "overdue");
    }

    #[test]
    fn urgent_boundaries() {
        assert_eq!(classify(Some(7), None), "urgent");
        assert_eq!(classify(Some(8), None), "upcoming");
        assert_eq!(classify(None, Some(500)), "urgent");
        assert_eq!(classify(None, Some(501)), "upcoming");
    }

    #[test]
    fn upcoming_boundaries() {
        assert_eq!(classify(Some(30), None), "upcoming");
        assert_eq!(classify(Some(31), None), "normal");
        assert_eq!(classify(None, Some(2000)), "upcoming");
        assert_eq!(classify(None, Some(2001)), "normal");
    }

    #[test]
    fn nearer_axis_wins() {
        // far date but nearly-due odometer
        assert_eq!(classify(Some(300), Some(100)), "urgent");
        // nearly-due date but far odometer
        assert_eq!(classify(Some(2), Some(9000)), "urgent");
    }

    #[test]
    fn no_due_axes_is_normal() {
        assert_eq!(classify(None, None), "normal");
    }

    #[test]
    fn zero_is_due_today_not_overdue() {
        assert_eq!(classify(Some(0), None), "urgent");
        assert_eq!(classify(None, Some(0)), "urgent");
    }
}
