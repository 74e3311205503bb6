//! Per-request audit log.
//!
//! One `api_request_log` row per request. A failed insert must never fail
//! the request it describes, so errors are logged and swallowed.

use axum::extract::{Extension, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{warn, Instrument};

use super::AuthUserId;
use crate::api::extract;
use crate::store::GarageDb;

pub async fn request_log(
    Extension(GarageDb(pool)): Extension<GarageDb>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let ip_address = extract::client_ip(&request);
    let user_agent = extract::user_agent(request.headers()).map(str::to_string);
    let device_id = extract::device_id(request.headers()).map(str::to_string);

    let start = Instant::now();
    let response = next.run(request).await;

    let status = i32::from(response.status().as_u16());
    let user_id = response.extensions().get::<AuthUserId>().map(|user| user.0);
    let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

    let query = r"
        INSERT INTO api_request_log
            (method, path, status_code, user_id, ip_address, user_agent,
             device_id, duration_ms)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let logged = sqlx::query(query)
        .bind(&method)
        .bind(&path)
        .bind(status)
        .bind(user_id)
        .bind(ip_address.as_deref())
        .bind(user_agent.as_deref())
        .bind(device_id.as_deref())
        .bind(duration_ms)
        .execute(&pool)
        .instrument(span)
        .await;

    if let Err(err) = logged {
        warn!("Failed to write request log entry: {}", err);
    }

    response
}
