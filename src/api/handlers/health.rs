use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::Response;
use serde::Serialize;
use sqlx::{Connection, PgPool};
use tracing::{error, info_span, Instrument};
use utoipa::ToSchema;

use crate::api::response::{error_response, success_with_status, ErrorCode};
use crate::store::{GarageDb, WpDb};

#[derive(Serialize, ToSchema, Debug)]
pub struct Health {
    name: String,
    version: String,
    identity_db: String,
    garage_db: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Both databases are reachable", body = Health),
        (status = 503, description = "At least one database is unreachable")
    ),
    tag = "health"
)]
pub async fn health(
    Extension(WpDb(wp_pool)): Extension<WpDb>,
    Extension(GarageDb(garage_pool)): Extension<GarageDb>,
) -> Response {
    let identity_ok = ping(&wp_pool, "identity").await;
    let garage_ok = ping(&garage_pool, "garage").await;

    let health = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        identity_db: status_str(identity_ok),
        garage_db: status_str(garage_ok),
    };

    if identity_ok && garage_ok {
        success_with_status(StatusCode::OK, health)
    } else {
        error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ServiceUnavailable,
            "Service is unhealthy",
        )
    }
}

async fn ping(pool: &PgPool, which: &str) -> bool {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    match pool.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => true,
                Err(error) => {
                    error!("Failed to ping {} database: {}", which, error);
                    false
                }
            }
        }
        Err(error) => {
            error!("Failed to acquire {} database connection: {}", which, error);
            false
        }
    }
}

fn status_str(ok: bool) -> String {
    if ok { "ok" } else { "error" }.to_string()
}
