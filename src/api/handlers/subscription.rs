//! Subscription status for mobile feature gating.

use axum::extract::Extension;
use serde_json::json;

use super::user::subscription_tier;
use crate::api::middleware::CurrentUser;
use crate::api::response::{success, ApiResult};
use crate::store::{users, WpDb};

#[utoipa::path(
    get,
    path = "/subscription/status",
    responses(
        (status = 200, description = "Subscription level and the feature flags it unlocks"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "subscription"
)]
pub async fn status(
    Extension(user): Extension<CurrentUser>,
    Extension(WpDb(pool)): Extension<WpDb>,
) -> ApiResult {
    let membership = users::subscription_level(&pool, &user.email).await?;
    let level = subscription_tier(membership.as_deref());

    Ok(success(json!({
        "subscription_level": level,
        "features": features(level),
    })))
}

/// Only automatic background sync is gated; everything else ships to every
/// tier.
fn features(level: &str) -> serde_json::Value {
    json!({
        "manual_sync": true,
        "background_sync": true,
        "auto_sync": level == "paid",
        "trip_tracking": true,
        "vehicle_management": true,
        "odometer_adjustment": true,
        "reminders": true,
    })
}
