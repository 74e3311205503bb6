use axum::extract::Extension;
use serde_json::json;
use std::sync::Arc;

use crate::api::middleware::CurrentUser;
use crate::api::response::{success, ApiResult};
use crate::store::{users, WpDb};
use crate::tokens::TokenService;

#[utoipa::path(
    get,
    path = "/user/profile",
    responses(
        (status = 200, description = "Profile with subscription level and session count"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "user"
)]
pub async fn profile(
    Extension(user): Extension<CurrentUser>,
    Extension(WpDb(pool)): Extension<WpDb>,
    Extension(tokens): Extension<Arc<TokenService>>,
) -> ApiResult {
    let is_admin = users::is_admin(&pool, user.id).await?;
    let membership = users::subscription_level(&pool, &user.email).await?;
    let active_sessions = tokens.count_active_sessions(user.id).await?;

    Ok(success(json!({
        "id": user.id,
        "username": user.login,
        "email": user.email,
        "display_name": user.display_name,
        "subscription_level": subscription_tier(membership.as_deref()),
        "is_admin": is_admin,
        "active_sessions": active_sessions,
    })))
}

/// Membership aliases that mark an account as paying. Matched as
/// substrings, so "Premium Annual" or "Pro Garage" qualify too.
const PAID_ALIASES: [&str; 4] = ["paid", "premium", "pro", "subscriber"];

pub(super) fn subscription_tier(membership_alias: Option<&str>) -> &'static str {
    let Some(alias) = membership_alias else {
        return "free";
    };
    let alias = alias.to_ascii_lowercase();
    if PAID_ALIASES.iter().any(|paid| alias.contains(paid)) {
        "paid"
    } else {
        "free"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_tier_mapping() {
        assert_eq!(subscription_tier(None), "free");
        assert_eq!(subscription_tier(Some("Free")), "free");
        assert_eq!(subscription_tier(Some("premium")), "paid");
        assert_eq!(subscription_tier(Some("Pro Garage")), "paid");
        assert_eq!(subscription_tier(Some("Premium Annual")), "paid");
        assert_eq!(subscription_tier(Some("Subscriber Plus")), "paid");
        // unknown levels do not upgrade anyone
        assert_eq!(subscription_tier(Some("trial")), "free");
        assert_eq!(subscription_tier(Some("beta")), "free");
    }
}
