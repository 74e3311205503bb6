use axum::extract::Extension;
use serde_json::json;
use std::sync::Arc;

use crate::api::middleware::CurrentUser;
use crate::api::response::{success, ApiResult};
use crate::store::{users, WpDb};
use crate::tokens::TokenService;

/// Lets a client confirm its access token still works and see how many
/// other sessions the account has open.
#[utoipa::path(
    get,
    path = "/auth/verify",
    responses(
        (status = 200, description = "Token is valid; returns the account behind it"),
        (status = 401, description = "Token missing, expired or invalid")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn verify(
    Extension(user): Extension<CurrentUser>,
    Extension(WpDb(pool)): Extension<WpDb>,
    Extension(tokens): Extension<Arc<TokenService>>,
) -> ApiResult {
    let is_admin = users::is_admin(&pool, user.id).await?;
    let active_sessions = tokens.count_active_sessions(user.id).await?;

    Ok(success(json!({
        "user": {
            "id": user.id,
            "username": user.login,
            "email": user.email,
            "display_name": user.display_name,
            "is_admin": is_admin,
        },
        "active_sessions": active_sessions,
    })))
}
