use axum::extract::Extension;
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::types::LogoutRequest;
use crate::api::middleware::CurrentUser;
use crate::api::response::{success, ApiResult};
use crate::tokens::TokenService;

#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out; idempotent for already-revoked tokens"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    Extension(user): Extension<CurrentUser>,
    Extension(tokens): Extension<Arc<TokenService>>,
    payload: Option<Json<LogoutRequest>>,
) -> ApiResult {
    let request = payload.map(|Json(body)| body).unwrap_or_default();

    let revoked = if request.all_devices {
        let count = tokens.revoke_all_user_tokens(user.id).await?;
        info!("Revoked {} sessions for user {}", count, user.id);
        count
    } else if let Some(refresh_token) = request.refresh_token.as_deref() {
        // Unknown or already-revoked tokens still log out cleanly
        u64::from(tokens.revoke_refresh_token(refresh_token).await?)
    } else {
        0
    };

    Ok(success(json!({
        "message": "Logged out",
        "revoked_sessions": revoked,
    })))
}
