use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use std::sync::Arc;

use super::types::{RefreshRequest, TokenPair};
use crate::api::extract;
use crate::api::response::{error_response, success, ApiResult, ErrorCode};
use crate::api::validate::Validator;
use crate::tokens::{DeviceInfo, TokenService};

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token pair rotated", body = TokenPair),
        (status = 401, description = "Refresh token invalid, expired or revoked"),
        (status = 422, description = "Missing refresh token")
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    Extension(tokens): Extension<Arc<TokenService>>,
    payload: Option<Json<RefreshRequest>>,
) -> ApiResult {
    let Some(Json(request)) = payload else {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::BadRequest,
            "Missing request body",
        ));
    };

    let mut validator = Validator::new();
    validator.required("refresh_token", &request.refresh_token);
    if let Err(response) = validator.finish() {
        return Ok(response);
    }

    let device = DeviceInfo {
        device_id: request.device_id,
        device_name: request.device_name,
        platform: request.platform,
    };
    let ip = extract::client_ip_from_headers(&headers);
    let user_agent = extract::user_agent(&headers);

    let rotated = tokens
        .rotate_refresh_token(
            &request.refresh_token,
            device,
            ip.as_deref(),
            user_agent,
        )
        .await?;

    let Some(rotated) = rotated else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            ErrorCode::RefreshFailed,
            "Refresh token is invalid or expired",
        ));
    };

    Ok(success(TokenPair {
        access_token: rotated.access_token,
        refresh_token: rotated.refresh_token,
        token_type: "Bearer",
        expires_in: rotated.expires_in,
        user: None,
    }))
}
