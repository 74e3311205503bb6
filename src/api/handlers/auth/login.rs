use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::types::{LoginRequest, TokenPair, UserSummary};
use crate::api::extract;
use crate::api::response::{error_response, success, ApiResult, ErrorCode};
use crate::api::validate::Validator;
use crate::password;
use crate::store::{users, WpDb};
use crate::tokens::{DeviceInfo, TokenService};

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated, token pair issued", body = TokenPair),
        (status = 401, description = "Unknown account or wrong password"),
        (status = 422, description = "Missing credentials"),
        (status = 429, description = "Login attempts exhausted for this address")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    Extension(WpDb(pool)): Extension<WpDb>,
    Extension(tokens): Extension<Arc<TokenService>>,
    payload: Option<Json<LoginRequest>>,
) -> ApiResult {
    let Some(Json(request)) = payload else {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::BadRequest,
            "Missing request body",
        ));
    };

    let mut validator = Validator::new();
    validator.required("username", &request.username);
    validator.required("password", &request.password);
    if let Err(response) = validator.finish() {
        return Ok(response);
    }

    let username = request.username.trim();

    // Unknown account and wrong password are indistinguishable on purpose
    let Some(user) = users::find_by_login(&pool, username).await? else {
        return Ok(invalid_credentials());
    };
    if !password::verify(&request.password, &user.password_hash) {
        return Ok(invalid_credentials());
    }

    let mut extra = BTreeMap::new();
    extra.insert("username".to_string(), json!(user.login));
    let access_token = tokens.create_access_token(user.id, extra)?;

    let device = DeviceInfo {
        device_id: request.device_id,
        device_name: request.device_name,
        platform: request.platform,
    };
    let ip = extract::client_ip_from_headers(&headers);
    let user_agent = extract::user_agent(&headers);
    let refresh_token = tokens
        .create_refresh_token(user.id, &device, ip.as_deref(), user_agent)
        .await?;

    Ok(success(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: tokens.access_ttl(),
        user: Some(UserSummary::from(&user)),
    }))
}

fn invalid_credentials() -> axum::response::Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        ErrorCode::InvalidCredentials,
        "Invalid username or password",
    )
}
