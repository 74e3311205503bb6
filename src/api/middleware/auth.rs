//! Bearer-token authentication.
//!
//! A valid token is not enough on its own: the WordPress account behind the
//! `sub` claim must still exist, so deleted users lose access the moment
//! their next request arrives rather than when the token expires.

use axum::extract::{Extension, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::error;

use super::{AuthUserId, CurrentUser};
use crate::api::extract;
use crate::api::response::{error_response, ErrorCode};
use crate::store::{users, WpDb};
use crate::tokens::{TokenService, TokenStatus};

pub async fn auth(
    Extension(WpDb(pool)): Extension<WpDb>,
    Extension(tokens): Extension<Arc<TokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract::bearer_token(request.headers()).map(str::to_string) else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthorized,
            "Authentication required",
        );
    };

    let claims = match tokens.inspect_access_token(&token) {
        TokenStatus::Valid(claims) => claims,
        TokenStatus::Expired => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                ErrorCode::TokenExpired,
                "Access token has expired",
            );
        }
        TokenStatus::Invalid => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                ErrorCode::Unauthorized,
                "Invalid access token",
            );
        }
    };

    let user = match users::find_by_id(&pool, claims.sub).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                ErrorCode::UserNotFound,
                "User account no longer exists",
            );
        }
        Err(err) => {
            error!("Failed to load authenticated user: {:#}", err);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                "An unexpected error occurred",
            );
        }
    };

    let user_id = user.id;
    request.extensions_mut().insert(CurrentUser {
        id: user.id,
        login: user.login,
        email: user.email,
        display_name: user.display_name,
    });

    let mut response = next.run(request).await;
    // Breadcrumb for the request logger running outside this layer
    response.extensions_mut().insert(AuthUserId(user_id));
    response
}
