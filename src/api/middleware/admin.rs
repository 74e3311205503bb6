//! Administrator gate, stacked on top of the auth layer for admin routes.

use axum::extract::{Extension, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tracing::error;

use super::CurrentUser;
use crate::api::response::{error_response, ErrorCode};
use crate::store::{users, WpDb};

pub async fn admin(
    Extension(WpDb(pool)): Extension<WpDb>,
    request: Request,
    next: Next,
) -> Response {
    let Some(user) = request.extensions().get::<CurrentUser>() else {
        // Auth layer missing or bypassed; never let that fail open
        return error_response(
            StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthorized,
            "Authentication required",
        );
    };

    match users::is_admin(&pool, user.id).await {
        Ok(true) => next.run(request).await,
        Ok(false) => error_response(
            StatusCode::FORBIDDEN,
            ErrorCode::AdminRequired,
            "Administrator access required",
        ),
        Err(err) => {
            error!("Failed to check administrator role: {:#}", err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                "An unexpected error occurred",
            )
        }
    }
}
