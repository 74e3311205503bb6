//! Response envelope.
//!
//! Every JSON body leaving the API has the same shape:
//!
//! ```json
//! {
//!   "success": true,
//!   "data": {},
//!   "error": {"code": "...", "message": "...", "details": {}},
//!   "meta": {"api_version": "1.0", "timestamp": "2026-01-01T00:00:00Z"}
//! }
//! ```
//!
//! `data` and `error` are always present; the unused one is `null`. Clients
//! were written against that shape, so it never changes. Paginated listings
//! carry their page block under `meta.pagination`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::error;
use utoipa::ToSchema;

pub const API_VERSION: &str = "1.0";

/// Stable machine-readable error identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidCredentials,
    TokenExpired,
    RefreshFailed,
    UserNotFound,
    AdminRequired,
    RateLimited,
    ValidationError,
    OdometerDecrease,
    OdometerJumpTooLarge,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    UnprocessableEntity,
    TooManyRequests,
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::RefreshFailed => "REFRESH_FAILED",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::AdminRequired => "ADMIN_REQUIRED",
            Self::RateLimited => "RATE_LIMITED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::OdometerDecrease => "ODOMETER_DECREASE",
            Self::OdometerJumpTooLarge => "ODOMETER_JUMP_TOO_LARGE",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::Conflict => "CONFLICT",
            Self::UnprocessableEntity => "UNPROCESSABLE_ENTITY",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Generic code for a status, used when no specific code applies.
    #[must_use]
    pub const fn for_status(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST => Self::BadRequest,
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::FORBIDDEN => Self::Forbidden,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::METHOD_NOT_ALLOWED => Self::MethodNotAllowed,
            StatusCode::CONFLICT => Self::Conflict,
            StatusCode::UNPROCESSABLE_ENTITY => Self::UnprocessableEntity,
            StatusCode::TOO_MANY_REQUESTS => Self::TooManyRequests,
            StatusCode::SERVICE_UNAVAILABLE => Self::ServiceUnavailable,
            _ => Self::InternalError,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct Pagination {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct Meta {
    pub api_version: &'static str,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct Envelope {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<ErrorBody>,
    pub meta: Meta,
}

fn meta() -> Meta {
    Meta {
        api_version: API_VERSION,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        pagination: None,
    }
}

/// 200 with `data`.
pub fn success<T: Serialize>(data: T) -> Response {
    success_with_status(StatusCode::OK, data)
}

pub fn success_with_status<T: Serialize>(status: StatusCode, data: T) -> Response {
    let data = match serde_json::to_value(data) {
        Ok(value) => value,
        Err(err) => {
            error!("Failed to serialize response data: {}", err);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                "An unexpected error occurred",
            );
        }
    };

    let envelope = Envelope {
        success: true,
        data: Some(data),
        error: None,
        meta: meta(),
    };

    (status, Json(envelope)).into_response()
}

/// Listing response: items in `data`, page block under `meta.pagination`.
pub fn paginated<T: Serialize>(items: T, page: i64, per_page: i64, total: i64) -> Response {
    let data = match serde_json::to_value(items) {
        Ok(value) => value,
        Err(err) => {
            error!("Failed to serialize response data: {}", err);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                "An unexpected error occurred",
            );
        }
    };

    let divisor = per_page.max(1);
    let envelope = Envelope {
        success: true,
        data: Some(data),
        error: None,
        meta: Meta {
            pagination: Some(Pagination {
                total,
                page,
                per_page,
                total_pages: (total + divisor - 1) / divisor,
                has_more: page * per_page < total,
            }),
            ..meta()
        },
    };

    (StatusCode::OK, Json(envelope)).into_response()
}

pub fn error_response(status: StatusCode, code: ErrorCode, message: &str) -> Response {
    build_error(status, code, message, None)
}

pub fn error_with_details(
    status: StatusCode,
    code: ErrorCode,
    message: &str,
    details: Value,
) -> Response {
    build_error(status, code, message, Some(details))
}

fn build_error(
    status: StatusCode,
    code: ErrorCode,
    message: &str,
    details: Option<Value>,
) -> Response {
    let envelope = Envelope {
        success: false,
        data: None,
        error: Some(ErrorBody {
            code: code.as_str(),
            message: message.to_string(),
            details,
        }),
        meta: meta(),
    };

    (status, Json(envelope)).into_response()
}

/// Internal failure carried out of a handler with `?`.
///
/// The cause is logged server-side; clients only ever see the generic
/// 500 envelope.
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Request failed: {:#}", self.0);
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError,
            "An unexpected error occurred",
        )
    }
}

pub type ApiResult = Result<Response, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn success_envelope_shape() {
        let response = success(json!({"answer": 42}));
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["answer"], json!(42));
        assert_eq!(body["error"], Value::Null);
        assert_eq!(body["meta"]["api_version"], json!(API_VERSION));
        assert!(body["meta"]["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(body["meta"].get("pagination").is_none());
    }

    #[tokio::test]
    async fn error_envelope_shape() {
        let response = error_response(
            StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidCredentials,
            "Invalid username or password",
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["data"], Value::Null);
        assert_eq!(body["error"]["code"], json!("INVALID_CREDENTIALS"));
        assert_eq!(
            body["error"]["message"],
            json!("Invalid username or password")
        );
        assert_eq!(body["error"]["details"], Value::Null);
    }

    // Mobile clients read `data` and `error` unconditionally.
    #[tokio::test]
    async fn unused_members_serialize_as_null() {
        let success_body = body_json(success(json!({}))).await;
        assert!(success_body.as_object().unwrap().contains_key("error"));
        assert_eq!(success_body["error"], Value::Null);

        let error_body = body_json(error_response(
            StatusCode::NOT_FOUND,
            ErrorCode::NotFound,
            "Not found",
        ))
        .await;
        assert!(error_body.as_object().unwrap().contains_key("data"));
        assert_eq!(error_body["data"], Value::Null);
    }

    #[tokio::test]
    async fn error_details_pass_through() {
        let response = error_with_details(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::ValidationError,
            "Validation failed",
            json!({"name": "Name is required"}),
        );

        let body = body_json(response).await;
        assert_eq!(body["error"]["details"]["name"], json!("Name is required"));
    }

    #[tokio::test]
    async fn pagination_lives_in_meta() {
        let response = paginated(json!([1, 2, 3]), 2, 3, 7);
        let body = body_json(response).await;

        assert_eq!(body["data"], json!([1, 2, 3]));
        let pagination = &body["meta"]["pagination"];
        assert_eq!(pagination["total"], json!(7));
        assert_eq!(pagination["page"], json!(2));
        assert_eq!(pagination["per_page"], json!(3));
        assert_eq!(pagination["total_pages"], json!(3));
        assert_eq!(pagination["has_more"], json!(true));
    }

    #[tokio::test]
    async fn has_more_clears_on_last_page() {
        let body = body_json(paginated(json!([7]), 3, 3, 7)).await;
        assert_eq!(body["meta"]["pagination"]["has_more"], json!(false));
    }

    #[test]
    fn status_to_code_map() {
        assert_eq!(
            ErrorCode::for_status(StatusCode::NOT_FOUND).as_str(),
            "NOT_FOUND"
        );
        assert_eq!(
            ErrorCode::for_status(StatusCode::METHOD_NOT_ALLOWED).as_str(),
            "METHOD_NOT_ALLOWED"
        );
        assert_eq!(
            ErrorCode::for_status(StatusCode::IM_A_TEAPOT).as_str(),
            "INTERNAL_ERROR"
        );
    }
}
