//! Request and response bodies for the auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::users::WpCredentials;

#[derive(Deserialize, ToSchema, Debug)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub platform: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub platform: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub all_devices: bool,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: String,
}

impl From<&WpCredentials> for UserSummary {
    fn from(user: &WpCredentials) -> Self {
        Self {
            id: user.id,
            username: user.login.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
}
