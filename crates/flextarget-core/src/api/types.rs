//! Request and response bodies for the `/user/*` endpoints.
//!
//! Every endpoint answers with the same envelope: an application `code`
//! (0 on success), a human-readable `msg`, and an optional `data` payload.

use serde::{Deserialize, Serialize};

/// Application code the backend uses for success.
pub const CODE_OK: i32 = 0;

/// Application code the backend uses for an invalid or expired token.
pub const CODE_UNAUTHORIZED: i32 = 401;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    pub fn is_unauthorized(&self) -> bool {
        self.code == CODE_UNAUTHORIZED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginData {
    #[serde(rename = "user_uuid")]
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

/// Refresh responses may omit the refresh token, in which case the old one
/// stays valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshData {
    #[serde(rename = "user_uuid", default)]
    pub user_id: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditUserData {
    #[serde(rename = "user_uuid")]
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(rename = "user_uuid", default)]
    pub user_id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub mobile: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub mobile: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct EditUserRequest<'a> {
    pub username: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChangePasswordRequest<'a> {
    pub old_password: &'a str,
    pub new_password: &'a str,
}
