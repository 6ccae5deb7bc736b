use async_trait::async_trait;
use serde_json::Value;

use super::types::{ApiResponse, EditUserData, LoginData, RefreshData, UserInfo};
use super::ApiError;

/// The remote authentication service.
///
/// Implementations return the backend envelope untouched: an `Ok` response
/// may still carry a non-zero application `code`, which callers interpret.
/// `Err` is reserved for transport failures and HTTP-layer errors.
///
/// Passwords arrive already encoded (see [`crate::utils::encode_password`]).
#[async_trait]
pub trait AuthEndpoint: Send + Sync {
    async fn login(&self, mobile: &str, password: &str) -> Result<ApiResponse<LoginData>, ApiError>;

    async fn refresh(&self, refresh_token: &str) -> Result<ApiResponse<RefreshData>, ApiError>;

    async fn logout(&self, access_token: &str) -> Result<ApiResponse<Value>, ApiError>;

    async fn edit_profile(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<ApiResponse<EditUserData>, ApiError>;

    async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        access_token: &str,
    ) -> Result<ApiResponse<EditUserData>, ApiError>;

    async fn get_user(&self, access_token: &str) -> Result<ApiResponse<UserInfo>, ApiError>;
}
