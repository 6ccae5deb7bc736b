//! API client for the FlexTarget account backend.
//!
//! This module provides the `ApiClient` struct, the reqwest implementation
//! of [`AuthEndpoint`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::endpoint::AuthEndpoint;
use super::types::{
    ApiResponse, ChangePasswordRequest, EditUserData, EditUserRequest, LoginData, LoginRequest,
    RefreshData, RefreshTokenRequest, UserInfo,
};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Production backend.
pub const DEFAULT_BASE_URL: &str = "https://etarget.topoint-archery.cn";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the account endpoints.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client against the production backend
    pub fn new() -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_BASE_URL, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_headers(access_token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = access_token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidResponse(format!("invalid token header: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
        access_token: Option<&str>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .post(&url)
                .headers(Self::auth_headers(access_token)?);
            request = match body {
                Some(body) => request.json(body),
                None => request.header(header::CONTENT_TYPE, "application/json"),
            };

            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    let parsed: ApiResponse<T> = serde_json::from_str(&text).map_err(|e| {
                        ApiError::InvalidResponse(format!("{} returned malformed JSON: {}", path, e))
                    })?;
                    debug!(path, code = parsed.code, "Response received");
                    return Ok(parsed);
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(path, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl AuthEndpoint for ApiClient {
    async fn login(&self, mobile: &str, password: &str) -> Result<ApiResponse<LoginData>, ApiError> {
        let body = LoginRequest { mobile, password };
        self.post("/user/login", Some(&body), None).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ApiResponse<RefreshData>, ApiError> {
        let body = RefreshTokenRequest { refresh_token };
        self.post("/user/token/refresh", Some(&body), None).await
    }

    async fn logout(&self, access_token: &str) -> Result<ApiResponse<Value>, ApiError> {
        self.post::<Value, ()>("/user/logout", None, Some(access_token))
            .await
    }

    async fn edit_profile(
        &self,
        username: &str,
        access_token: &str,
    ) -> Result<ApiResponse<EditUserData>, ApiError> {
        let body = EditUserRequest { username };
        self.post("/user/edit", Some(&body), Some(access_token)).await
    }

    async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        access_token: &str,
    ) -> Result<ApiResponse<EditUserData>, ApiError> {
        let body = ChangePasswordRequest {
            old_password,
            new_password,
        };
        self.post("/user/change-password", Some(&body), Some(access_token))
            .await
    }

    async fn get_user(&self, access_token: &str) -> Result<ApiResponse<UserInfo>, ApiError> {
        self.post::<UserInfo, ()>("/user/get", None, Some(access_token))
            .await
    }
}
