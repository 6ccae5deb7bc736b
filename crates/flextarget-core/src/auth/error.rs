use thiserror::Error;

use crate::api::types::{ApiResponse, CODE_UNAUTHORIZED};
use crate::api::ApiError;

/// Errors surfaced by the session layer.
///
/// `Clone` so that every waiter on a shared refresh observes the same value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{message} (code {code})")]
    Application { code: i32, message: String },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Token refresh is not configured")]
    RefreshUnavailable,
}

impl AuthError {
    /// Build the error for a non-zero application code.
    pub fn from_code(code: i32, message: &str) -> Self {
        if code == CODE_UNAUTHORIZED {
            AuthError::Unauthorized(message.to_string())
        } else {
            AuthError::Application {
                code,
                message: message.to_string(),
            }
        }
    }

    /// The response carried `code == 0` but no payload.
    pub fn missing_data(what: &str) -> Self {
        AuthError::Application {
            code: -1,
            message: format!("Invalid {} response: no data received", what),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AuthError::Unauthorized(_))
    }

    /// Unwrap a successful envelope into its payload, or map the application
    /// code to an error.
    pub(crate) fn check<T>(response: ApiResponse<T>, what: &str) -> Result<T, AuthError> {
        if !response.is_ok() {
            return Err(Self::from_code(response.code, &response.msg));
        }
        response.data.ok_or_else(|| Self::missing_data(what))
    }

    /// Like [`AuthError::check`] for endpoints whose payload is irrelevant.
    pub(crate) fn check_code<T>(response: &ApiResponse<T>) -> Result<(), AuthError> {
        if response.is_ok() {
            Ok(())
        } else {
            Err(Self::from_code(response.code, &response.msg))
        }
    }
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => AuthError::Unauthorized("401".to_string()),
            ApiError::Network(e) => AuthError::Network(e.to_string()),
            ApiError::RateLimited => AuthError::Application {
                code: 429,
                message: "Rate limited - please wait before retrying".to_string(),
            },
            ApiError::Status { status, body } => AuthError::Application {
                code: i32::from(status),
                message: body,
            },
            ApiError::InvalidResponse(message) => AuthError::Application { code: -1, message },
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err.to_string())
    }
}

/// Errors from a [`CredentialStore`](crate::auth::CredentialStore).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("No stored session to update")]
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_distinguishes_unauthorized() {
        assert_eq!(
            AuthError::from_code(401, "token expired"),
            AuthError::Unauthorized("token expired".to_string())
        );
        assert_eq!(
            AuthError::from_code(500, "server busy"),
            AuthError::Application {
                code: 500,
                message: "server busy".to_string()
            }
        );
    }

    #[test]
    fn test_check_requires_data_on_success() {
        let resp: ApiResponse<String> = ApiResponse {
            code: 0,
            msg: String::new(),
            data: None,
        };
        let err = AuthError::check(resp, "login").expect_err("missing data");
        assert!(matches!(err, AuthError::Application { code: -1, .. }));
    }

    #[test]
    fn test_api_unauthorized_converts() {
        assert!(AuthError::from(ApiError::Unauthorized).is_unauthorized());
    }

    #[test]
    fn test_application_error_displays_endpoint_message() {
        let err = AuthError::from_code(1002, "Wrong password");
        assert_eq!(err.to_string(), "Wrong password (code 1002)");
    }
}
