//! REST API module for the FlexTarget account backend.
//!
//! This module provides the [`AuthEndpoint`] trait the session layer talks
//! to, and `ApiClient`, its reqwest implementation.
//!
//! Every endpoint is a JSON `POST`; authenticated calls carry the access
//! token as a bearer header.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod types;

pub use client::ApiClient;
pub use endpoint::AuthEndpoint;
pub use error::ApiError;
pub use types::{ApiResponse, EditUserData, LoginData, RefreshData, UserInfo};
