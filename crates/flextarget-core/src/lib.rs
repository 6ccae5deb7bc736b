//! Core library for the FlexTarget mobile client session.
//!
//! - [`auth`]: session manager, single-flight token refresh, credential stores
//! - [`api`]: the `/user/*` endpoints and their reqwest client
//! - [`config`]: on-disk configuration
//! - [`utils`]: password encoding and display helpers

pub mod api;
pub mod auth;
pub mod config;
pub mod utils;

pub use api::{ApiClient, ApiError, AuthEndpoint};
pub use auth::{
    AuthError, CredentialStore, EncryptedFileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore, Session, SessionManager, SessionSettings, SessionState, TokenPair,
};
pub use config::{Config, CredentialBackend};
