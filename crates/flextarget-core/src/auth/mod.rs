//! Authentication module for the user session and its credentials.
//!
//! This module provides:
//! - `SessionManager`: the session of record, login/logout, renewal timer
//! - `RefreshCoordinator`: single-flight token refresh
//! - `CredentialStore`: durable session storage (memory, OS keyring, or an
//!   encrypted file)
//!
//! Only the manager changes the session. Only the coordinator calls the
//! refresh endpoint, and it reports every outcome back to the manager.

pub mod credentials;
pub mod error;
pub mod manager;
pub mod refresh;
pub mod session;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

pub use credentials::{CredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use error::{AuthError, StorageError};
pub use manager::{SessionManager, SessionSettings, SessionSnapshot, DEFAULT_REFRESH_INTERVAL};
pub use refresh::{RefreshCoordinator, RefreshListener, RefreshResult};
pub use session::{Session, SessionState, StoredSession, TokenPair};
pub use vault::EncryptedFileCredentialStore;
