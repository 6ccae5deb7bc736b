use async_trait::async_trait;
use keyring::Entry;
use tokio::sync::Mutex;

use super::error::StorageError;
use super::session::{Session, StoredSession};

const SERVICE_NAME: &str = "flextarget";
const SESSION_ACCOUNT: &str = "session";

/// Durable storage for the current user's session.
///
/// The session manager treats every write as best effort: failures are
/// logged and never undo the in-memory state.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<StoredSession>, StorageError>;

    async fn save(&self, session: &Session) -> Result<(), StorageError>;

    async fn update_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), StorageError>;

    async fn update_profile_name(&self, name: &str) -> Result<(), StorageError>;

    /// Remove the stored session. Clearing an empty store succeeds.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// Apply `change` to whatever `store` currently holds and write it back.
///
/// Shared by the backends that only know how to load and save whole values.
pub(crate) async fn modify_stored<S, F>(store: &S, change: F) -> Result<(), StorageError>
where
    S: CredentialStore + ?Sized,
    F: FnOnce(&Session) -> Session + Send,
{
    let stored = store.load().await?.ok_or(StorageError::Missing)?;
    store.save(&change(&stored.session)).await
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<StoredSession>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            slot: Mutex::new(Some(StoredSession::new(session))),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<StoredSession>, StorageError> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        *self.slot.lock().await = Some(StoredSession::new(session.clone()));
        Ok(())
    }

    async fn update_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), StorageError> {
        let mut slot = self.slot.lock().await;
        let stored = slot.as_mut().ok_or(StorageError::Missing)?;
        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            ..stored.session.clone()
        };
        stored.touch(session);
        Ok(())
    }

    async fn update_profile_name(&self, name: &str) -> Result<(), StorageError> {
        let mut slot = self.slot.lock().await;
        let stored = slot.as_mut().ok_or(StorageError::Missing)?;
        let session = stored.session.with_display_name(name);
        stored.touch(session);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        *self.slot.lock().await = None;
        Ok(())
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Stores the session as JSON in the OS keychain.
///
/// Keychain calls block, so each one runs on the blocking pool.
pub struct KeyringCredentialStore {
    service: String,
    account: String,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME, SESSION_ACCOUNT)
    }
}

impl KeyringCredentialStore {
    pub fn new(service: &str, account: &str) -> Self {
        Self {
            service: service.to_string(),
            account: account.to_string(),
        }
    }

    async fn with_entry<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, StorageError> + Send + 'static,
    {
        let service = self.service.clone();
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &account)?;
            op(entry)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn load(&self) -> Result<Option<StoredSession>, StorageError> {
        self.with_entry(|entry| match entry.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let json = serde_json::to_string(&StoredSession::new(session.clone()))?;
        self.with_entry(move |entry| Ok(entry.set_password(&json)?))
            .await
    }

    async fn update_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), StorageError> {
        modify_stored(self, |session| Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            ..session.clone()
        })
        .await
    }

    async fn update_profile_name(&self, name: &str) -> Result<(), StorageError> {
        modify_stored(self, |session| session.with_display_name(name)).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.with_entry(|entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await
    }
}
