//! Encrypted on-disk credential store.
//!
//! The session is serialized to JSON, sealed with ChaCha20-Poly1305 and
//! written as a small JSON envelope:
//!
//! ```text
//! { "version": 1, "salt": "<b64>", "nonce": "<b64>", "ciphertext": "<b64>" }
//! ```
//!
//! The key is derived from a passphrase with Argon2 (default parameters) and a
//! random per-file salt. Each write uses a fresh nonce.

use std::path::{Path, PathBuf};

use argon2::Argon2;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::credentials::{modify_stored, CredentialStore};
use super::error::StorageError;
use super::session::{Session, StoredSession};

/// Session file name in the data directory
pub const VAULT_FILE: &str = "session.vault";

const ENVELOPE_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

pub struct EncryptedFileCredentialStore {
    path: PathBuf,
    passphrase: String,
    /// Last derived key and the salt it belongs to. Argon2 is slow on purpose,
    /// so derive once per salt. Also serializes file access.
    key_cache: Mutex<Option<([u8; SALT_LEN], [u8; KEY_LEN])>>,
}

impl EncryptedFileCredentialStore {
    pub fn new(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: passphrase.into(),
            key_cache: Mutex::new(None),
        }
    }

    /// Store in `dir/session.vault`.
    pub fn in_dir(dir: &Path, passphrase: impl Into<String>) -> Self {
        Self::new(dir.join(VAULT_FILE), passphrase)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the key for `salt`, deriving it on the blocking pool when the
    /// cache holds a different salt.
    async fn key_for(
        &self,
        cache: &mut Option<([u8; SALT_LEN], [u8; KEY_LEN])>,
        salt: &[u8; SALT_LEN],
    ) -> Result<[u8; KEY_LEN], StorageError> {
        if let Some((cached_salt, key)) = cache.as_ref() {
            if cached_salt == salt {
                return Ok(*key);
            }
        }

        let passphrase = self.passphrase.clone();
        let salt = *salt;
        let key = tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt))
            .await
            .map_err(|e| StorageError::Crypto(format!("key derivation task failed: {}", e)))??;
        *cache = Some((salt, key));
        Ok(key)
    }

    fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N], StorageError> {
        let bytes = STANDARD
            .decode(value)
            .map_err(|e| StorageError::Crypto(format!("bad {} encoding: {}", field, e)))?;
        bytes
            .try_into()
            .map_err(|_| StorageError::Crypto(format!("bad {} length", field)))
    }

    fn seal(&self, key: &[u8; KEY_LEN], salt: &[u8; SALT_LEN], plaintext: &[u8]) -> Result<Envelope, StorageError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| StorageError::Crypto("encryption failed".to_string()))?;

        Ok(Envelope {
            version: ENVELOPE_VERSION,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    fn open(&self, key: &[u8; KEY_LEN], envelope: &Envelope) -> Result<Vec<u8>, StorageError> {
        let nonce: [u8; NONCE_LEN] = Self::decode_fixed("nonce", &envelope.nonce)?;
        let ciphertext = STANDARD
            .decode(&envelope.ciphertext)
            .map_err(|e| StorageError::Crypto(format!("bad ciphertext encoding: {}", e)))?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| StorageError::Crypto("wrong passphrase or corrupted vault".to_string()))
    }

    async fn read_envelope(&self) -> Result<Option<Envelope>, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a temp file and rename, so a crash never leaves half a vault.
    async fn write_envelope(&self, envelope: &Envelope) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(envelope)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Argon2 with default parameters. Slow on purpose; keep it off the runtime.
fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN], StorageError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StorageError::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

#[async_trait]
impl CredentialStore for EncryptedFileCredentialStore {
    async fn load(&self) -> Result<Option<StoredSession>, StorageError> {
        let mut cache = self.key_cache.lock().await;
        let Some(envelope) = self.read_envelope().await? else {
            return Ok(None);
        };
        if envelope.version != ENVELOPE_VERSION {
            return Err(StorageError::Crypto(format!(
                "unsupported vault version {}",
                envelope.version
            )));
        }

        let salt: [u8; SALT_LEN] = Self::decode_fixed("salt", &envelope.salt)?;
        let key = self.key_for(&mut cache, &salt).await?;
        let plaintext = self.open(&key, &envelope)?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let mut cache = self.key_cache.lock().await;
        // Reuse the salt of the current key, if any
        let salt = match cache.as_ref() {
            Some((salt, _)) => *salt,
            None => {
                let mut salt = [0u8; SALT_LEN];
                rand::thread_rng().fill_bytes(&mut salt);
                salt
            }
        };
        let key = self.key_for(&mut cache, &salt).await?;

        let plaintext = serde_json::to_vec(&StoredSession::new(session.clone()))?;
        let envelope = self.seal(&key, &salt, &plaintext)?;
        self.write_envelope(&envelope).await?;
        debug!(path = %self.path.display(), "Session vault written");
        Ok(())
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
        let _guard = self.key_cache.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
