//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! backend URL, renewal and request timing, where credentials are kept, and
//! the last mobile number used to log in.
//!
//! Configuration is stored at `~/.config/flextarget/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::{DEFAULT_BASE_URL, REQUEST_TIMEOUT_SECS};
use crate::api::ApiClient;
use crate::auth::{
    CredentialStore, EncryptedFileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
    SessionSettings, DEFAULT_REFRESH_INTERVAL,
};

/// Application name used for config/data directory paths
const APP_NAME: &str = "flextarget";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Overrides `base_url`
pub const ENV_BASE_URL: &str = "FLEXTARGET_BASE_URL";

/// Passphrase for the encrypted credential file
pub const ENV_VAULT_KEY: &str = "FLEXTARGET_VAULT_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialBackend {
    #[default]
    Keyring,
    EncryptedFile,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub credential_backend: CredentialBackend,
    pub last_mobile: Option<String>,
    /// Passphrase for `encrypted_file`, normally supplied via the environment
    #[serde(skip)]
    pub vault_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            credential_backend: CredentialBackend::default(),
            last_mobile: None,
            vault_key: None,
        }
    }
}

impl Config {
    /// Load the config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = url;
        }
        if let Some(key) = var(ENV_VAULT_KEY).filter(|v| !v.is_empty()) {
            self.vault_key = Some(key);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the encrypted session file and logs.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
        }
    }

    pub fn api_client(&self) -> Result<ApiClient> {
        ApiClient::with_base_url(&self.base_url, Duration::from_secs(self.request_timeout_secs))
            .context("Failed to build HTTP client")
    }

    /// Open the configured credential backend.
    pub fn credential_store(&self) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.credential_backend {
            CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::default()),
            CredentialBackend::Memory => Arc::new(MemoryCredentialStore::new()),
            CredentialBackend::EncryptedFile => {
                let key = self.vault_key.clone().ok_or_else(|| {
                    anyhow::anyhow!("{} must be set for the encrypted_file backend", ENV_VAULT_KEY)
                })?;
                Arc::new(EncryptedFileCredentialStore::in_dir(&self.data_dir()?, key))
            }
        };
        Ok(store)
    }
}
