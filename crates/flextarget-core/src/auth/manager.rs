//! The session of record.
//!
//! [`SessionManager`] owns the logged-in user. Every transition builds a new
//! [`Session`] and publishes it whole through a `watch` channel, then writes
//! the durable copy. A write gate keeps the persisted order equal to the
//! publish order.
//!
//! Token renewal goes through the [`RefreshCoordinator`], which reports back
//! via [`RefreshListener`]. A background timer triggers a refresh every
//! `refresh_interval` while someone is logged in.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::credentials::CredentialStore;
use super::error::AuthError;
use super::refresh::{RefreshCoordinator, RefreshListener};
use super::session::{Session, SessionState, TokenPair};
use crate::api::{ApiError, ApiResponse, AuthEndpoint};
use crate::utils::encode_password;

/// Default time between automatic token renewals (55 minutes)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(55 * 60);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub refresh_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

/// The live renewal task. Dropping `_cancel` wakes the task out of its sleep.
struct RenewalTimer {
    _cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub type SessionSnapshot = Option<Arc<Session>>;

pub struct SessionManager {
    me: Weak<SessionManager>,
    endpoint: Arc<dyn AuthEndpoint>,
    store: Arc<dyn CredentialStore>,
    settings: SessionSettings,
    session: watch::Sender<SessionSnapshot>,
    /// Serializes every publish-then-persist sequence.
    write_gate: AsyncMutex<()>,
    coordinator: RwLock<Option<Arc<RefreshCoordinator>>>,
    renewal: Mutex<Option<RenewalTimer>>,
}

impl SessionManager {
    /// A manager with no refresh coordinator. See [`SessionManager::connect`].
    pub fn new(
        endpoint: Arc<dyn AuthEndpoint>,
        store: Arc<dyn CredentialStore>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let (session, _) = watch::channel(None);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            endpoint,
            store,
            settings,
            session,
            write_gate: AsyncMutex::new(()),
            coordinator: RwLock::new(None),
            renewal: Mutex::new(None),
        })
    }

    /// Build a manager and its refresh coordinator, wired to each other.
    pub fn connect(
        endpoint: Arc<dyn AuthEndpoint>,
        store: Arc<dyn CredentialStore>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let manager = Self::new(Arc::clone(&endpoint), store, settings);
        let listener: Weak<dyn RefreshListener> = Arc::downgrade(&manager) as Weak<dyn RefreshListener>;
        manager.set_refresh_coordinator(Arc::new(RefreshCoordinator::new(endpoint, listener)));
        manager
    }

    pub fn set_refresh_coordinator(&self, coordinator: Arc<RefreshCoordinator>) {
        match self.coordinator.write() {
            Ok(mut slot) => *slot = Some(coordinator),
            Err(poisoned) => *poisoned.into_inner() = Some(coordinator),
        }
    }

    fn refresh_coordinator(&self) -> Option<Arc<RefreshCoordinator>> {
        match self.coordinator.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn current_session(&self) -> SessionSnapshot {
        self.session.borrow().clone()
    }

    /// Change stream of the session. The receiver always holds the latest
    /// value; intermediate values may be skipped.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    pub fn state(&self) -> SessionState {
        SessionState::of(self.session.borrow().as_deref())
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.borrow().as_ref().map(|s| s.access_token.clone())
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Authenticate with a mobile number and a plaintext password.
    ///
    /// A failed login leaves any existing session untouched.
    pub async fn login(&self, mobile: &str, password: &str) -> Result<Arc<Session>, AuthError> {
        let encoded = encode_password(password);
        let response = self.endpoint.login(mobile, &encoded).await?;
        let data = AuthError::check(response, "login")?;

        let session = Arc::new(
            Session::new(data.user_id, data.access_token, data.refresh_token).with_mobile(mobile),
        );
        {
            let _gate = self.write_gate.lock().await;
            self.session.send_replace(Some(Arc::clone(&session)));
            if let Err(e) = self.store.save(&session).await {
                warn!(error = %e, "Failed to persist session after login");
            }
            // Under the gate, so a queued logout always stops this timer
            self.start_renewal_timer();
        }
        info!(user_id = %session.user_id, "Login successful");

        Ok(self.fetch_profile(session).await)
    }

    /// Best-effort display-name lookup after login.
    async fn fetch_profile(&self, session: Arc<Session>) -> Arc<Session> {
        let name = match self.endpoint.get_user(&session.access_token).await {
            Ok(response) => match AuthError::check(response, "get user") {
                Ok(user) => user.username,
                Err(e) => {
                    debug!(error = %e, "User profile unavailable");
                    return session;
                }
            },
            Err(e) => {
                debug!(error = %e, "User profile request failed");
                return session;
            }
        };

        let _gate = self.write_gate.lock().await;
        let mut updated = None;
        self.session.send_if_modified(|current| {
            let next = match current.as_deref() {
                Some(s) if s.user_id == session.user_id => Arc::new(s.with_display_name(name.as_str())),
                _ => return false,
            };
            updated = Some(Arc::clone(&next));
            *current = Some(next);
            true
        });

        match updated {
            Some(next) => {
                if let Err(e) = self.store.update_profile_name(&name).await {
                    warn!(error = %e, "Failed to persist display name");
                }
                next
            }
            None => session,
        }
    }

    /// End the session. Succeeds with nothing to do when logged out.
    ///
    /// The server is told first; its answer does not matter.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _gate = self.write_gate.lock().await;
        let Some(session) = self.current_session() else {
            self.stop_renewal_timer();
            debug!("Logout requested with no session");
            return Ok(());
        };

        match self.endpoint.logout(&session.access_token).await {
            Ok(response) if !response.is_ok() => {
                warn!(code = response.code, msg = %response.msg, "Server rejected logout")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Logout request failed"),
        }

        self.end_session().await;
        info!(user_id = %session.user_id, "Logged out");
        Ok(())
    }

    /// Swap in a new token pair, keeping identity and profile fields.
    /// Does nothing when logged out.
    pub async fn update_tokens(&self, access_token: &str, refresh_token: &str) {
        let tokens = TokenPair::new(access_token, refresh_token);
        let _gate = self.write_gate.lock().await;
        self.apply_tokens(|_| true, &tokens).await;
    }

    pub async fn edit_profile(&self, name: &str) -> Result<(), AuthError> {
        let session = self.current_session().ok_or(AuthError::NotAuthenticated)?;
        let response = self.endpoint.edit_profile(name, &session.access_token).await;
        self.check_authenticated(&session, response).await?;

        let _gate = self.write_gate.lock().await;
        let changed = self.session.send_if_modified(|current| {
            let next = match current.as_deref() {
                Some(s) if s.user_id == session.user_id => s.with_display_name(name),
                _ => return false,
            };
            *current = Some(Arc::new(next));
            true
        });
        if changed {
            if let Err(e) = self.store.update_profile_name(name).await {
                warn!(error = %e, "Failed to persist display name");
            }
            info!(user_id = %session.user_id, "Profile updated");
        }
        Ok(())
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), AuthError> {
        let session = self.current_session().ok_or(AuthError::NotAuthenticated)?;
        let response = self
            .endpoint
            .change_password(
                &encode_password(old_password),
                &encode_password(new_password),
                &session.access_token,
            )
            .await;
        self.check_authenticated(&session, response).await?;
        info!(user_id = %session.user_id, "Password changed");
        Ok(())
    }

    /// Renew the tokens now. Joins a refresh already in flight.
    pub async fn refresh(&self) -> Result<Arc<Session>, AuthError> {
        let coordinator = self.refresh_coordinator().ok_or(AuthError::RefreshUnavailable)?;
        let session = self.current_session().ok_or(AuthError::NotAuthenticated)?;

        coordinator.request_refresh(&session.refresh_token).await?;

        // The listener has already applied the result, unless a logout won.
        self.current_session().ok_or(AuthError::NotAuthenticated)
    }

    /// Start from the stored session, if any.
    ///
    /// The stored session is published right away and validated by a refresh
    /// in the background; the returned handle completes when that refresh
    /// has been applied. A failed validation logs the user out.
    pub async fn restore(&self) -> Option<JoinHandle<()>> {
        let stored = match self.store.load().await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("No stored session");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load stored session");
                return None;
            }
        };

        {
            let _gate = self.write_gate.lock().await;
            self.session.send_replace(Some(Arc::new(stored.session)));
        }
        info!(saved_at = %stored.saved_at, "Restored stored session");

        let manager = self.me.upgrade()?;
        Some(tokio::spawn(async move {
            if let Err(e) = manager.refresh().await {
                warn!(error = %e, "Stored session could not be validated");
            }
        }))
    }

    // ========================================================================
    // Renewal timer
    // ========================================================================

    pub fn has_renewal_timer(&self) -> bool {
        self.renewal_slot()
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    /// Replace any running timer with a fresh one.
    fn start_renewal_timer(&self) {
        let (cancel, cancelled) = oneshot::channel::<()>();
        let interval = self.settings.refresh_interval;
        let me = self.me.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancelled => return,
            }
            let Some(manager) = me.upgrade() else {
                return;
            };
            debug!("Renewal timer fired");
            if let Err(e) = manager.refresh().await {
                warn!(error = %e, "Scheduled token refresh failed");
            }
        });

        // The previous sender drops here, which cancels its sleep
        *self.renewal_slot() = Some(RenewalTimer {
            _cancel: cancel,
            handle,
        });
    }

    fn stop_renewal_timer(&self) {
        if self.renewal_slot().take().is_some() {
            debug!("Renewal timer stopped");
        }
    }

    fn renewal_slot(&self) -> MutexGuard<'_, Option<RenewalTimer>> {
        self.renewal.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Internals. Callers of these hold the write gate.
    // ========================================================================

    /// Publish `tokens` if the current session satisfies `applies`, then
    /// persist them. Returns whether anything changed.
    async fn apply_tokens<F>(&self, applies: F, tokens: &TokenPair) -> bool
    where
        F: Fn(&Session) -> bool,
    {
        let changed = self.session.send_if_modified(|current| {
            let next = match current.as_deref() {
                Some(s) if applies(s) => s.with_tokens(tokens),
                _ => return false,
            };
            *current = Some(Arc::new(next));
            true
        });
        if changed {
            if let Err(e) = self
                .store
                .update_tokens(&tokens.access_token, &tokens.refresh_token)
                .await
            {
                warn!(error = %e, "Failed to persist refreshed tokens");
            }
        }
        changed
    }

    /// Stop the timer, publish the logged-out state, clear storage.
    async fn end_session(&self) {
        self.stop_renewal_timer();
        self.session.send_replace(None);
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear stored session");
        }
    }

    /// Log out without telling the server, if the current session still
    /// satisfies `applies`.
    async fn force_logout<F>(&self, applies: F, reason: &str)
    where
        F: Fn(&Session) -> bool,
    {
        let _gate = self.write_gate.lock().await;
        let current = self.current_session();
        match current {
            Some(session) if applies(&session) => {
                self.end_session().await;
                warn!(user_id = %session.user_id, reason, "Session ended");
            }
            _ => debug!(reason, "Forced logout skipped, session already changed"),
        }
    }

    /// Map an authenticated call's outcome, forcing a logout on 401.
    async fn check_authenticated<T>(
        &self,
        session: &Session,
        response: Result<ApiResponse<T>, ApiError>,
    ) -> Result<(), AuthError> {
        let result = match response {
            Ok(response) => AuthError::check_code(&response),
            Err(e) => Err(AuthError::from(e)),
        };
        if let Err(e) = &result {
            if e.is_unauthorized() {
                let access_token = session.access_token.as_str();
                self.force_logout(|s| s.access_token == access_token, "unauthorized")
                    .await;
            }
        }
        result
    }
}

#[async_trait]
impl RefreshListener for SessionManager {
    async fn on_refreshed(&self, used_refresh_token: &str, tokens: &TokenPair) {
        let _gate = self.write_gate.lock().await;
        let applied = self
            .apply_tokens(|s| s.refresh_token == used_refresh_token, tokens)
            .await;
        if applied {
            self.start_renewal_timer();
        } else {
            debug!("Discarding refresh result for a session that has changed");
        }
    }

    async fn on_refresh_failed(&self, used_refresh_token: &str, error: &AuthError) {
        let reason = format!("token refresh failed: {}", error);
        self.force_logout(|s| s.refresh_token == used_refresh_token, &reason)
            .await;
    }
}
