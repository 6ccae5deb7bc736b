//! Stub collaborators shared by the auth tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use super::credentials::{CredentialStore, MemoryCredentialStore};
use super::error::StorageError;
use super::session::{Session, StoredSession};
use crate::api::{ApiError, ApiResponse, AuthEndpoint, EditUserData, LoginData, RefreshData, UserInfo};

pub type Reply<T> = Result<ApiResponse<T>, ApiError>;

pub fn ok<T>(data: T) -> Reply<T> {
    Ok(ApiResponse {
        code: 0,
        msg: "success".to_string(),
        data: Some(data),
    })
}

pub fn code<T>(code: i32, msg: &str) -> Reply<T> {
    Ok(ApiResponse {
        code,
        msg: msg.to_string(),
        data: None,
    })
}

pub fn login_ok(user_id: &str, access: &str, refresh: &str) -> Reply<LoginData> {
    ok(LoginData {
        user_id: user_id.to_string(),
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
    })
}

pub fn refresh_ok(access: &str, refresh: &str) -> Reply<RefreshData> {
    ok(RefreshData {
        user_id: None,
        access_token: access.to_string(),
        refresh_token: Some(refresh.to_string()),
    })
}

pub fn user_ok(name: &str) -> Reply<UserInfo> {
    ok(UserInfo {
        user_id: Some("u1".to_string()),
        username: name.to_string(),
        mobile: None,
    })
}

fn edit_ok() -> Reply<EditUserData> {
    ok(EditUserData {
        user_id: "u1".to_string(),
    })
}

/// `ApiError` wraps `reqwest::Error` and is not `Clone`; rebuild a reply so
/// the same canned answer can be served more than once.
fn replay<T: Clone>(reply: &Reply<T>) -> Reply<T> {
    match reply {
        Ok(resp) => Ok(resp.clone()),
        Err(ApiError::Unauthorized) => Err(ApiError::Unauthorized),
        Err(ApiError::RateLimited) => Err(ApiError::RateLimited),
        Err(ApiError::Status { status, body }) => Err(ApiError::Status {
            status: *status,
            body: body.clone(),
        }),
        Err(ApiError::InvalidResponse(m)) => Err(ApiError::InvalidResponse(m.clone())),
        Err(ApiError::Network(e)) => Err(ApiError::InvalidResponse(e.to_string())),
    }
}

/// Holds refresh calls until opened.
pub struct RefreshGate {
    tx: watch::Sender<bool>,
}

impl RefreshGate {
    pub fn open(&self) {
        self.tx.send_replace(true);
    }
}

/// Scriptable [`AuthEndpoint`] that counts its calls.
///
/// Every operation succeeds by default: login yields `u1/A1/R1`, refresh
/// yields `A2/R2`, get-user yields the name "Ann".
pub struct StubEndpoint {
    login: Mutex<Reply<LoginData>>,
    refresh: Mutex<Reply<RefreshData>>,
    logout: Mutex<Reply<Value>>,
    edit: Mutex<Reply<EditUserData>>,
    change_password: Mutex<Reply<EditUserData>>,
    get_user: Mutex<Reply<UserInfo>>,
    refresh_gate: Mutex<Option<watch::Receiver<bool>>>,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    get_user_calls: AtomicUsize,
    last_login_password: Mutex<Option<String>>,
    last_passwords: Mutex<Option<(String, String)>>,
}

impl StubEndpoint {
    pub fn new() -> Self {
        Self {
            login: Mutex::new(login_ok("u1", "A1", "R1")),
            refresh: Mutex::new(refresh_ok("A2", "R2")),
            logout: Mutex::new(ok(Value::Null)),
            edit: Mutex::new(edit_ok()),
            change_password: Mutex::new(edit_ok()),
            get_user: Mutex::new(user_ok("Ann")),
            refresh_gate: Mutex::new(None),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            get_user_calls: AtomicUsize::new(0),
            last_login_password: Mutex::new(None),
            last_passwords: Mutex::new(None),
        }
    }

    pub fn set_login(&self, reply: Reply<LoginData>) {
        *self.login.lock().unwrap() = reply;
    }

    pub fn set_refresh(&self, reply: Reply<RefreshData>) {
        *self.refresh.lock().unwrap() = reply;
    }

    pub fn set_logout(&self, reply: Reply<Value>) {
        *self.logout.lock().unwrap() = reply;
    }

    pub fn set_edit(&self, reply: Reply<EditUserData>) {
        *self.edit.lock().unwrap() = reply;
    }

    pub fn set_change_password(&self, reply: Reply<EditUserData>) {
        *self.change_password.lock().unwrap() = reply;
    }

    pub fn set_get_user(&self, reply: Reply<UserInfo>) {
        *self.get_user.lock().unwrap() = reply;
    }

    /// Make every refresh call wait until the returned gate is opened.
    pub fn hold_refresh(&self) -> RefreshGate {
        let (tx, rx) = watch::channel(false);
        *self.refresh_gate.lock().unwrap() = Some(rx);
        RefreshGate { tx }
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn get_user_calls(&self) -> usize {
        self.get_user_calls.load(Ordering::SeqCst)
    }

    pub fn last_login_password(&self) -> Option<String> {
        self.last_login_password.lock().unwrap().clone()
    }

    pub fn last_passwords(&self) -> Option<(String, String)> {
        self.last_passwords.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthEndpoint for StubEndpoint {
    async fn login(&self, _mobile: &str, password: &str) -> Reply<LoginData> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_login_password.lock().unwrap() = Some(password.to_string());
        replay(&self.login.lock().unwrap())
    }

    async fn refresh(&self, _refresh_token: &str) -> Reply<RefreshData> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.refresh_gate.lock().unwrap().clone();
        if let Some(mut rx) = gate {
            loop {
                if *rx.borrow_and_update() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        replay(&self.refresh.lock().unwrap())
    }

    async fn logout(&self, _access_token: &str) -> Reply<Value> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        replay(&self.logout.lock().unwrap())
    }

    async fn edit_profile(&self, _username: &str, _access_token: &str) -> Reply<EditUserData> {
        replay(&self.edit.lock().unwrap())
    }

    async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        _access_token: &str,
    ) -> Reply<EditUserData> {
        *self.last_passwords.lock().unwrap() = Some((old_password.to_string(), new_password.to_string()));
        replay(&self.change_password.lock().unwrap())
    }

    async fn get_user(&self, _access_token: &str) -> Reply<UserInfo> {
        self.get_user_calls.fetch_add(1, Ordering::SeqCst);
        replay(&self.get_user.lock().unwrap())
    }
}

/// In-memory store that records the order of writes and can be told to fail
/// them.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryCredentialStore,
    ops: Mutex<Vec<&'static str>>,
    fail_writes: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            inner: MemoryCredentialStore::with_session(session),
            ..Self::default()
        }
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.ops.lock().unwrap().clone()
    }

    /// The stored session, bypassing the recorder.
    pub async fn stored(&self) -> Option<Session> {
        self.inner.load().await.unwrap().map(|s| s.session)
    }

    fn record(&self, op: &'static str) -> Result<(), StorageError> {
        self.ops.lock().unwrap().push(op);
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Io(std::io::Error::other("disk full")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CredentialStore for RecordingStore {
    async fn load(&self) -> Result<Option<StoredSession>, StorageError> {
        self.inner.load().await
    }

    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        self.record("save")?;
        self.inner.save(session).await
    }

    async fn update_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), StorageError> {
        self.record("update_tokens")?;
        self.inner.update_tokens(access_token, refresh_token).await
    }

    async fn update_profile_name(&self, name: &str) -> Result<(), StorageError> {
        self.record("update_profile_name")?;
        self.inner.update_profile_name(name).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.record("clear")?;
        self.inner.clear().await
    }
}
