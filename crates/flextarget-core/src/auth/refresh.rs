//! Single-flight token refresh.
//!
//! Many callers may decide at the same moment that the access token needs
//! renewing: the renewal timer, an explicit refresh, several requests that
//! hit a 401 together. The [`RefreshCoordinator`] collapses all requests for
//! the same refresh token into one network call and hands every caller the
//! same result.
//!
//! ```text
//! request_refresh("R1") ──┐
//! request_refresh("R1") ──┼──→ ticket{R1, gen 7} ──→ POST /user/token/refresh
//! request_refresh("R1") ──┘          │
//!                                    ▼
//!                    listener notified, then all waiters resolved,
//!                    then the ticket is removed
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::error::AuthError;
use super::session::TokenPair;
use crate::api::AuthEndpoint;

pub type RefreshResult = Result<TokenPair, AuthError>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// Receives the outcome of every refresh before any waiter sees it.
#[async_trait]
pub trait RefreshListener: Send + Sync {
    /// `used_refresh_token` is the token the call was made with; the
    /// listener must ignore results for a session that has since changed.
    async fn on_refreshed(&self, used_refresh_token: &str, tokens: &TokenPair);

    async fn on_refresh_failed(&self, used_refresh_token: &str, error: &AuthError);
}

/// One logical refresh attempt.
struct RefreshTicket {
    generation: u64,
    result: SharedRefresh,
}

pub struct RefreshCoordinator {
    endpoint: Arc<dyn AuthEndpoint>,
    listener: Weak<dyn RefreshListener>,
    tickets: Arc<Mutex<HashMap<String, RefreshTicket>>>,
    next_generation: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(endpoint: Arc<dyn AuthEndpoint>, listener: Weak<dyn RefreshListener>) -> Self {
        Self {
            endpoint,
            listener,
            tickets: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Refresh using `refresh_token`, joining an in-flight call for the same
    /// token if there is one.
    ///
    /// The network call runs in its own task: dropping this future stops
    /// waiting but never cancels the call.
    pub async fn request_refresh(&self, refresh_token: &str) -> RefreshResult {
        let shared = self.ticket_for(refresh_token)?;
        shared.await
    }

    /// Number of refresh calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.tickets.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn ticket_for(&self, refresh_token: &str) -> Result<SharedRefresh, AuthError> {
        let mut tickets = self
            .tickets
            .lock()
            .map_err(|_| AuthError::Network("refresh table poisoned".to_string()))?;

        if let Some(ticket) = tickets.get(refresh_token) {
            debug!(generation = ticket.generation, "Joining in-flight token refresh");
            return Ok(ticket.result.clone());
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(run_refresh(
            Arc::clone(&self.endpoint),
            self.listener.clone(),
            Arc::clone(&self.tickets),
            refresh_token.to_string(),
            generation,
        ));

        let result = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(AuthError::Network(format!("refresh task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        tickets.insert(
            refresh_token.to_string(),
            RefreshTicket {
                generation,
                result: result.clone(),
            },
        );
        debug!(generation, "Started token refresh");
        Ok(result)
    }
}

/// The body of one ticket: call the endpoint, tell the listener, retire the
/// ticket. Runs detached from any waiter.
async fn run_refresh(
    endpoint: Arc<dyn AuthEndpoint>,
    listener: Weak<dyn RefreshListener>,
    tickets: Arc<Mutex<HashMap<String, RefreshTicket>>>,
    refresh_token: String,
    generation: u64,
) -> RefreshResult {
    let result = call_endpoint(endpoint.as_ref(), &refresh_token).await;

    if let Some(listener) = listener.upgrade() {
        match &result {
            Ok(tokens) => listener.on_refreshed(&refresh_token, tokens).await,
            Err(e) => listener.on_refresh_failed(&refresh_token, e).await,
        }
    }

    match &result {
        Ok(_) => info!(generation, "Token refresh succeeded"),
        Err(e) => warn!(generation, error = %e, "Token refresh failed"),
    }

    // The insert happened under this lock before the task could get here, so
    // the entry is ours unless a newer generation replaced it.
    if let Ok(mut tickets) = tickets.lock() {
        if tickets.get(&refresh_token).map(|t| t.generation) == Some(generation) {
            tickets.remove(&refresh_token);
        }
    }

    result
}

async fn call_endpoint(endpoint: &dyn AuthEndpoint, refresh_token: &str) -> RefreshResult {
    let response = endpoint.refresh(refresh_token).await?;
    let data = AuthError::check(response, "refresh")?;
    Ok(TokenPair {
        access_token: data.access_token,
        refresh_token: data
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string()),
    })
}
