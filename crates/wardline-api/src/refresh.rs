// Single-flight token refresh
//
// Many dashboard panels issue requests concurrently against the same
// session. When the access token expires they all see 401 at roughly the
// same moment; refreshing once per caller would hammer the backend and
// can invalidate tokens mid-flight. The coordinator memoizes the
// in-flight exchange as a shared future: the first caller installs it
// *synchronously* under the lock (before any await, so two callers can
// never both observe "no refresh running"), and every concurrent caller
// awaits the same future and receives the same outcome.

use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use url::Url;

use crate::credentials::CredentialStore;
use crate::error::Error;
use crate::types::RefreshResponse;

/// Path of the refresh-token exchange endpoint.
pub const REFRESH_PATH: &str = "/api/auth/refresh-token";

const SESSION_CHANNEL_CAPACITY: usize = 16;

/// All waiters of a single refresh cycle share this future.
type RefreshFuture = Shared<BoxFuture<'static, Option<String>>>;

/// Session lifecycle signals broadcast by the coordinator.
///
/// The coordinator never navigates anywhere itself -- the app shell
/// subscribes and redirects to the login view (skipping the redirect if
/// that view is already showing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The refresh exchange failed terminally; credentials were cleared
    /// and the user must log in again.
    Expired,
}

/// Coordinates refresh-token exchanges so that at most one is in flight
/// system-wide, fanning the outcome out to every concurrent caller.
pub struct RefreshCoordinator {
    http: reqwest::Client,
    refresh_url: Url,
    store: Arc<dyn CredentialStore>,
    /// `Some` exactly while an exchange is outstanding. Installed and
    /// cleared under the lock, never held across an await.
    in_flight: Mutex<Option<RefreshFuture>>,
    session_tx: broadcast::Sender<SessionEvent>,
}

impl RefreshCoordinator {
    /// Create a coordinator sharing the transport's HTTP client and
    /// credential store.
    pub fn new(
        http: reqwest::Client,
        base_url: &Url,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Arc<Self>, Error> {
        let refresh_url = base_url.join(REFRESH_PATH).map_err(Error::InvalidUrl)?;
        let (session_tx, _) = broadcast::channel(SESSION_CHANNEL_CAPACITY);
        Ok(Arc::new(Self {
            http,
            refresh_url,
            store,
            in_flight: Mutex::new(None),
            session_tx,
        }))
    }

    /// Subscribe to session lifecycle events.
    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_tx.subscribe()
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Returns `Some(access_token)` on success, `None` if the session is
    /// unrecoverable (in which case the credential store has been cleared
    /// and [`SessionEvent::Expired`] broadcast). If an exchange is
    /// already in flight, this call joins it instead of starting a
    /// second one -- every waiter gets the same outcome, in registration
    /// order.
    pub async fn refresh(self: &Arc<Self>) -> Option<String> {
        let fut = {
            let mut slot = self.in_flight.lock().expect("refresh lock poisoned");
            if let Some(fut) = slot.as_ref() {
                trace!("joining in-flight token refresh");
                fut.clone()
            } else {
                debug!("starting token refresh");
                let this = Arc::clone(self);
                let fut = async move { this.run_exchange().await }.boxed().shared();
                *slot = Some(fut.clone());
                fut
            }
        };

        fut.await
    }

    /// Drive one exchange to completion and settle the in-flight slot.
    async fn run_exchange(self: Arc<Self>) -> Option<String> {
        let outcome = self.exchange_refresh_token().await;

        // Clear the slot before fan-out: a request arriving after this
        // point starts a fresh cycle instead of receiving a stale result.
        {
            let mut slot = self.in_flight.lock().expect("refresh lock poisoned");
            *slot = None;
        }

        match outcome {
            Ok(token) => {
                debug!("token refresh succeeded");
                Some(token)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, clearing session");
                self.store.clear();
                // No receivers just means nobody is watching yet.
                let _ = self.session_tx.send(SessionEvent::Expired);
                None
            }
        }
    }

    /// The actual HTTP exchange. Fails without a network call when no
    /// refresh token is present.
    async fn exchange_refresh_token(&self) -> Result<String, Error> {
        let refresh_token = self.store.get().refresh_token.ok_or(Error::AuthExpired)?;

        let resp = self
            .http
            .post(self.refresh_url.clone())
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(Error::Network)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "refresh endpoint rejected token");
            return Err(Error::AuthExpired);
        }

        let body = resp.text().await.map_err(Error::Network)?;
        let parsed: RefreshResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })?;

        self.store
            .set_tokens(&parsed.access_token, parsed.refresh_token.as_deref());
        if let Some(user) = &parsed.user {
            self.store.set_session(&user.role, &user.name);
        }

        Ok(parsed.access_token)
    }
}
