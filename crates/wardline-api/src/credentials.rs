// Session credential storage
//
// Four independent keys (access token, refresh token, role, display name)
// behind an injectable trait. Every component reads through it; only the
// refresh coordinator and the login/logout flow write it.

use std::sync::RwLock;

/// A snapshot of the current session credentials.
///
/// Tokens are opaque strings -- no validation or decoding happens here.
/// Created on login, replaced wholesale on a successful refresh, cleared
/// entirely on refresh failure or explicit logout.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Short-lived bearer token attached to authorized requests.
    pub access_token: Option<String>,
    /// Longer-lived token exchanged for a new access token on expiry.
    pub refresh_token: Option<String>,
    /// Role of the signed-in user (e.g. "doctor", "nurse", "admin").
    pub role: Option<String>,
    /// Display name of the signed-in user.
    pub display_name: Option<String>,
}

impl Credentials {
    /// Returns `true` if no keys are set.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.role.is_none()
            && self.display_name.is_none()
    }
}

/// Injectable credential store.
///
/// All operations are synchronous and infallible from the caller's
/// perspective. Persistent implementations (see `wardline-config`) keep
/// an in-memory cache authoritative and log persistence failures rather
/// than surfacing them -- a request must never fail because the disk did.
pub trait CredentialStore: Send + Sync {
    /// Current credential snapshot.
    fn get(&self) -> Credentials;

    /// Store a new access token, and a new refresh token if one was
    /// issued. `refresh: None` keeps the existing refresh token --
    /// the refresh endpoint does not always rotate it.
    fn set_tokens(&self, access: &str, refresh: Option<&str>);

    /// Store session attributes from a login or refresh response.
    fn set_session(&self, role: &str, display_name: &str);

    /// Remove all four keys. Atomic from the caller's perspective:
    /// no partially-cleared state is ever observable.
    fn clear(&self);
}

/// In-memory credential store. Used by tests and short-lived sessions
/// that don't want tokens on disk.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing credentials (e.g. from a config
    /// profile or a previous session).
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            inner: RwLock::new(credentials),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Credentials {
        self.inner.read().expect("credential lock poisoned").clone()
    }

    fn set_tokens(&self, access: &str, refresh: Option<&str>) {
        let mut creds = self.inner.write().expect("credential lock poisoned");
        creds.access_token = Some(access.to_owned());
        if let Some(refresh) = refresh {
            creds.refresh_token = Some(refresh.to_owned());
        }
    }

    fn set_session(&self, role: &str, display_name: &str) {
        let mut creds = self.inner.write().expect("credential lock poisoned");
        creds.role = Some(role.to_owned());
        creds.display_name = Some(display_name.to_owned());
    }

    fn clear(&self) {
        *self.inner.write().expect("credential lock poisoned") = Credentials::default();
    }
}
