// Login / logout flow
//
// Issues the credential-establishing calls directly on the underlying
// HTTP client, bypassing the 401-refresh machinery: a rejected login is
// a rejected login, not an expired session to recover.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use crate::error::Error;
use crate::transport::ApiClient;
use crate::types::{LoginResponse, SessionUser};

const LOGIN_PATH: &str = "/api/auth/login";
const LOGOUT_PATH: &str = "/api/auth/logout";

impl ApiClient {
    /// Authenticate with the backend and populate the credential store.
    ///
    /// On success both tokens and the session attributes (role, display
    /// name) are written to the store; every subsequent request picks up
    /// the access token automatically.
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<SessionUser, Error> {
        let url = self.base_url().join(LOGIN_PATH).map_err(Error::InvalidUrl)?;

        debug!(%url, "logging in");

        let resp = self
            .http()
            .post(url)
            .json(&json!({
                "email": email,
                "password": password.expose_secret(),
            }))
            .send()
            .await
            .map_err(Error::Network)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<crate::types::ErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("login failed (HTTP {status})"));
            return Err(Error::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await.map_err(Error::Network)?;
        let parsed: LoginResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })?;

        let store = self.store();
        store.set_tokens(&parsed.access_token, Some(&parsed.refresh_token));
        store.set_session(&parsed.user.role, &parsed.user.name);

        debug!(role = %parsed.user.role, "login successful");
        Ok(parsed.user)
    }

    /// End the current session.
    ///
    /// The backend call is best-effort -- local credentials are cleared
    /// even if the server is unreachable, so the UI always ends up
    /// signed out.
    pub async fn logout(&self) -> Result<(), Error> {
        let url = self
            .base_url()
            .join(LOGOUT_PATH)
            .map_err(Error::InvalidUrl)?;

        debug!(%url, "logging out");

        let result = self.http().post(url).send().await;
        self.store().clear();

        if let Err(e) = result {
            debug!(error = %e, "logout request failed, local session cleared anyway");
        }
        Ok(())
    }
}
