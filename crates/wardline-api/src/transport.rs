// Authenticated HTTP transport
//
// Wraps `reqwest::Client` with bearer-token attachment, 401-triggered
// token refresh with a single replay, and status classification. Every
// dashboard request funnels through here; the retry contract is strict:
// exactly one replay, only for a 401 on a request not yet replayed.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use url::Url;

use crate::credentials::CredentialStore;
use crate::error::Error;
use crate::refresh::{RefreshCoordinator, SessionEvent};
use crate::types::ErrorBody;

// ── Client configuration ─────────────────────────────────────────────

/// Transport configuration for building the underlying `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    /// Accept self-signed certificates (staging hospital servers).
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
            user_agent: format!("wardline/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// The cookie store is always enabled -- the backend tracks session
    /// state in cookies alongside the bearer token.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .cookie_store(true);

        if self.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder.build().map_err(Error::Network)
    }
}

// ── Request descriptor ───────────────────────────────────────────────

/// One logical request: method, path, extra headers, optional JSON body,
/// and whether it has already been replayed after a token refresh.
///
/// `retried` flips to `true` exactly once. A descriptor that 401s again
/// after its replay is terminal -- it is never retried a second time.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<serde_json::Value>,
    retried: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    /// Attach a JSON body.
    pub fn json(mut self, body: &impl Serialize) -> Result<Self, Error> {
        let value = serde_json::to_value(body).map_err(|e| Error::Deserialization {
            message: format!("failed to serialize request body: {e}"),
            body: String::new(),
        })?;
        self.body = Some(value);
        Ok(self)
    }

    /// Attach an extra header (on top of auth and content headers).
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn retried(&self) -> bool {
        self.retried
    }
}

// ── Response payload ─────────────────────────────────────────────────

/// Classified successful response body.
#[derive(Debug, Clone)]
pub enum Payload {
    /// `204 No Content` or an empty body.
    Empty,
    /// JSON content type, parsed.
    Json(serde_json::Value),
    /// Anything else, returned verbatim.
    Text(String),
}

// ── ApiClient ────────────────────────────────────────────────────────

/// Auth-aware HTTP client for the dashboard backend.
///
/// Cheap to clone; all clones share the connection pool, the credential
/// store, and the refresh coordinator.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Create a client for the given backend root URL.
    pub fn new(
        base_url: Url,
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, Error> {
        let http = config.build_client()?;
        let refresher = RefreshCoordinator::new(http.clone(), &base_url, Arc::clone(&store))?;
        Ok(Self {
            http,
            base_url,
            store,
            refresher,
        })
    }

    /// The backend root URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The shared credential store.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// The underlying HTTP client (for flows that bypass auth handling).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Subscribe to session lifecycle events (terminal refresh failure).
    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.refresher.session_events()
    }

    // ── Typed request helpers ────────────────────────────────────────

    /// Execute a descriptor and deserialize the JSON response.
    ///
    /// `Ok(None)` means the backend answered `204 No Content` (or an
    /// empty body). A non-JSON body for a typed request is a
    /// deserialization error, not silently-returned text.
    pub async fn request<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<Option<T>, Error> {
        match self.execute(descriptor).await? {
            Payload::Empty => Ok(None),
            Payload::Json(value) => {
                let body = value.to_string();
                serde_json::from_value(value)
                    .map(Some)
                    .map_err(|e| Error::Deserialization {
                        message: e.to_string(),
                        body,
                    })
            }
            Payload::Text(body) => Err(Error::Deserialization {
                message: "expected a JSON response".into(),
                body,
            }),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, Error> {
        self.request(RequestDescriptor::new(Method::GET, path)).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<Option<T>, Error> {
        self.request(RequestDescriptor::new(Method::POST, path).json(body)?)
            .await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<Option<T>, Error> {
        self.request(RequestDescriptor::new(Method::PUT, path).json(body)?)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, Error> {
        self.request(RequestDescriptor::new(Method::DELETE, path))
            .await
    }

    // ── Core request algorithm ───────────────────────────────────────

    /// Perform one logical request with auth awareness.
    ///
    /// 1. Attach `Authorization: Bearer <token>` if a token exists, send.
    /// 2. Anything but a 401 (or a 401 on an already-replayed request)
    ///    is classified as-is -- the coordinator is not involved.
    /// 3. On a first 401, refresh. Success: replay once with the new
    ///    token and classify that response, even if it is another 401.
    ///    Failure: fail with [`Error::AuthExpired`] without resending.
    pub async fn execute(&self, mut descriptor: RequestDescriptor) -> Result<Payload, Error> {
        let token = self.store.get().access_token;
        debug!(method = %descriptor.method, path = %descriptor.path, "dispatching request");

        let resp = self.dispatch(&descriptor, token.as_deref()).await?;

        let resp = if resp.status() == StatusCode::UNAUTHORIZED && !descriptor.retried {
            match self.refresher.refresh().await {
                Some(new_token) => {
                    descriptor.retried = true;
                    debug!(path = %descriptor.path, "replaying request with refreshed token");
                    self.dispatch(&descriptor, Some(&new_token)).await?
                }
                None => return Err(Error::AuthExpired),
            }
        } else {
            resp
        };

        Self::read_payload(resp).await
    }

    /// Build and send one HTTP request from a descriptor.
    async fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&str>,
    ) -> Result<reqwest::Response, Error> {
        let url = self
            .base_url
            .join(&descriptor.path)
            .map_err(Error::InvalidUrl)?;

        let mut builder = self
            .http
            .request(descriptor.method.clone(), url)
            .headers(descriptor.headers.clone());

        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &descriptor.body {
            builder = builder.json(body);
        }

        builder.send().await.map_err(Error::Network)
    }

    /// Read a response into a [`Payload`], or classify its failure.
    async fn read_payload(resp: reqwest::Response) -> Result<Payload, Error> {
        let status = resp.status();

        if status == StatusCode::NO_CONTENT {
            trace!("204 response, empty payload");
            return Ok(Payload::Empty);
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_failure(status, &body));
        }

        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));

        let body = resp.text().await.map_err(Error::Network)?;
        if body.is_empty() {
            return Ok(Payload::Empty);
        }

        if is_json {
            let value = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.clone(),
            })?;
            Ok(Payload::Json(value))
        } else {
            Ok(Payload::Text(body))
        }
    }

    /// Turn a non-2xx response into a typed error.
    ///
    /// The message comes from the JSON body's `message` field when
    /// present, else the status reason phrase. 4xx responses carrying a
    /// user-facing message become [`Error::Validation`] -- except 401
    /// and 403, which are auth concerns, not form feedback.
    fn classify_failure(status: StatusCode, body: &str) -> Error {
        let json_message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message);

        let message = json_message.clone().unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_owned()
        });

        let user_facing = status.is_client_error()
            && status != StatusCode::UNAUTHORIZED
            && status != StatusCode::FORBIDDEN
            && json_message.is_some();

        if user_facing {
            Error::Validation {
                status: status.as_u16(),
                message,
            }
        } else {
            Error::Http {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_extracts_json_message() {
        let err = ApiClient::classify_failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"message": "database unavailable"}"#,
        );
        match err {
            Error::Http { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "database unavailable");
            }
            other => panic!("expected Http error, got: {other:?}"),
        }
    }

    #[test]
    fn classify_falls_back_to_status_reason() {
        let err = ApiClient::classify_failure(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        match err {
            Error::Http { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("expected Http error, got: {other:?}"),
        }
    }

    #[test]
    fn classify_user_facing_4xx_as_validation() {
        let err = ApiClient::classify_failure(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message": "patient ID is required"}"#,
        );
        assert!(
            matches!(err, Error::Validation { status: 422, ref message } if message == "patient ID is required"),
            "expected Validation error, got: {err:?}"
        );
    }

    #[test]
    fn classify_401_is_never_validation() {
        let err = ApiClient::classify_failure(
            StatusCode::UNAUTHORIZED,
            r#"{"message": "token expired"}"#,
        );
        assert!(
            matches!(err, Error::Http { status: 401, .. }),
            "expected Http error, got: {err:?}"
        );
    }

    #[test]
    fn descriptor_starts_unretried() {
        let desc = RequestDescriptor::new(Method::GET, "/api/appointments");
        assert!(!desc.retried());
        assert_eq!(desc.path(), "/api/appointments");
    }
}
