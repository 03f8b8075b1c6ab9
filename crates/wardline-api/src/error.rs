use thiserror::Error;

/// Top-level error type for the `wardline-api` crate.
///
/// Covers every failure mode in the data-access layer: transport,
/// HTTP status classification, session expiry, and the realtime socket.
/// Dashboards map these into user-facing notifications.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// The underlying HTTP call itself failed (connection refused,
    /// DNS failure, TLS handshake, etc.). Never retried.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── HTTP status classification ──────────────────────────────────
    /// A response was received but carried a non-2xx status.
    /// `message` comes from the JSON body's `message` field when
    /// present, else the status reason phrase.
    #[error("request failed (HTTP {status}): {message}")]
    Http { status: u16, message: String },

    /// A 4xx response carrying a user-facing message, suitable for
    /// direct display (form validation, conflicts, etc.).
    #[error("{message}")]
    Validation { status: u16, message: String },

    // ── Session ─────────────────────────────────────────────────────
    /// The refresh-token exchange failed or no refresh token was
    /// available. Terminal for every request queued behind the refresh.
    #[error("session expired -- please log in again")]
    AuthExpired,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Realtime ────────────────────────────────────────────────────
    /// Realtime socket connection failed.
    #[error("realtime connection failed: {0}")]
    RealtimeConnect(String),
}

impl Error {
    /// Returns `true` if this error means the session is unrecoverable
    /// and the user must log in again.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    /// Returns `true` if this is a transient error that a later manual
    /// refetch might resolve.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            Self::Http { status, .. } => *status >= 500,
            Self::RealtimeConnect(_) => true,
            _ => false,
        }
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::Validation { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
