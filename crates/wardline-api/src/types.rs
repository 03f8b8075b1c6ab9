// Wire models for the auth endpoints.
//
// The backend speaks camelCase JSON; every response is deserialized into
// a typed struct at the transport boundary so nothing untyped leaks into
// dashboard logic.

use serde::{Deserialize, Serialize};

/// The signed-in user as reported by the auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    /// Role string, e.g. `"doctor"`, `"nurse"`, `"receptionist"`, `"admin"`.
    pub role: String,
    /// Display name shown in the dashboard header.
    pub name: String,
}

/// Response body of `POST /api/auth/login`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: SessionUser,
}

/// Response body of `POST /api/auth/refresh-token`.
///
/// The backend always returns a fresh access token; the refresh token is
/// only included when it was rotated, and the user block may be omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<SessionUser>,
}

/// Error body shape shared by all endpoints: `{"message": "..."}`.
///
/// Extra fields are ignored; an absent `message` falls back to the HTTP
/// status reason phrase during classification.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}
