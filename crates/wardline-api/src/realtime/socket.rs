//! Realtime event socket with auto-reconnect.
//!
//! Connects to the backend's event stream and broadcasts parsed
//! invalidation events through a [`tokio::sync::broadcast`] channel.
//! Reconnects with exponential backoff + jitter; the bearer token is
//! re-read from the credential store on every attempt so a refreshed
//! session reconnects with the current token.
//!
//! # Example
//!
//! ```rust,ignore
//! use wardline_api::realtime::{InvalidationBridge, ReconnectConfig, SocketHandle};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let ws_url = Url::parse("wss://backend.hospital.example/ws/events")?;
//!
//! let socket = SocketHandle::connect(ws_url, ReconnectConfig::default(), cancel.clone(), store);
//! let bridge = InvalidationBridge::new();
//! bridge.attach(socket.subscribe(), cancel.clone());
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::credentials::CredentialStore;
use crate::error::Error;

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── RealtimeEvent ────────────────────────────────────────────────────

/// A named invalidation event pushed by the backend.
///
/// The payload is carried along for logging but never interpreted --
/// consumers treat the name alone as the invalidation signal.
#[derive(Debug, Clone)]
pub struct RealtimeEvent {
    /// Event name, e.g. `"appointment:new"`, `"alert:new"`.
    pub name: String,
    /// Whatever the backend attached. Often null.
    pub payload: serde_json::Value,
}

/// Wire shape of one event frame: `{ "event": "...", "data": ... }`.
#[derive(Debug, Deserialize)]
struct EventFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for socket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── SocketHandle ─────────────────────────────────────────────────────

/// Handle to a running realtime event stream.
pub struct SocketHandle {
    event_rx: broadcast::Receiver<RealtimeEvent>,
    cancel: CancellationToken,
}

impl SocketHandle {
    /// Spawn the reconnection loop against `ws_url`.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Subscribe to the receiver to start consuming events.
    pub fn connect(
        ws_url: Url,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(ws_url, event_tx, reconnect, task_cancel, store).await;
        });

        Self { event_rx, cancel }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// Multiple consumers can subscribe concurrently. A consumer that
    /// falls behind receives [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn ws_loop(
    ws_url: Url,
    event_tx: broadcast::Sender<RealtimeEvent>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    store: Arc<dyn CredentialStore>,
) {
    let mut attempt: u32 = 0;

    loop {
        let token = store.get().access_token;
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &event_tx, &cancel, token.as_deref()) => {
                match result {
                    // Clean disconnect. Reset the attempt counter and
                    // reconnect immediately.
                    Ok(()) => {
                        tracing::info!("realtime socket disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "realtime socket error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "realtime reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &reconnect);
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }

    tracing::debug!("realtime socket loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one socket connection and read frames until it drops.
///
/// The access token (when present) is sent as a bearer `Authorization`
/// header on the upgrade request.
async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<RealtimeEvent>,
    cancel: &CancellationToken,
    token: Option<&str>,
) -> Result<(), Error> {
    tracing::debug!(url = %url, "connecting realtime socket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::RealtimeConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = token {
        request = request.with_header("Authorization", format!("Bearer {token}"));
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::RealtimeConnect(e.to_string()))?;

    tracing::info!("realtime socket connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, event_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite replies with pong automatically
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        tracing::info!(?frame, "realtime socket close frame received");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::RealtimeConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("realtime socket stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Parse a text frame and broadcast the event it carries.
fn parse_and_broadcast(text: &str, event_tx: &broadcast::Sender<RealtimeEvent>) {
    let frame: EventFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable realtime frame, skipping");
            return;
        }
    };

    tracing::trace!(event = %frame.event, "realtime event received");

    // Send errors just mean no active subscribers right now.
    let _ = event_tx.send(RealtimeEvent {
        name: frame.event,
        payload: frame.data,
    });
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread reconnection storms from dashboards that
/// all lost the same backend at the same moment.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number; good enough
    // for backoff spread.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = calculate_backoff(10, &config);
        // With jitter factor up to 1.25, max effective is 12.5s
        assert!(
            d10 <= Duration::from_secs(13),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }

    #[test]
    fn parse_and_broadcast_named_event() {
        let (tx, mut rx) = broadcast::channel(16);

        let raw = serde_json::json!({
            "event": "appointment:new",
            "data": { "appointmentId": "apt-991" }
        });

        parse_and_broadcast(&raw.to_string(), &tx);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name, "appointment:new");
        assert_eq!(event.payload["appointmentId"], "apt-991");
    }

    #[test]
    fn parse_frame_without_payload() {
        let (tx, mut rx) = broadcast::channel(16);

        parse_and_broadcast(r#"{"event": "alert:new"}"#, &tx);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name, "alert:new");
        assert!(event.payload.is_null());
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let (tx, mut rx) = broadcast::channel::<RealtimeEvent>(16);

        parse_and_broadcast("not json at all", &tx);

        assert!(rx.try_recv().is_err());
    }
}
