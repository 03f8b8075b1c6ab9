//! Realtime cache invalidation.
//!
//! Server-pushed named events are pure invalidation signals: "something
//! relevant to this name changed, refetch". The bridge maps event names
//! to registered handlers (typically [`AsyncResource::invalidator`]
//! closures); the socket module feeds it from the backend's event
//! stream.
//!
//! [`AsyncResource::invalidator`]: crate::resource::AsyncResource::invalidator

pub mod socket;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

pub use socket::{ReconnectConfig, RealtimeEvent, SocketHandle};

/// Well-known invalidation event names pushed by the backend.
pub mod events {
    pub const APPOINTMENT_NEW: &str = "appointment:new";
    pub const APPOINTMENT_UPDATED: &str = "appointment:updated";
    pub const ALERT_NEW: &str = "alert:new";
    pub const MEDICAL_RECORD_UPDATED: &str = "medicalRecord:updated";
    pub const PRESCRIPTION_NEW: &str = "prescription:new";
}

type Handler = Arc<dyn Fn() + Send + Sync>;

struct HandlerEntry {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    handlers: Mutex<HashMap<String, Vec<HandlerEntry>>>,
    next_id: AtomicU64,
}

/// Maps server-pushed event names to invalidation handlers.
///
/// Cheap to clone; all clones share one registry. Multiple independent
/// resources may subscribe to the same event and each handler is invoked
/// independently. Redundant events for the same resource trigger
/// redundant refetches -- no de-duplication happens here.
#[derive(Clone, Default)]
pub struct InvalidationBridge {
    registry: Arc<Registry>,
}

/// Proof of registration. Calling [`dispose`](Subscription::dispose) is
/// the only way to deregister -- there is no lookup by handler identity,
/// so a subscription can never accidentally remove someone else's
/// handler. Scope teardown must pair every subscribe with a dispose, or
/// the handler keeps firing against discarded state.
#[must_use = "keep the subscription and dispose() it on teardown"]
pub struct Subscription {
    registry: Weak<Registry>,
    event: String,
    id: u64,
}

impl InvalidationBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`.
    pub fn subscribe(&self, event: &str, handler: Box<dyn Fn() + Send + Sync>) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self
            .registry
            .handlers
            .lock()
            .expect("bridge lock poisoned");
        handlers.entry(event.to_owned()).or_default().push(HandlerEntry {
            id,
            handler: Arc::from(handler),
        });
        trace!(event, id, "handler subscribed");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            event: event.to_owned(),
            id,
        }
    }

    /// Invoke every handler registered for `event`, returning how many
    /// ran. Handlers run outside the registry lock, so a handler may
    /// itself subscribe or dispose.
    pub fn dispatch(&self, event: &str) -> usize {
        let to_run: Vec<Handler> = {
            let handlers = self
                .registry
                .handlers
                .lock()
                .expect("bridge lock poisoned");
            handlers
                .get(event)
                .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)).collect())
                .unwrap_or_default()
        };

        trace!(event, count = to_run.len(), "dispatching invalidation");
        for handler in &to_run {
            handler();
        }
        to_run.len()
    }

    /// Spawn a task draining a socket's event stream into
    /// [`dispatch`](Self::dispatch) until cancelled.
    pub fn attach(
        &self,
        mut rx: broadcast::Receiver<RealtimeEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => {
                            bridge.dispatch(&event.name);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Missed invalidations are only missed hints;
                            // the next event re-syncs the cache.
                            warn!(skipped, "invalidation receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }
}

impl Subscription {
    /// The event name this subscription is registered for.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Deregister the handler. After this returns, dispatching the event
    /// no longer invokes it. A no-op if the bridge is already gone.
    pub fn dispose(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut handlers = registry.handlers.lock().expect("bridge lock poisoned");
        if let Some(entries) = handlers.get_mut(&self.event) {
            entries.retain(|e| e.id != self.id);
            if entries.is_empty() {
                handlers.remove(&self.event);
            }
        }
        trace!(event = %self.event, id = self.id, "handler disposed");
    }
}
