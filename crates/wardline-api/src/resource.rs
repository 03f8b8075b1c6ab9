// Async resource state machine
//
// Turns an arbitrary async producer into a pollable `{data, loading,
// error}` object -- the read-side cache every dashboard panel sits on.
// State is published through a `tokio::sync::watch` channel so any
// number of observers can poll or await transitions.
//
// There is no cancellation: a fetch whose owner went away still settles
// and writes its outcome, which is a benign overwrite of a state object
// nobody reads anymore. Overlapping fetches race; the last one to settle
// wins the visible `{data, error}`, and `loading` stays `true` until no
// call remains outstanding.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::error::Error;

/// Dependency key: a tuple of primitive values (ids, filters, page
/// numbers) that identifies *which* data the producer fetches. When the
/// key changes, the resource refetches automatically.
pub type DepKey = Vec<serde_json::Value>;

type Producer<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, Error>> + Send + Sync>;

/// Snapshot of a resource's fetch state.
#[derive(Debug, Clone)]
pub struct ResourceState<T> {
    /// Last successfully fetched value. A stale value from a previous
    /// fetch stays visible while a newer call is pending.
    pub data: Option<T>,
    /// `true` from the moment a fetch is issued until no call is
    /// outstanding.
    pub loading: bool,
    /// Message of the most recent failure, cleared when a new fetch
    /// starts. Never set alongside `data` by the same settlement.
    pub error: Option<String>,
}

impl<T> Default for ResourceState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

/// Options controlling fetch behavior and error presentation.
#[derive(Clone, Default)]
pub struct ResourceOptions {
    /// Skip the automatic fetch on construction and on dependency
    /// change. The resource then only fetches via [`AsyncResource::refetch`].
    pub manual: bool,
    /// Invoked with the error message on each failed fetch. When absent,
    /// failures are logged -- the default user-notification hook.
    pub on_error: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

struct Inner<T> {
    producer: Producer<T>,
    state: watch::Sender<ResourceState<T>>,
    deps: Mutex<DepKey>,
    /// Number of producer calls currently outstanding. `loading` drops
    /// to `false` only when this reaches zero.
    pending: AtomicUsize,
    options: ResourceOptions,
}

/// A reusable request/state abstraction over an async producer.
///
/// Cheap to clone; clones share the same state channel.
pub struct AsyncResource<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AsyncResource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncResource<T> {
    /// Create a resource over `producer`, keyed by `deps`.
    ///
    /// Unless [`ResourceOptions::manual`] is set, the first fetch is
    /// spawned immediately. Must be called within a tokio runtime.
    pub fn new<F, Fut>(producer: F, deps: DepKey, options: ResourceOptions) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (state, _) = watch::channel(ResourceState::default());
        let inner = Arc::new(Inner {
            producer: Box::new(move || producer().boxed()),
            state,
            deps: Mutex::new(deps),
            pending: AtomicUsize::new(0),
            options,
        });

        let resource = Self { inner };
        if !resource.inner.options.manual {
            resource.spawn_fetch();
        }
        resource
    }

    /// Current state snapshot.
    pub fn state(&self) -> ResourceState<T> {
        self.inner.state.borrow().clone()
    }

    /// A receiver that observes every state transition. Use
    /// `wait_for(|s| !s.loading)` to await settlement.
    pub fn watch(&self) -> watch::Receiver<ResourceState<T>> {
        self.inner.state.subscribe()
    }

    /// Replace the dependency key. If it differs from the current key
    /// (element-wise) and the resource is not manual, a refetch is
    /// spawned.
    pub fn update_deps(&self, deps: DepKey) {
        let changed = {
            let mut current = self.inner.deps.lock().expect("deps lock poisoned");
            if *current == deps {
                false
            } else {
                *current = deps;
                true
            }
        };

        if changed && !self.inner.options.manual {
            trace!("dependency key changed, refetching");
            self.spawn_fetch();
        }
    }

    /// Run one fetch to completion. Callable at any time, including
    /// while a previous fetch is still pending.
    pub async fn fetch(&self) {
        Inner::run_fetch(Arc::clone(&self.inner)).await;
    }

    /// Manual alias for [`fetch`](Self::fetch).
    pub async fn refetch(&self) {
        self.fetch().await;
    }

    /// Spawn a fetch in the background (construction, dep changes,
    /// realtime invalidation).
    pub fn spawn_fetch(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(Inner::run_fetch(inner));
    }

    /// A handler that spawns a refetch when invoked -- the glue handed
    /// to [`InvalidationBridge::subscribe`](crate::realtime::InvalidationBridge::subscribe).
    pub fn invalidator(&self) -> Box<dyn Fn() + Send + Sync> {
        let resource = self.clone();
        Box::new(move || resource.spawn_fetch())
    }
}

impl<T: Clone + Send + Sync + 'static> Inner<T> {
    async fn run_fetch(self: Arc<Self>) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let result = (self.producer)().await;

        // Last settle wins: whoever writes here latest is the visible
        // outcome. `loading` only clears once every call has settled.
        let still_pending = self.pending.fetch_sub(1, Ordering::SeqCst) > 1;

        match result {
            Ok(data) => {
                self.state.send_modify(|s| {
                    s.data = Some(data);
                    s.error = None;
                    s.loading = still_pending;
                });
            }
            Err(e) => {
                let message = e.to_string();
                self.state.send_modify(|s| {
                    s.data = None;
                    s.error = Some(message.clone());
                    s.loading = still_pending;
                });
                match &self.options.on_error {
                    Some(notify) => notify(&message),
                    None => warn!(error = %message, "resource fetch failed"),
                }
            }
        }
    }
}
