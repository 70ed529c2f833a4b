//! External Store Bridge
//!
//! Adapts a third-party Flux-like container — anything exposing
//! `get_state()` and `subscribe(listener)` — into a read-only cell. The
//! bridge holds exactly one upstream subscription, reference-counted by its
//! own downstream subscribers: attached on the 0→1 edge, released on the
//! 1→0 edge, re-established if a new subscriber arrives later.
//!
//! While attached, each upstream notification recomputes the selector and
//! writes into the bridge cell under the equality policy, so store changes
//! outside the selected slice produce no downstream notification. While
//! detached, no selector runs at all; the cached value may go stale by
//! design and is refreshed on the next attach.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::error;

use crate::equality::Equality;
use crate::error::StateError;
use crate::signal::{CellId, Signal, SourceHandle, SourceHook, Subscription};

/// Change listener registered with an external store.
pub type StoreListener = Box<dyn Fn() + Send + Sync>;

/// Teardown handle returned by an external store's `subscribe`.
pub type StoreUnsubscribe = Box<dyn FnOnce() + Send + Sync>;

/// The minimal Flux-like contract.
pub trait StoreSource<S>: Send + Sync {
    fn get_state(&self) -> S;
    fn subscribe(&self, listener: StoreListener) -> StoreUnsubscribe;
}

struct UpstreamState {
    subscribers: usize,
    upstream: Option<StoreUnsubscribe>,
}

struct BridgeShared<T>
where
    T: Clone + Send + Sync + 'static,
{
    cell: Signal<T>,
    /// Recompute the selector against the store and write the result.
    refresh: Arc<dyn Fn() -> Result<bool, StateError> + Send + Sync>,
    attach: Box<dyn Fn(StoreListener) -> StoreUnsubscribe + Send + Sync>,
    state: Mutex<UpstreamState>,
    selector_runs: AtomicU64,
}

impl<T> BridgeShared<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn retain_upstream(&self) {
        let needs_attach = {
            let mut state = self.state.lock();
            state.subscribers += 1;
            state.subscribers == 1
        };
        if !needs_attach {
            return;
        }

        // Catch up on anything missed while detached, then re-establish
        // the upstream subscription. Done outside the state lock: the
        // refresh notifies subscribers, which may re-enter the bridge.
        if let Err(err) = (self.refresh)() {
            error!(%err, "store bridge refresh failed");
        }
        let refresh = Arc::clone(&self.refresh);
        let listener: StoreListener = Box::new(move || {
            if let Err(err) = refresh() {
                error!(%err, "store bridge update failed");
            }
        });
        let upstream = (self.attach)(listener);
        self.state.lock().upstream = Some(upstream);
    }

    fn release_upstream(&self) {
        let upstream = {
            let mut state = self.state.lock();
            state.subscribers -= 1;
            if state.subscribers == 0 {
                state.upstream.take()
            } else {
                None
            }
        };
        if let Some(unsubscribe) = upstream {
            unsubscribe();
        }
    }
}

/// A read-only cell selected out of an external store.
pub struct StoreBridge<T>
where
    T: Clone + Send + Sync + 'static,
{
    shared: Arc<BridgeShared<T>>,
}

/// Bridge `store` into a cell through `selector`, gated by structural
/// equality. The cell seeds from `selector(&store.get_state())`.
pub fn from_external_store<S, T, F>(
    store: Arc<dyn StoreSource<S>>,
    selector: F,
) -> StoreBridge<T>
where
    S: 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&S) -> T + Send + Sync + 'static,
{
    StoreBridge::with_equality(store, Equality::structural(), selector)
}

impl<T> StoreBridge<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fully general constructor with an explicit equality policy.
    pub fn with_equality<S, F>(
        store: Arc<dyn StoreSource<S>>,
        equality: Equality<T>,
        selector: F,
    ) -> Self
    where
        S: 'static,
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        let selector = Arc::new(selector);
        let seed = selector(&store.get_state());
        let cell = Signal::with_equality(seed, equality);

        let shared = Arc::new_cyclic(|weak: &Weak<BridgeShared<T>>| {
            let refresh = {
                let weak = weak.clone();
                let cell = cell.clone();
                let store = Arc::clone(&store);
                let selector = Arc::clone(&selector);
                Arc::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.selector_runs.fetch_add(1, Ordering::SeqCst);
                    }
                    let next = selector(&store.get_state());
                    cell.set(next)
                })
            };
            let attach = {
                let store = Arc::clone(&store);
                Box::new(move |listener: StoreListener| store.subscribe(listener))
            };
            BridgeShared {
                cell,
                refresh,
                attach,
                state: Mutex::new(UpstreamState {
                    subscribers: 0,
                    upstream: None,
                }),
                selector_runs: AtomicU64::new(1), // the seeding run
            }
        });

        Self { shared }
    }

    /// Get the bridge cell's unique ID.
    pub fn id(&self) -> CellId {
        self.shared.cell.id()
    }

    /// Get the last selected value. Always available; while detached it may
    /// lag the store until the next subscriber attaches.
    pub fn get(&self) -> T {
        self.shared.cell.get()
    }

    /// Bridge cells are read-only: this always fails.
    pub fn set(&self, _next: T) -> Result<(), StateError> {
        Err(StateError::MutateBridge)
    }

    /// Register a callback and retain the upstream subscription. The
    /// disposer releases one reference; the upstream subscription is torn
    /// down when the last one goes.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let cell_sub = self.shared.cell.subscribe(callback);
        self.shared.retain_upstream();

        let shared = Arc::clone(&self.shared);
        Subscription::new(move || {
            cell_sub.dispose();
            shared.release_upstream();
        })
    }

    /// A type-erased handle so derived values and reactions can depend on
    /// the bridge. Attaching through the handle counts as a downstream
    /// subscriber for the upstream refcount.
    pub fn handle(&self) -> SourceHandle {
        let transitive = [self.id()].into_iter().collect();
        let shared = Arc::clone(&self.shared);
        SourceHandle::new(
            self.id(),
            Arc::new(transitive),
            Arc::new(move |hook: SourceHook| {
                let cell_sub = shared.cell.subscribe_fallible(move |_| hook());
                shared.retain_upstream();
                let shared = Arc::clone(&shared);
                Subscription::new(move || {
                    cell_sub.dispose();
                    shared.release_upstream();
                })
            }),
        )
    }

    /// Number of downstream subscribers currently holding the upstream
    /// subscription open.
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers
    }

    /// Whether the upstream store subscription is currently active.
    pub fn upstream_attached(&self) -> bool {
        self.shared.state.lock().upstream.is_some()
    }

    /// Total number of selector evaluations, including the seeding run.
    pub fn selector_runs(&self) -> u64 {
        self.shared.selector_runs.load(Ordering::SeqCst)
    }
}

impl<T> Clone for StoreBridge<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Debug for StoreBridge<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBridge")
            .field("id", &self.id().raw())
            .field("value", &self.get())
            .field("subscriber_count", &self.subscriber_count())
            .field("upstream_attached", &self.upstream_attached())
            .finish()
    }
}

struct ValueStoreInner<S> {
    state: RwLock<S>,
    listeners: RwLock<Vec<(u64, Arc<dyn Fn() + Send + Sync>)>>,
    counter: AtomicU64,
}

/// A minimal in-process Flux-like container, usable as a `StoreSource`.
///
/// Exists mainly as the reference collaborator for the bridge; real
/// deployments adapt their own store type to `StoreSource` instead.
pub struct ValueStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    inner: Arc<ValueStoreInner<S>>,
}

impl<S> ValueStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(state: S) -> Self {
        Self {
            inner: Arc::new(ValueStoreInner {
                state: RwLock::new(state),
                listeners: RwLock::new(Vec::new()),
                counter: AtomicU64::new(0),
            }),
        }
    }

    /// Replace the state and notify every listener.
    pub fn set_state(&self, state: S) {
        *self.inner.state.write() = state;
        let listeners: Vec<_> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

impl<S> Clone for ValueStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> StoreSource<S> for ValueStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn get_state(&self) -> S {
        self.inner.state.read().clone()
    }

    fn subscribe(&self, listener: StoreListener) -> StoreUnsubscribe {
        let id = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .push((id, Arc::from(listener)));

        let weak = Arc::downgrade(&self.inner);
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.write().retain(|(lid, _)| *lid != id);
            }
        })
    }
}
