//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive: an observable mutable
//! cell. It holds a value and a registration-ordered list of subscribers.
//!
//! # How Signals Work
//!
//! 1. `get()` returns a clone of the current value with no side effects.
//!
//! 2. `set()` compares the candidate against the current value under the
//!    cell's equality policy. A value equal under the policy is a no-op and
//!    never reaches subscribers.
//!
//! 3. A changed value is stored first, then every subscriber is notified
//!    synchronously in registration order with the settled new value.
//!
//! Inside a batch, the store still happens immediately (visible to `get()`)
//! but the fan-out is deferred and deduplicated; see the `batch` module.
//!
//! # Reentrancy
//!
//! A subscriber may write back into a cell it observes. Such cascades are
//! bounded by `MAX_UPDATE_DEPTH`; exceeding it fails the triggering write
//! with `StateError::UpdateDepthExceeded` instead of recursing forever.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::batch;
use crate::equality::Equality;
use crate::error::StateError;

/// Maximum depth of synchronous notification cascades. Reentrant writes
/// beyond this fail the triggering write.
pub(crate) const MAX_UPDATE_DEPTH: usize = 64;

/// Counter for generating unique cell IDs. Derived values and reactions
/// draw from the same ID space, which keys the batch pending queue.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a cell (or any node in the update graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u64);

impl CellId {
    pub(crate) fn next() -> Self {
        Self(CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric ID.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Unique identifier for a subscriber registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Internal listener type. User callbacks are infallible and get wrapped;
/// derived values hook in fallibly so a derivation failure can propagate to
/// the triggering write.
pub(crate) type FallibleListener<T> =
    Arc<dyn Fn(&T) -> Result<(), StateError> + Send + Sync>;

/// A value-agnostic notification hook, used by type-erased source handles.
pub(crate) type SourceHook = Arc<dyn Fn() -> Result<(), StateError> + Send + Sync>;

thread_local! {
    static UPDATE_DEPTH: std::cell::Cell<usize> = std::cell::Cell::new(0);
}

struct SignalInner<T> {
    id: CellId,
    value: RwLock<T>,
    equality: Equality<T>,
    listeners: RwLock<Vec<(SubscriberId, FallibleListener<T>)>>,
}

/// An observable mutable cell.
///
/// Cloning a `Signal` shares state: all clones read and write the same
/// underlying value and subscriber list.
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new signal gated by the structural equality policy.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, Equality::structural())
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal gated by the given equality policy.
    pub fn with_equality(value: T, equality: Equality<T>) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: CellId::next(),
                value: RwLock::new(value),
                equality,
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value.
    ///
    /// The value is compared against the current one under the cell's
    /// equality policy; an equal value is a no-op and subscribers are never
    /// invoked. Returns `Ok(true)` iff the value changed. An error means a
    /// downstream derivation failed or the reentrancy guard tripped.
    pub fn set(&self, next: T) -> Result<bool, StateError> {
        let previous = {
            let mut guard = self.inner.value.write();
            if self.inner.equality.are_equal(&guard, &next) {
                return Ok(false);
            }
            std::mem::replace(&mut *guard, next)
        };

        if batch::deferring() {
            // Store is already visible to get(); fan-out waits for the
            // flush. The first deferred write captures the pre-batch value
            // so a batch whose net change is zero notifies nobody.
            let cell = self.clone();
            batch::enqueue(
                self.id(),
                Arc::new(move || cell.notify_if_changed_from(&previous)),
            );
            return Ok(true);
        }

        self.notify()?;
        Ok(true)
    }

    /// Set a new value computed from the previous one.
    pub fn update<F>(&self, f: F) -> Result<bool, StateError>
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.inner.value.read();
            f(&guard)
        };
        self.set(next)
    }

    /// Register a callback invoked with each new value.
    ///
    /// Returns a disposer handle. Disposal is idempotent; the subscription
    /// stays attached until `dispose()` is called (dropping the handle does
    /// not detach it).
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_fallible(move |value| {
            callback(value);
            Ok(())
        })
    }

    pub(crate) fn subscribe_fallible<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) -> Result<(), StateError> + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        let listener: FallibleListener<T> = Arc::new(listener);
        self.inner.listeners.write().push((id, listener));

        let weak: Weak<SignalInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.write().retain(|(sid, _)| *sid != id);
            }
        })
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// A type-erased handle for use as an explicit dependency of a derived
    /// value or reaction. The handle keeps the cell alive.
    pub fn handle(&self) -> SourceHandle {
        let cell = self.clone();
        let transitive: HashSet<CellId> = [self.id()].into_iter().collect();
        SourceHandle::new(
            self.id(),
            Arc::new(transitive),
            Arc::new(move |hook: SourceHook| {
                cell.subscribe_fallible(move |_| hook())
            }),
        )
    }

    /// Notify all subscribers with the current value, in registration order.
    pub(crate) fn notify(&self) -> Result<(), StateError> {
        struct DepthGuard;
        impl Drop for DepthGuard {
            fn drop(&mut self) {
                UPDATE_DEPTH.with(|d| d.set(d.get() - 1));
            }
        }

        let depth = UPDATE_DEPTH.with(|d| {
            let n = d.get() + 1;
            d.set(n);
            n
        });
        let _guard = DepthGuard;

        if depth > MAX_UPDATE_DEPTH {
            return Err(StateError::UpdateDepthExceeded { depth });
        }

        // Snapshot value and listeners so subscribers may freely read,
        // write, subscribe, or dispose during the fan-out.
        let value = self.inner.value.read().clone();
        let listeners: Vec<FallibleListener<T>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(&value)?;
        }
        Ok(())
    }

    /// Deferred-notification path: skip the fan-out entirely when the value
    /// ended up equal (under the policy) to the one observers last saw.
    fn notify_if_changed_from(&self, earlier: &T) -> Result<(), StateError> {
        let unchanged = {
            let guard = self.inner.value.read();
            self.inner.equality.are_equal(&guard, earlier)
        };
        if unchanged {
            return Ok(());
        }
        self.notify()
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id().raw())
            .field("value", &self.get())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// An idempotent disposer for a subscription.
///
/// Dropping the handle does NOT detach the subscription; only `dispose()`
/// does. Clones share the disposed flag, so disposal happens at most once
/// across all clones.
pub struct Subscription {
    disposed: Arc<AtomicBool>,
    dispose: Arc<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new<F>(dispose: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            disposed: Arc::new(AtomicBool::new(false)),
            dispose: Arc::new(dispose),
        }
    }

    /// Detach the subscription. Safe to call more than once.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            (self.dispose)();
        }
    }

    /// Whether the subscription has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Clone for Subscription {
    fn clone(&self) -> Self {
        Self {
            disposed: Arc::clone(&self.disposed),
            dispose: Arc::clone(&self.dispose),
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A type-erased dependency handle.
///
/// Obtained from `Signal::handle()`, `Derived::handle()`, or
/// `StoreBridge::handle()`, and passed to derived values and reactions as an
/// explicit source. Carries the transitive ID set of everything the source
/// derives from, used for construction-time cycle detection.
pub struct SourceHandle {
    id: CellId,
    transitive: Arc<HashSet<CellId>>,
    attach: Arc<dyn Fn(SourceHook) -> Subscription + Send + Sync>,
}

impl SourceHandle {
    pub(crate) fn new(
        id: CellId,
        transitive: Arc<HashSet<CellId>>,
        attach: Arc<dyn Fn(SourceHook) -> Subscription + Send + Sync>,
    ) -> Self {
        Self {
            id,
            transitive,
            attach,
        }
    }

    /// ID of the underlying cell.
    pub fn id(&self) -> CellId {
        self.id
    }

    pub(crate) fn depends_on(&self, id: CellId) -> bool {
        self.transitive.contains(&id)
    }

    pub(crate) fn transitive_ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.transitive.iter().copied()
    }

    pub(crate) fn attach(&self, hook: SourceHook) -> Subscription {
        (self.attach)(hook)
    }
}

impl Clone for SourceHandle {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            transitive: Arc::clone(&self.transitive),
            attach: Arc::clone(&self.attach),
        }
    }
}

impl Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("id", &self.id.raw())
            .finish()
    }
}
