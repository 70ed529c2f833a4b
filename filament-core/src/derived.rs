//! Derived Value Implementation
//!
//! A Derived value is a read-only cell computed by a pure function over an
//! explicit list of source cells. It is computed once at construction and
//! recomputed eagerly on each source notification; downstream subscribers
//! are notified only when the recomputed value differs under the equality
//! policy.
//!
//! # Explicit dependencies
//!
//! Sources are declared up front as `SourceHandle`s rather than tracked
//! implicitly through reads. The compute closure simply captures clones of
//! the cells it reads (clones share state, so this is cheap).
//!
//! # Failure
//!
//! `set()` always fails: derived values are read-only by contract. A
//! fallible compute function that returns `Err` propagates the error to the
//! triggering write and the cached value is retained unchanged.
//!
//! # Cycles
//!
//! A derived value's sources must not transitively include itself. Each
//! `SourceHandle` carries the transitive ID set of what it derives from;
//! construction fails fast with `CycleDetected` instead of recursing.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use crate::batch;
use crate::equality::Equality;
use crate::error::StateError;
use crate::signal::{CellId, Signal, SourceHandle, SourceHook, Subscription};

struct DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    cell: Signal<T>,
    transitive: Arc<HashSet<CellId>>,
    sources: Vec<Subscription>,
}

impl<T> Drop for DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Detach from every source so dropped derivations stop recomputing.
        for source in &self.sources {
            source.dispose();
        }
    }
}

/// A read-only cell whose value is a pure function of other cells.
///
/// Cloning shares state. Recomputation stops once every clone (and every
/// handle taken from this derived) has been dropped.
pub struct Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a derived value over the given sources, gated by structural
    /// equality. The compute function runs once immediately.
    pub fn new<F>(sources: &[SourceHandle], compute: F) -> Result<Self, StateError>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_equality(sources, Equality::structural(), move || Ok(compute()))
    }

    /// Like `new`, but the compute function may fail. A failed recomputation
    /// propagates to the triggering write; the cached value is retained.
    pub fn fallible<F>(sources: &[SourceHandle], compute: F) -> Result<Self, StateError>
    where
        F: Fn() -> Result<T, StateError> + Send + Sync + 'static,
    {
        Self::with_equality(sources, Equality::structural(), compute)
    }
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fully general constructor: explicit equality policy and a fallible
    /// compute function.
    ///
    /// Returns `StateError::CycleDetected` if any source transitively
    /// depends on this derived's own cell. Source lists fixed at
    /// construction cannot form such a cycle today; the check guards any
    /// future API that wires sources after construction.
    pub fn with_equality<F>(
        sources: &[SourceHandle],
        equality: Equality<T>,
        compute: F,
    ) -> Result<Self, StateError>
    where
        F: Fn() -> Result<T, StateError> + Send + Sync + 'static,
    {
        let compute: Arc<dyn Fn() -> Result<T, StateError> + Send + Sync> =
            Arc::new(compute);

        let initial = compute()?;
        let cell = Signal::with_equality(initial, equality);
        let id = cell.id();

        let mut transitive: HashSet<CellId> = HashSet::new();
        transitive.insert(id);
        for source in sources {
            if source.depends_on(id) {
                return Err(StateError::CycleDetected { id: id.raw() });
            }
            transitive.extend(source.transitive_ids());
        }

        // One shared refresh; inside a batch (or drain) it is enqueued
        // under this derived's ID so several dirty sources cost a single
        // recomputation per logical update.
        let refresh: SourceHook = {
            let cell = cell.clone();
            let compute = Arc::clone(&compute);
            Arc::new(move || {
                let next = compute()?;
                cell.set(next).map(|_| ())
            })
        };
        let hook: SourceHook = {
            let refresh = Arc::clone(&refresh);
            Arc::new(move || {
                if batch::deferring() {
                    batch::enqueue(id, Arc::clone(&refresh));
                    Ok(())
                } else {
                    refresh()
                }
            })
        };

        let mut seen = HashSet::new();
        let mut subscriptions = Vec::new();
        for source in sources {
            // A source listed twice still recomputes once per change.
            if seen.insert(source.id()) {
                subscriptions.push(source.attach(Arc::clone(&hook)));
            }
        }

        Ok(Self {
            inner: Arc::new(DerivedInner {
                cell,
                transitive: Arc::new(transitive),
                sources: subscriptions,
            }),
        })
    }

    /// Get this derived value's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.cell.id()
    }

    /// Get the cached value. Always present after construction.
    pub fn get(&self) -> T {
        self.inner.cell.get()
    }

    /// Derived values are read-only: this always fails.
    pub fn set(&self, _next: T) -> Result<(), StateError> {
        Err(StateError::MutateDerived)
    }

    /// Register a callback invoked with each recomputed value that differs
    /// under the equality policy.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.cell.subscribe(callback)
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.cell.subscriber_count()
    }

    /// A type-erased handle for stacking derivations. The handle keeps the
    /// whole derivation machinery alive, not just the value cell.
    pub fn handle(&self) -> SourceHandle {
        let inner = Arc::clone(&self.inner);
        SourceHandle::new(
            self.id(),
            Arc::clone(&self.inner.transitive),
            Arc::new(move |hook: SourceHook| {
                inner.cell.subscribe_fallible(move |_| hook())
            }),
        )
    }
}

impl<T> Clone for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.id().raw())
            .field("value", &self.get())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
