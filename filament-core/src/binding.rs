//! Framework Binding
//!
//! Exposes a cell as host-framework local state plus a setter: the
//! `useObservable` contract rendered as an owned object. Mounting
//! subscribes and seeds a local snapshot from the cell; notifications
//! update the snapshot; dropping the binding is the unmount and disposes
//! the subscription.
//!
//! Host components re-render with a possibly different cell instance;
//! `rebind` tolerates that by discarding the old subscription and
//! resubscribing to the new cell.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::StateError;
use crate::signal::{CellId, Signal, Subscription};

/// A mounted view of a cell: local snapshot + setter.
pub struct Binding<T>
where
    T: Clone + Send + Sync + 'static,
{
    cell: Signal<T>,
    snapshot: Arc<RwLock<T>>,
    subscription: Subscription,
}

impl<T> Binding<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Subscribe to `cell` and seed the local snapshot from its current
    /// value.
    pub fn mount(cell: &Signal<T>) -> Self {
        let snapshot = Arc::new(RwLock::new(cell.get()));
        let subscription = {
            let snapshot = Arc::clone(&snapshot);
            cell.subscribe(move |value| {
                *snapshot.write() = value.clone();
            })
        };
        Self {
            cell: cell.clone(),
            snapshot,
            subscription,
        }
    }

    /// The local snapshot, updated on each notification.
    pub fn value(&self) -> T {
        self.snapshot.read().clone()
    }

    /// Forward a write to the bound cell.
    pub fn set(&self, next: T) -> Result<bool, StateError> {
        self.cell.set(next)
    }

    /// Forward an updater write to the bound cell.
    pub fn update<F>(&self, f: F) -> Result<bool, StateError>
    where
        F: FnOnce(&T) -> T,
    {
        self.cell.update(f)
    }

    /// ID of the currently bound cell.
    pub fn cell_id(&self) -> CellId {
        self.cell.id()
    }

    /// Switch to a new cell instance: dispose the old subscription,
    /// subscribe to the new cell, reseed the snapshot. No-op when the cell
    /// identity is unchanged.
    pub fn rebind(&mut self, cell: &Signal<T>) {
        if cell.id() == self.cell.id() {
            return;
        }
        self.subscription.dispose();
        *self = Self::mount(cell);
    }

    /// Explicit unmount. Equivalent to dropping the binding.
    pub fn unmount(self) {}
}

impl<T> Drop for Binding<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

impl<T> Debug for Binding<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("cell_id", &self.cell_id().raw())
            .field("value", &self.value())
            .finish()
    }
}
