//! Reaction Implementation
//!
//! A Reaction is a side-effecting callback re-invoked on change of its
//! declared dependencies. The callback fires exactly once synchronously at
//! registration, then once per subsequent qualifying change of any source
//! until disposed. Dependencies are an explicit `SourceHandle` list, same
//! as derived values.
//!
//! Reentrant writes from inside the callback to one of its own sources
//! re-invoke the reaction synchronously within the same turn; the cascade
//! is bounded by the signal layer's update depth guard, which fails the
//! innermost write instead of recursing forever.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::batch;
use crate::signal::{CellId, SourceHandle, SourceHook, Subscription};

/// A registered side-effecting callback with a disposer.
///
/// Cloning shares state: disposing any clone disposes the reaction.
/// Dropping the handle does NOT dispose it; an undisposed reaction keeps
/// firing for as long as its sources live.
pub struct Reaction {
    id: CellId,
    disposed: Arc<AtomicBool>,
    sources: Arc<Vec<Subscription>>,
}

impl Reaction {
    /// Register `callback` against the given sources. The callback fires
    /// immediately, then once per qualifying change of any source.
    pub fn new<F>(sources: &[SourceHandle], callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = CellId::next();
        let disposed = Arc::new(AtomicBool::new(false));
        let callback = Arc::new(callback);

        let run: SourceHook = {
            let disposed = Arc::clone(&disposed);
            let callback = Arc::clone(&callback);
            Arc::new(move || {
                // A flush may still be pending when disposal happens
                // mid-drain; disposed reactions never fire.
                if !disposed.load(Ordering::SeqCst) {
                    callback();
                }
                Ok(())
            })
        };
        let hook: SourceHook = {
            let run = Arc::clone(&run);
            Arc::new(move || {
                if batch::deferring() {
                    batch::enqueue(id, Arc::clone(&run));
                    Ok(())
                } else {
                    run()
                }
            })
        };

        let mut seen = HashSet::new();
        let mut subscriptions = Vec::new();
        for source in sources {
            if seen.insert(source.id()) {
                subscriptions.push(source.attach(Arc::clone(&hook)));
            }
        }

        // Immediate first invocation, after the sources are wired so a
        // reentrant write from the callback cascades normally.
        callback();

        Self {
            id,
            disposed,
            sources: Arc::new(subscriptions),
        }
    }

    /// Unique ID of this reaction in the update graph.
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Deregister from every source. Idempotent; the callback is never
    /// invoked after disposal.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            for source in self.sources.iter() {
                source.dispose();
            }
        }
    }

    /// Whether the reaction has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Clone for Reaction {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            disposed: Arc::clone(&self.disposed),
            sources: Arc::clone(&self.sources),
        }
    }
}

impl Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.id.raw())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
