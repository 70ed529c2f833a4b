//! Batching Coordinator
//!
//! `batch()` groups a sequence of writes so dependents observe one logical
//! update. Writes inside the batch remain immediately visible to `get()`,
//! but notification fan-out is deferred: each affected cell registers one
//! pending flush, deduplicated by cell ID in first-dirty order, and the
//! queue drains when the outermost batch exits.
//!
//! Derived values and reactions enqueue themselves the same way while the
//! queue is draining, so a computation watching several cells written in
//! one batch recomputes (or fires) at most once, observing the final state.
//!
//! Implementation follows the re-entrant depth counter strategy: increment
//! on entry, mark cells dirty without firing while depth > 0, flush
//! deduplicated notifications once depth returns to 0.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::error;

use crate::error::StateError;
use crate::signal::CellId;

/// A deferred notification or recomputation.
pub(crate) type FlushFn = Arc<dyn Fn() -> Result<(), StateError> + Send + Sync>;

/// Hard cap on flush operations per drain. A reaction that keeps writing its
/// own dependencies from inside the drain would otherwise spin forever.
const MAX_FLUSH_OPS: usize = 4096;

struct BatchState {
    depth: usize,
    draining: bool,
    pending: IndexMap<CellId, FlushFn>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState {
        depth: 0,
        draining: false,
        pending: IndexMap::new(),
    });
}

/// Execute `f` with notification fan-out coalesced.
///
/// Nesting is allowed; the flush happens when the outermost batch exits. If
/// `f` panics, pending notifications from the poisoned batch are discarded.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    BATCH.with(|b| b.borrow_mut().depth += 1);

    struct BatchGuard;
    impl Drop for BatchGuard {
        fn drop(&mut self) {
            let outermost = BATCH.with(|b| {
                let mut state = b.borrow_mut();
                state.depth -= 1;
                state.depth == 0
            });
            if !outermost {
                return;
            }
            if std::thread::panicking() {
                BATCH.with(|b| b.borrow_mut().pending.clear());
                return;
            }
            drain();
        }
    }

    let _guard = BatchGuard;
    f()
}

/// Whether the calling thread is currently inside a `batch()` body.
pub fn is_batching() -> bool {
    BATCH.with(|b| b.borrow().depth > 0)
}

/// Whether notifications should be deferred rather than fired inline.
/// True inside a batch body and while the pending queue is draining.
pub(crate) fn deferring() -> bool {
    BATCH.with(|b| {
        let state = b.borrow();
        state.depth > 0 || state.draining
    })
}

/// Register a pending flush for `id`. The first registration wins: for a
/// cell this preserves the pre-batch value its observers last saw, and the
/// dedup keeps any node at one flush per logical update.
pub(crate) fn enqueue(id: CellId, flush: FlushFn) {
    BATCH.with(|b| {
        b.borrow_mut().pending.entry(id).or_insert(flush);
    });
}

fn drain() {
    BATCH.with(|b| b.borrow_mut().draining = true);

    let mut ops = 0usize;
    loop {
        // Pop outside the closure call: a flush may enqueue further work
        // (derived recomputation, reaction callbacks) onto this queue.
        let next = BATCH.with(|b| {
            let mut state = b.borrow_mut();
            if state.pending.is_empty() {
                None
            } else {
                state.pending.shift_remove_index(0)
            }
        });
        let Some((id, flush)) = next else { break };

        ops += 1;
        if ops > MAX_FLUSH_OPS {
            error!(
                cell = id.raw(),
                "batch flush did not settle; dropping remaining notifications"
            );
            BATCH.with(|b| b.borrow_mut().pending.clear());
            break;
        }

        // Deferred delivery means the triggering write has already
        // returned; failures here can only be reported via the log.
        if let Err(err) = flush() {
            error!(cell = id.raw(), %err, "deferred notification failed");
        }
    }

    BATCH.with(|b| b.borrow_mut().draining = false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Signal;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn is_batching_reflects_depth() {
        assert!(!is_batching());
        batch(|| {
            assert!(is_batching());
            batch(|| assert!(is_batching()));
            assert!(is_batching());
        });
        assert!(!is_batching());
    }

    #[test]
    fn writes_visible_inside_batch() {
        let signal = Signal::new(1);
        batch(|| {
            signal.set(2).unwrap();
            assert_eq!(signal.get(), 2);
        });
        assert_eq!(signal.get(), 2);
    }

    #[test]
    fn multiple_writes_notify_once_with_final_value() {
        let signal = Signal::new(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let last_seen = Arc::new(AtomicI32::new(-1));

        let calls = call_count.clone();
        let seen = last_seen.clone();
        let _sub = signal.subscribe(move |v| {
            calls.fetch_add(1, Ordering::SeqCst);
            seen.store(*v, Ordering::SeqCst);
        });

        batch(|| {
            signal.set(1).unwrap();
            signal.set(2).unwrap();
            signal.set(3).unwrap();
            assert_eq!(call_count.load(Ordering::SeqCst), 0);
        });

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(last_seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn net_unchanged_batch_notifies_nobody() {
        let signal = Signal::new(5);
        let call_count = Arc::new(AtomicI32::new(0));
        let calls = call_count.clone();
        let _sub = signal.subscribe(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        batch(|| {
            signal.set(9).unwrap();
            signal.set(5).unwrap();
        });

        assert_eq!(call_count.load(Ordering::SeqCst), 0);
        assert_eq!(signal.get(), 5);
    }

    #[test]
    fn panicking_batch_discards_pending_notifications() {
        let signal = Signal::new(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let calls = call_count.clone();
        let _sub = signal.subscribe(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            batch(|| {
                signal.set(9).unwrap();
                panic!("boom");
            })
        }));
        assert!(result.is_err());

        // The write itself landed, but the queued notification is gone and
        // the depth counter is back to zero.
        assert_eq!(signal.get(), 9);
        assert!(!is_batching());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        // The coordinator still works after the unwind.
        signal.set(10).unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_batches_flush_once_at_outermost_exit() {
        let signal = Signal::new(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let calls = call_count.clone();
        let _sub = signal.subscribe(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        batch(|| {
            signal.set(1).unwrap();
            batch(|| {
                signal.set(2).unwrap();
            });
            // Inner exit must not flush while the outer batch is open.
            assert_eq!(call_count.load(Ordering::SeqCst), 0);
        });

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_returns_closure_result() {
        let signal = Signal::new(2);
        let doubled = batch(|| {
            signal.set(4).unwrap();
            signal.get() * 2
        });
        assert_eq!(doubled, 8);
    }
}
