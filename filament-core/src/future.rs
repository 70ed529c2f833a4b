//! Async Bridge
//!
//! Lifts a one-shot future into a tri-state observable cell. The cell
//! starts in `{loading: true}` and transitions exactly once, on settlement,
//! to either `{data: Some(..)}` or `{error: Some(..)}`. The transition is
//! one-way; exactly one of `data`/`error` is populated afterwards.
//!
//! Settlement failures are data, never panics: the wrapped future's error
//! is normalized into an `AsyncError` and surfaced through the state.
//!
//! The future is spawned on the ambient tokio runtime, so `from_future`
//! must be called from within one. The settlement write follows the same
//! synchronous notification path as any other write. There is no
//! cancellation: once spawned, the future eventually settles its cell (or
//! never, if it never completes).

use std::fmt::Display;
use std::future::Future;

use thiserror::Error;
use tracing::error;

use crate::signal::Signal;

/// A normalized settlement failure, compared by message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AsyncError {
    message: String,
}

impl AsyncError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Tri-state value of an in-flight or settled asynchronous computation.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncState<T> {
    /// True until the wrapped future settles.
    pub loading: bool,
    /// The success value, or an optional placeholder while loading.
    pub data: Option<T>,
    /// The normalized failure. Populated only after a failed settlement.
    pub error: Option<AsyncError>,
}

impl<T> AsyncState<T> {
    /// In flight, no placeholder value.
    pub fn pending() -> Self {
        Self {
            loading: true,
            data: None,
            error: None,
        }
    }

    /// In flight, with a placeholder value visible while loading.
    pub fn pending_with(initial: T) -> Self {
        Self {
            loading: true,
            data: Some(initial),
            error: None,
        }
    }

    /// Settled successfully.
    pub fn ready(value: T) -> Self {
        Self {
            loading: false,
            data: Some(value),
            error: None,
        }
    }

    /// Settled with a failure.
    pub fn failed(error: AsyncError) -> Self {
        Self {
            loading: false,
            data: None,
            error: Some(error),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.loading
    }

    pub fn is_ready(&self) -> bool {
        !self.loading && self.data.is_some()
    }

    pub fn is_failed(&self) -> bool {
        !self.loading && self.error.is_some()
    }
}

/// Lift a one-shot future into a tri-state cell.
///
/// Independent calls over independent futures produce independent cells.
///
/// Must be called from within a tokio runtime; the settlement task is
/// spawned on it.
pub fn from_future<T, E, F>(future: F) -> Signal<AsyncState<T>>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Display + Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
{
    spawn_bridge(future, None)
}

/// Like `from_future`, but the cell carries `initial` as placeholder data
/// while loading. Must also be called from within a tokio runtime.
pub fn from_future_with<T, E, F>(future: F, initial: T) -> Signal<AsyncState<T>>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Display + Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
{
    spawn_bridge(future, Some(initial))
}

fn spawn_bridge<T, E, F>(future: F, initial: Option<T>) -> Signal<AsyncState<T>>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Display + Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
{
    let cell = Signal::new(AsyncState {
        loading: true,
        data: initial,
        error: None,
    });

    let settled = cell.clone();
    tokio::spawn(async move {
        let outcome = match future.await {
            Ok(value) => AsyncState::ready(value),
            Err(err) => AsyncState::failed(AsyncError::new(err.to_string())),
        };
        // The one and only transition for this cell.
        if let Err(err) = settled.set(outcome) {
            error!(%err, "async settlement write failed");
        }
    });

    cell
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn settled<T>(cell: &Signal<AsyncState<T>>) -> AsyncState<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        loop {
            let state = cell.get();
            if !state.loading {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn successful_future_transitions_to_ready() {
        let cell = from_future(async { Ok::<_, String>(5) });
        assert!(cell.get().is_pending());

        let state = settled(&cell).await;
        assert!(state.is_ready());
        assert_eq!(state.data, Some(5));
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn failed_future_carries_normalized_error() {
        let cell = from_future(async { Err::<i32, _>("x".to_string()) });

        let state = settled(&cell).await;
        assert!(state.is_failed());
        assert_eq!(state.data, None);
        assert_eq!(state.error.as_ref().map(|e| e.message()), Some("x"));
    }

    #[tokio::test]
    async fn initial_value_visible_while_loading() {
        let (tx, rx) = tokio::sync::oneshot::channel::<i32>();
        let cell = from_future_with(
            async move { rx.await.map_err(|e| e.to_string()) },
            42,
        );

        let before = cell.get();
        assert!(before.loading);
        assert_eq!(before.data, Some(42));

        tx.send(7).unwrap();
        let state = settled(&cell).await;
        assert_eq!(state.data, Some(7));
    }

    #[tokio::test]
    async fn transition_happens_exactly_once() {
        let notify_count = Arc::new(AtomicI32::new(0));
        let notifications = notify_count.clone();

        let cell = from_future(async { Ok::<_, String>(1) });
        let _sub = cell.subscribe(move |_| {
            notifications.fetch_add(1, Ordering::SeqCst);
        });

        settled(&cell).await;
        // Give any stray second write a chance to show up.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(notify_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn independent_calls_produce_independent_cells() {
        let a = from_future(async { Ok::<_, String>(1) });
        let b = from_future(async { Err::<i32, _>("boom".to_string()) });

        let state_a = settled(&a).await;
        let state_b = settled(&b).await;
        assert!(state_a.is_ready());
        assert!(state_b.is_failed());
        assert_ne!(a.id(), b.id());
    }
}
