//! Error types for the reactive runtime.
//!
//! Two kinds of failure flow through the system:
//!
//! - Contract violations and derivation failures (`StateError`) interrupt the
//!   caller's control flow. Writing to a read-only derived value or tripping
//!   the reentrancy guard returns an error from the triggering write.
//!
//! - Persistence I/O failures (`StorageError`) are expected, recoverable
//!   states of an external dependency. They are caught and logged inside the
//!   persistence adapter and never propagate to the caller; the in-memory
//!   cell keeps operating with its last known value.
//!
//! Async settlement failures are modeled as data (`AsyncError` in the
//! `future` module) and never thrown.

use thiserror::Error;

/// Errors surfaced synchronously by reactive operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Write attempted on a derived (computed) value.
    #[error("cannot mutate a derived value")]
    MutateDerived,

    /// Write attempted on an external-store bridge cell.
    #[error("cannot mutate an external-store bridge cell")]
    MutateBridge,

    /// A derivation's source list transitively includes the derivation itself.
    /// Detected at construction time; cyclic graphs are unsupported.
    #[error("cyclic derivation: a source already depends on cell {id}")]
    CycleDetected { id: u64 },

    /// Reentrant writes did not settle within the update depth limit.
    #[error("update depth exceeded ({depth}): reentrant writes did not settle")]
    UpdateDepthExceeded { depth: usize },

    /// A derive function failed. Propagated to the triggering write; the
    /// previously cached value is retained unchanged.
    #[error("derivation failed: {0}")]
    Derive(String),
}

/// Errors reported by a durable key-value backend.
///
/// The persistence adapter catches these, logs them, and degrades the
/// affected cell to in-memory-only operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The backend is not reachable at all.
    #[error("storage backend unavailable")]
    Unavailable,

    /// The backend refused the write for capacity reasons.
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Any other read or write failure.
    #[error("storage i/o error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_messages() {
        assert_eq!(
            StateError::MutateDerived.to_string(),
            "cannot mutate a derived value"
        );
        assert_eq!(
            StateError::UpdateDepthExceeded { depth: 65 }.to_string(),
            "update depth exceeded (65): reentrant writes did not settle"
        );
    }

    #[test]
    fn storage_error_messages() {
        assert_eq!(
            StorageError::Io("disk full".into()).to_string(),
            "storage i/o error: disk full"
        );
    }
}
