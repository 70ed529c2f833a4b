//! Filament Core
//!
//! This crate provides the core runtime for the Filament reactive state
//! layer. It implements:
//!
//! - Reactive primitives (signals, derived values, reactions)
//! - Equality-gated change propagation and write batching
//! - An async bridge lifting one-shot futures into tri-state cells
//! - Persistence mirroring into a durable key-value backend
//! - A bridge adapting external Flux-like stores into cells
//! - The framework binding consumed by host UI components
//!
//! # Architecture
//!
//! Data flows one direction: writes enter at a `Signal` or through the
//! `StoreBridge`; the cell's `Equality` policy gates propagation;
//! `Reaction`, `Derived`, and `Binding` subscribers are notified in
//! registration order; the persistence adapter mirrors writes into its
//! durable slot as a side channel.
//!
//! Dependencies are explicit: derived values and reactions declare their
//! sources as `SourceHandle` lists up front. There is no implicit tracking
//! of reads and no multi-level topological scheduler; everything runs
//! synchronously on the caller's turn, with `batch()` available to coalesce
//! fan-out. The only asynchronous boundary is the async bridge, whose
//! settlement write follows the same synchronous path as any other write.
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_core::{batch, Derived, Reaction, Signal};
//!
//! let count = Signal::new(0);
//!
//! let count_clone = count.clone();
//! let doubled = Derived::new(&[count.handle()], move || count_clone.get() * 2)?;
//!
//! let doubled_clone = doubled.clone();
//! let reaction = Reaction::new(&[doubled.handle()], move || {
//!     println!("doubled is now {}", doubled_clone.get());
//! });
//!
//! count.set(5)?; // prints: "doubled is now 10"
//!
//! batch(|| {
//!     count.set(6).unwrap();
//!     count.set(7).unwrap();
//! }); // one recomputation, one print
//!
//! reaction.dispose();
//! ```

pub mod batch;
pub mod binding;
pub mod derived;
pub mod equality;
pub mod error;
pub mod future;
pub mod persist;
pub mod reaction;
pub mod signal;
pub mod store;

pub use batch::{batch, is_batching};
pub use binding::Binding;
pub use derived::Derived;
pub use equality::Equality;
pub use error::{StateError, StorageError};
pub use future::{from_future, from_future_with, AsyncError, AsyncState};
pub use persist::{persistent, MemoryStorage, Storage};
pub use reaction::Reaction;
pub use signal::{CellId, Signal, SourceHandle, SubscriberId, Subscription};
pub use store::{
    from_external_store, StoreBridge, StoreListener, StoreSource, StoreUnsubscribe,
    ValueStore,
};
