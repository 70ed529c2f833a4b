//! Persistence Adapter
//!
//! Mirrors a cell's writes into a durable key-value slot and hydrates the
//! initial value from it. The durable backend exposes the minimal string
//! contract (`get_item`/`set_item`); values are serialized as JSON.
//!
//! I/O failures on either side are expected, recoverable states of an
//! external dependency: they are caught and logged, never thrown through to
//! the caller. The in-memory cell keeps operating with its last known
//! value (degraded, in-memory-only).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::signal::Signal;

/// A durable key-value backend holding serialized values.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// In-process `Storage` backed by a map. The default backend and the test
/// double.
#[derive(Default)]
pub struct MemoryStorage {
    slots: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current slot contents, for inspection.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.slots.read().clone()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.slots.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.slots
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Create a cell mirrored into the durable slot at `key`.
///
/// A present, parseable slot seeds the cell and overrides `initial`. Every
/// subsequent successful write serializes and stores the value under `key`
/// before user subscribers are notified (the mirror is the first
/// registration).
pub fn persistent<T>(storage: Arc<dyn Storage>, key: &str, initial: T) -> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    let seed = match storage.get_item(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "hydrated cell from durable slot");
                value
            }
            Err(err) => {
                warn!(key, %err, "durable slot holds unparseable data; using initial value");
                initial
            }
        },
        Ok(None) => initial,
        Err(err) => {
            warn!(key, %err, "durable slot read failed; using initial value");
            initial
        }
    };

    let cell = Signal::new(seed);

    // The mirror listener stays attached for the cell's whole lifetime;
    // subscriptions only detach on explicit dispose.
    let mirror_key = key.to_string();
    let _mirror = cell.subscribe(move |value: &T| {
        match serde_json::to_string(value) {
            Ok(raw) => {
                if let Err(err) = storage.set_item(&mirror_key, &raw) {
                    warn!(key = %mirror_key, %err, "durable slot write failed; cell continues in-memory");
                }
            }
            Err(err) => {
                warn!(key = %mirror_key, %err, "failed to serialize cell value");
            }
        }
    });

    cell
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable)
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::QuotaExceeded)
        }
    }

    #[test]
    fn write_round_trips_through_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let cell = persistent(storage.clone() as Arc<dyn Storage>, "count", 1);

        cell.set(2).unwrap();

        let raw = storage.get_item("count").unwrap().unwrap();
        let stored: i32 = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored, 2);
    }

    #[test]
    fn fresh_cell_hydrates_from_slot() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        let first = persistent(storage.clone(), "k", 1);
        first.set(2).unwrap();

        // Same session, same key: the slot wins over the initial value.
        let second = persistent(storage.clone(), "k", 99);
        assert_eq!(second.get(), 2);
    }

    #[test]
    fn unparseable_slot_falls_back_to_initial() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("k", "not json at all {").unwrap();

        let cell = persistent(storage as Arc<dyn Storage>, "k", 7);
        assert_eq!(cell.get(), 7);
    }

    #[test]
    fn storage_failures_degrade_to_in_memory() {
        let storage: Arc<dyn Storage> = Arc::new(FailingStorage);
        let cell = persistent(storage, "k", 1);

        // Both the hydration failure and the mirror failure are swallowed;
        // the cell keeps working.
        cell.set(5).unwrap();
        assert_eq!(cell.get(), 5);
    }

    #[test]
    fn mirror_runs_before_user_subscribers() {
        let storage = Arc::new(MemoryStorage::new());
        let cell = persistent(storage.clone() as Arc<dyn Storage>, "k", 0);

        let seen_in_slot = Arc::new(parking_lot::Mutex::new(None));
        let seen = seen_in_slot.clone();
        let inspect = storage.clone();
        let _sub = cell.subscribe(move |_| {
            *seen.lock() = inspect.get_item("k").unwrap();
        });

        cell.set(3).unwrap();
        assert_eq!(seen_in_slot.lock().as_deref(), Some("3"));
    }

    #[test]
    fn structured_values_round_trip() {
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Prefs {
            theme: String,
            font_size: u32,
        }

        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let cell = persistent(
            storage.clone(),
            "prefs",
            Prefs {
                theme: "dark".into(),
                font_size: 12,
            },
        );

        cell.update(|p| Prefs {
            font_size: 14,
            ..p.clone()
        })
        .unwrap();

        let again = persistent(
            storage,
            "prefs",
            Prefs {
                theme: "light".into(),
                font_size: 10,
            },
        );
        assert_eq!(again.get().font_size, 14);
        assert_eq!(again.get().theme, "dark");
    }
}
