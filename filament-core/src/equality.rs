//! Equality Policies
//!
//! Every write in the runtime is gated by an equality policy: a new value
//! that compares equal to the current one is a no-op and never reaches
//! subscribers. Cells, derived values, and store bridges all consult the
//! policy of the cell being written.
//!
//! # Variants
//!
//! - `structural` (the default): `PartialEq` comparison. A derived
//!   `PartialEq` already performs deep element-wise structural comparison in
//!   Rust, so reference-identity and deep-structural checks collapse into
//!   this single policy.
//! - `never`: values never compare equal, so every write propagates.
//! - `always`: values always compare equal, so writes never propagate.
//! - `custom`: a caller-supplied comparator.

use std::fmt;
use std::sync::Arc;

/// A pluggable value-comparison strategy.
///
/// Cheap to clone; the comparator is shared behind an `Arc`.
pub struct Equality<T> {
    name: &'static str,
    cmp: Arc<dyn Fn(&T, &T) -> bool + Send + Sync>,
}

impl<T> Equality<T> {
    /// Values never compare equal: every write fires subscribers.
    pub fn never() -> Self {
        Self {
            name: "never",
            cmp: Arc::new(|_, _| false),
        }
    }

    /// Values always compare equal: writes never fire subscribers.
    pub fn always() -> Self {
        Self {
            name: "always",
            cmp: Arc::new(|_, _| true),
        }
    }

    /// Caller-supplied comparator.
    pub fn custom<F>(cmp: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            name: "custom",
            cmp: Arc::new(cmp),
        }
    }

    /// Compare two values under this policy.
    pub fn are_equal(&self, a: &T, b: &T) -> bool {
        (self.cmp)(a, b)
    }

    /// Name of the policy variant, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: PartialEq> Equality<T> {
    /// Structural comparison via `PartialEq`. The default policy.
    pub fn structural() -> Self {
        Self {
            name: "structural",
            cmp: Arc::new(|a, b| a == b),
        }
    }
}

impl<T: PartialEq> Default for Equality<T> {
    fn default() -> Self {
        Self::structural()
    }
}

impl<T> Clone for Equality<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            cmp: Arc::clone(&self.cmp),
        }
    }
}

impl<T> fmt::Debug for Equality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Equality").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_uses_partial_eq() {
        let eq = Equality::structural();
        assert!(eq.are_equal(&vec![1, 2, 3], &vec![1, 2, 3]));
        assert!(!eq.are_equal(&vec![1, 2, 3], &vec![1, 2, 4]));
    }

    #[test]
    fn never_and_always() {
        let never = Equality::<i32>::never();
        assert!(!never.are_equal(&42, &42));

        let always = Equality::<i32>::always();
        assert!(always.are_equal(&1, &2));
    }

    #[test]
    fn custom_comparator() {
        // Compare case-insensitively.
        let eq = Equality::custom(|a: &String, b: &String| a.eq_ignore_ascii_case(b));
        assert!(eq.are_equal(&"Hello".to_string(), &"hello".to_string()));
        assert!(!eq.are_equal(&"Hello".to_string(), &"world".to_string()));
    }

    #[test]
    fn clone_shares_comparator() {
        let eq = Equality::<i32>::never();
        let cloned = eq.clone();
        assert_eq!(cloned.name(), "never");
        assert!(!cloned.are_equal(&1, &1));
    }
}
