//! Identity Generation
//!
//! Slices, fields, transactions and effects are identified by namespaced,
//! human-readable strings such as `sl_counter`, `f_counter$3` or `tx_update$41`.
//!
//! Ids come from an [`IdGenerator`], a counter service keyed by
//! `(kind, hint)`. The first id issued for a hint is the bare hint; every
//! later one carries a `$n` suffix. A process-wide generator backs the
//! default constructors; tests can inject their own instance or reset the
//! global one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Serialize;

/// The namespace an id is issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Slice,
    Field,
    Transaction,
    Effect,
}

impl IdKind {
    fn prefix(self) -> &'static str {
        match self {
            IdKind::Slice => "sl",
            IdKind::Field => "f",
            IdKind::Transaction => "tx",
            IdKind::Effect => "eff",
        }
    }
}

/// Hint-keyed counter service.
///
/// Cloning shares the underlying counters.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    counters: Arc<Mutex<HashMap<(IdKind, String), u64>>>,
}

impl IdGenerator {
    /// Create a generator with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide generator used by `Key::new`, `Transaction::new` and
    /// effect registration.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<IdGenerator> = OnceLock::new();
        GLOBAL.get_or_init(IdGenerator::new).clone()
    }

    /// Issue the next id for `hint` in the given namespace.
    pub fn next(&self, kind: IdKind, hint: &str) -> String {
        let hint = if hint.is_empty() { "anon" } else { hint };
        let mut counters = self.counters.lock();
        let counter = counters.entry((kind, hint.to_string())).or_insert(0);
        let n = *counter;
        *counter += 1;

        if n == 0 {
            format!("{}_{}", kind.prefix(), hint)
        } else {
            format!("{}_{}${}", kind.prefix(), hint, n)
        }
    }

    /// Forget every counter. Only meant for tests: ids issued before the
    /// reset may be issued again.
    pub fn reset(&self) {
        self.counters.lock().clear();
    }
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub(crate) fn generate(ids: &IdGenerator, hint: &str) -> Self {
                Self(ids.next($kind, hint))
            }

            /// The raw id string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

define_id!(
    /// Identifies a slice (and the key that produced it).
    SliceId,
    IdKind::Slice
);
define_id!(
    /// Identifies a state or derived field.
    FieldId,
    IdKind::Field
);
define_id!(
    /// Identifies a transaction.
    TransactionId,
    IdKind::Transaction
);
define_id!(
    /// Identifies a registered effect.
    EffectId,
    IdKind::Effect
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_id_is_bare_hint() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next(IdKind::Slice, "counter"), "sl_counter");
        assert_eq!(ids.next(IdKind::Slice, "counter"), "sl_counter$1");
        assert_eq!(ids.next(IdKind::Slice, "counter"), "sl_counter$2");
    }

    #[test]
    fn counters_are_per_kind_and_hint() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next(IdKind::Slice, "a"), "sl_a");
        assert_eq!(ids.next(IdKind::Field, "a"), "f_a");
        assert_eq!(ids.next(IdKind::Slice, "b"), "sl_b");
        assert_eq!(ids.next(IdKind::Effect, ""), "eff_anon");
    }

    #[test]
    fn reset_restarts_counters() {
        let ids = IdGenerator::new();
        ids.next(IdKind::Transaction, "x");
        ids.reset();
        assert_eq!(ids.next(IdKind::Transaction, "x"), "tx_x");
    }

    #[test]
    fn clones_share_counters() {
        let ids = IdGenerator::new();
        let other = ids.clone();
        ids.next(IdKind::Field, "n");
        assert_eq!(other.next(IdKind::Field, "n"), "f_n$1");
    }

    #[test]
    fn typed_ids_display_raw_string() {
        let ids = IdGenerator::new();
        let id = SliceId::generate(&ids, "todos");
        assert_eq!(id.to_string(), "sl_todos");
        assert_eq!(id.as_str(), "sl_todos");
        assert_eq!(id, SliceId::from("sl_todos"));
    }
}
