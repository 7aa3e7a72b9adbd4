//! Error types for the state engine.

use thiserror::Error;

use crate::ids::{EffectId, FieldId, SliceId, TransactionId};

/// Boxed error returned by user callbacks (effects, cleanups, operations).
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Main error type for store, slice and transaction operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("slice {0} not found in store state")]
    SliceNotFound(SliceId),

    #[error("field {field} read before slice {slice} was created")]
    SliceNotCreated { slice: SliceId, field: FieldId },

    #[error("field {field} not found in slice {slice}")]
    FieldNotFound { slice: SliceId, field: FieldId },

    #[error("slice {slice} exposes no field named {name:?}")]
    UnknownFieldName { slice: SliceId, name: String },

    #[error("field {0} holds a value of a different type than requested")]
    TypeMismatch(FieldId),

    #[error("duplicate slice id {0}")]
    DuplicateSlice(SliceId),

    #[error("key {0} already produced a slice")]
    SliceAlreadyCreated(SliceId),

    #[error("key {0} is sealed, its slice already exists")]
    KeySealed(SliceId),

    #[error("field {field} is not registered on key {slice}")]
    ForeignField { slice: SliceId, field: FieldId },

    #[error("slice {slice} depends on {dependency}, which must appear earlier in the slice list")]
    DependencyOutOfOrder { slice: SliceId, dependency: SliceId },

    #[error("slice {slice} depends on {dependency}, which is not in the slice list")]
    MissingDependency { slice: SliceId, dependency: SliceId },

    #[error("circular dependency: {}", format_path(.path))]
    CircularDependency { path: Vec<SliceId> },

    #[error("transaction {0} was already applied")]
    TransactionAlreadyApplied(TransactionId),

    #[error("derived field {field} of slice {slice} cannot be overridden")]
    DerivedOverride { slice: SliceId, field: FieldId },

    #[error("store {0} has been destroyed")]
    StoreDestroyed(String),

    #[error("operation {name} failed: {message}")]
    OperationFailed { name: String, message: String },

    #[error("invalid store config: {0}")]
    Config(#[from] serde_json::Error),
}

fn format_path(path: &[SliceId]) -> String {
    path.iter()
        .map(SliceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An effect run that returned an error or panicked.
///
/// Handed to [`Scheduler::report_error`](crate::reactive::Scheduler::report_error).
#[derive(Debug, Clone, Error)]
#[error("effect {name} ({effect}) failed: {message}")]
pub struct EffectFailure {
    pub effect: EffectId,
    pub name: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_dependency_reports_full_path() {
        let err = Error::CircularDependency {
            path: vec![SliceId::from("sl_a"), SliceId::from("sl_b"), SliceId::from("sl_a")],
        };
        assert_eq!(err.to_string(), "circular dependency: sl_a -> sl_b -> sl_a");
    }

    #[test]
    fn replay_error_names_transaction() {
        let err = Error::TransactionAlreadyApplied(TransactionId::from("tx_inc$2"));
        assert!(err.to_string().contains("tx_inc$2"));
    }
}
