//! State Primitives
//!
//! This module implements the immutable half of the engine: keys, fields,
//! slices, snapshots and transactions.
//!
//! # Concepts
//!
//! ## Keys and Slices
//!
//! A [`Key`] is declared once per slice. Fields and effects are registered
//! on it, then [`Key::slice`] produces the one [`Slice`] the key may ever
//! produce. Slices list the slices they depend on; the store orders and
//! validates them.
//!
//! ## Fields
//!
//! A [`StateField`] holds a value; a [`DerivedField`] computes one from the
//! state. Both read from a [`StoreState`] snapshot, never from a mutable
//! cell.
//!
//! ## Snapshots and Transactions
//!
//! A [`StoreState`] never changes. [`StoreState::apply`] folds a
//! [`Transaction`]'s steps over it and returns a new snapshot that shares
//! every untouched slice with the old one.

mod field;
mod key;
mod slice;
mod slice_state;
mod store_state;
mod transaction;

pub use field::{AnyField, DerivedField, ErasedField, StateField, Value};
pub use key::Key;
pub use slice::{Slice, SliceSpec, SliceView};
pub use store_state::{StateOverride, StoreState};
pub use transaction::{Metadata, Step, Transaction, META_DISPATCHER, META_STORE};

pub(crate) use field::FieldCore;
