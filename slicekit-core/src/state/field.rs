//! Field Implementation
//!
//! A field is the unit of state the engine tracks. There are two kinds:
//!
//! - [`StateField`] holds a value. Reading it looks the value up in the
//!   slice's state manager; updating it produces a [`Transaction`].
//!
//! - [`DerivedField`] is a pure computation over a [`StoreState`]. It is
//!   computed lazily, at most once per snapshot.
//!
//! # Equality
//!
//! Change detection compares values with the field's equality function.
//! Without one, two values are equal only if they are the same allocation
//! (`Rc` identity). No structural comparison is attempted unless the field
//! opts in with [`StateField::with_partial_eq`] or a custom function.
//!
//! # Reference Stability
//!
//! Derived values are additionally remembered per lineage (all snapshots
//! descending from one `StoreState::create`). When a recomputation yields a
//! value equal to the previously remembered one, the old `Rc` is returned,
//! so consumers can skip work with a pointer comparison.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::ids::{FieldId, SliceId};
use crate::reactive::EffectStore;

use super::key::KeyShared;
use super::store_state::StoreState;
use super::transaction::Transaction;

/// A type-erased field value.
pub type Value = Rc<dyn Any>;

type ErasedEquality = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;
pub(crate) type ErasedCompute = Rc<dyn Fn(&StoreState) -> Result<Value>>;

/// Whether two values are the same allocation.
pub(crate) fn same_value(a: &Value, b: &Value) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

pub(crate) fn downcast<T: 'static>(value: Value, field: &FieldId) -> Result<Rc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| Error::TypeMismatch(field.clone()))
}

pub(crate) enum FieldKind {
    State { initial: Value },
    Derived { compute: ErasedCompute },
}

/// Shared, type-erased part of every field.
pub(crate) struct FieldCore {
    pub(crate) id: FieldId,
    pub(crate) key: Rc<KeyShared>,
    pub(crate) kind: FieldKind,
    equality: RefCell<Option<ErasedEquality>>,
}

impl FieldCore {
    pub(crate) fn new(id: FieldId, key: Rc<KeyShared>, kind: FieldKind) -> Self {
        Self {
            id,
            key,
            kind,
            equality: RefCell::new(None),
        }
    }

    pub(crate) fn slice_id(&self) -> &SliceId {
        &self.key.slice_id
    }

    pub(crate) fn is_derived(&self) -> bool {
        matches!(self.kind, FieldKind::Derived { .. })
    }

    fn set_equality(&self, equality: ErasedEquality) {
        if self.key.is_created() {
            tracing::warn!(field = %self.id, "equality ignored, slice already created");
            return;
        }
        *self.equality.borrow_mut() = Some(equality);
    }

    pub(crate) fn is_equal(&self, a: &Value, b: &Value) -> bool {
        if same_value(a, b) {
            return true;
        }
        let equality = self.equality.borrow().clone();
        match equality {
            Some(eq) => eq(&**a, &**b),
            None => false,
        }
    }

    /// Read the field's value in `state`.
    pub(crate) fn read(&self, state: &StoreState) -> Result<Value> {
        if !self.key.is_created() {
            return Err(Error::SliceNotCreated {
                slice: self.slice_id().clone(),
                field: self.id.clone(),
            });
        }

        match &self.kind {
            FieldKind::State { .. } => state.slice_state(self.slice_id())?.get(&self.id),
            FieldKind::Derived { compute } => state.derived_value(self, compute),
        }
    }
}

impl fmt::Debug for FieldCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("id", &self.id)
            .field("slice", self.slice_id())
            .field("derived", &self.is_derived())
            .finish()
    }
}

fn erase_equality<T, F>(eq: F) -> ErasedEquality
where
    T: 'static,
    F: Fn(&T, &T) -> bool + 'static,
{
    Rc::new(move |a: &dyn Any, b: &dyn Any| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => eq(a, b),
            _ => false,
        }
    })
}

/// Opaque handle to any field, used when exposing fields on a slice.
#[derive(Clone)]
pub struct ErasedField {
    pub(crate) core: Rc<FieldCore>,
}

impl fmt::Debug for ErasedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt(f)
    }
}

/// Implemented by both field kinds.
pub trait AnyField {
    /// The field's id.
    fn field_id(&self) -> &FieldId;

    /// Type-erased handle to the field.
    fn erased(&self) -> ErasedField;
}

// ----------------------------------------------------------------------------
// State fields
// ----------------------------------------------------------------------------

/// A field holding a value of type `T`.
///
/// Created with [`Key::field`](super::Key::field).
pub struct StateField<T> {
    core: Rc<FieldCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> StateField<T> {
    pub(crate) fn from_core(core: Rc<FieldCore>) -> Self {
        Self {
            core,
            _marker: PhantomData,
        }
    }

    /// The field's id.
    pub fn id(&self) -> &FieldId {
        &self.core.id
    }

    /// Id of the slice the field belongs to.
    pub fn slice_id(&self) -> &SliceId {
        self.core.slice_id()
    }

    /// Use `eq` to decide whether a new value is a change.
    pub fn with_equality<F>(self, eq: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        self.core.set_equality(erase_equality(eq));
        self
    }

    /// Read the value in `state`.
    pub fn get(&self, state: &StoreState) -> Result<Rc<T>> {
        downcast(self.core.read(state)?, &self.core.id)
    }

    /// Read the value from the effect's current state and record the read,
    /// making the effect re-run when this field changes.
    pub fn track(&self, store: &EffectStore) -> Result<Rc<T>> {
        let value = self.core.read(&store.state())?;
        store.record(Rc::clone(&self.core), Rc::clone(&value));
        downcast(value, &self.core.id)
    }

    /// A transaction replacing the value.
    pub fn update(&self, value: T) -> Transaction {
        self.update_with(move |_| value)
    }

    /// A transaction replacing the value with `updater(current)`.
    ///
    /// Applying it leaves the state untouched when the field's equality
    /// reports no change.
    pub fn update_with<F>(&self, updater: F) -> Transaction
    where
        F: FnOnce(&T) -> T + 'static,
    {
        let core = Rc::clone(&self.core);
        Transaction::new("update")
            .with_source(self.core.slice_id())
            .step(move |state: &StoreState| {
                let current = downcast::<T>(core.read(state)?, &core.id)?;
                let next: Value = Rc::new(updater(&current));
                let current: Value = current;

                if core.is_equal(&current, &next) {
                    return Ok(state.clone());
                }
                state.update_field(&core, next)
            })
    }
}

impl<T: PartialEq + 'static> StateField<T> {
    /// Treat values comparing equal with `PartialEq` as unchanged.
    pub fn with_partial_eq(self) -> Self {
        self.with_equality(|a: &T, b: &T| a == b)
    }
}

impl<T> Clone for StateField<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for StateField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt(f)
    }
}

impl<T: 'static> AnyField for StateField<T> {
    fn field_id(&self) -> &FieldId {
        &self.core.id
    }

    fn erased(&self) -> ErasedField {
        ErasedField {
            core: Rc::clone(&self.core),
        }
    }
}

// ----------------------------------------------------------------------------
// Derived fields
// ----------------------------------------------------------------------------

/// A pure computation over the store state.
///
/// Created with [`Key::derive`](super::Key::derive).
pub struct DerivedField<T> {
    core: Rc<FieldCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> DerivedField<T> {
    pub(crate) fn from_core(core: Rc<FieldCore>) -> Self {
        Self {
            core,
            _marker: PhantomData,
        }
    }

    /// The field's id.
    pub fn id(&self) -> &FieldId {
        &self.core.id
    }

    /// Id of the slice the field belongs to.
    pub fn slice_id(&self) -> &SliceId {
        self.core.slice_id()
    }

    /// Use `eq` to decide whether a recomputed value can reuse the previous one.
    pub fn with_equality<F>(self, eq: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        self.core.set_equality(erase_equality(eq));
        self
    }

    /// Compute (or fetch the cached) value for `state`.
    pub fn get(&self, state: &StoreState) -> Result<Rc<T>> {
        downcast(self.core.read(state)?, &self.core.id)
    }

    /// Read the value from the effect's current state and record the read.
    pub fn track(&self, store: &EffectStore) -> Result<Rc<T>> {
        let value = self.core.read(&store.state())?;
        store.record(Rc::clone(&self.core), Rc::clone(&value));
        downcast(value, &self.core.id)
    }
}

impl<T: PartialEq + 'static> DerivedField<T> {
    /// Reuse the previous value when a recomputation compares equal.
    pub fn with_partial_eq(self) -> Self {
        self.with_equality(|a: &T, b: &T| a == b)
    }
}

impl<T> Clone for DerivedField<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DerivedField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt(f)
    }
}

impl<T: 'static> AnyField for DerivedField<T> {
    fn field_id(&self) -> &FieldId {
        &self.core.id
    }

    fn erased(&self) -> ErasedField {
        ErasedField {
            core: Rc::clone(&self.core),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::state::{Key, SliceSpec};

    #[test]
    fn reading_before_slice_exists_fails() {
        let key = Key::new("early", &[]);
        let count = key.field(1).unwrap();
        let other = Key::new("other", &[]).slice(SliceSpec::new()).unwrap();
        let state = StoreState::create(&[other]).unwrap();

        let err = count.get(&state).unwrap_err();
        assert!(matches!(err, Error::SliceNotCreated { .. }));
    }

    #[test]
    fn reading_unregistered_slice_fails() {
        let key = Key::new("missing", &[]);
        let count = key.field(1).unwrap();
        let _slice = key.slice(SliceSpec::new().field("count", &count)).unwrap();
        let state = StoreState::create(&[]).unwrap();

        let err = count.get(&state).unwrap_err();
        assert!(matches!(err, Error::SliceNotFound(_)));
    }

    #[test]
    fn update_with_applies_updater() {
        let key = Key::new("upd", &[]);
        let count = key.field(10).unwrap();
        let slice = key.slice(SliceSpec::new().field("count", &count)).unwrap();
        let state = StoreState::create(&[slice]).unwrap();

        let next = state.apply(&count.update_with(|c| c + 5)).unwrap();
        assert_eq!(*count.get(&next).unwrap(), 15);
        assert_eq!(*count.get(&state).unwrap(), 10);
    }

    #[test]
    fn default_equality_is_identity() {
        let key = Key::new("strict", &[]);
        let count = key.field(3).unwrap();
        let slice = key.slice(SliceSpec::new().field("count", &count)).unwrap();
        let state = StoreState::create(&[slice]).unwrap();

        let next = state.apply(&count.update(3)).unwrap();
        assert!(!next.ptr_eq(&state));
    }

    #[test]
    fn partial_eq_short_circuits_update() {
        let key = Key::new("loose", &[]);
        let count = key.field(3).unwrap().with_partial_eq();
        let slice = key.slice(SliceSpec::new().field("count", &count)).unwrap();
        let state = StoreState::create(&[slice]).unwrap();

        let next = state.apply(&count.update(3)).unwrap();
        assert!(next.ptr_eq(&state));
    }

    #[test]
    fn derived_is_computed_once_per_snapshot() {
        let calls = Rc::new(Cell::new(0));
        let key = Key::new("memo", &[]);
        let count = key.field(2).unwrap();
        let doubled = {
            let count = count.clone();
            let calls = Rc::clone(&calls);
            key.derive(move |state| {
                calls.set(calls.get() + 1);
                Ok(*count.get(state)? * 2)
            })
            .unwrap()
        };
        let slice = key
            .slice(SliceSpec::new().field("count", &count).field("doubled", &doubled))
            .unwrap();
        let state = StoreState::create(&[slice]).unwrap();

        assert_eq!(*doubled.get(&state).unwrap(), 4);
        assert_eq!(*doubled.get(&state).unwrap(), 4);
        assert_eq!(calls.get(), 1);

        let next = state.apply(&count.update(5)).unwrap();
        assert_eq!(*doubled.get(&next).unwrap(), 10);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn derived_reuses_equal_value_across_lineage() {
        let key = Key::new("stable", &[]);
        let items = key.field(vec![1, 2, 3]).unwrap();
        let unrelated = key.field(0).unwrap();
        let total = {
            let items = items.clone();
            key.derive(move |state| Ok(items.get(state)?.iter().sum::<i32>()))
                .unwrap()
                .with_partial_eq()
        };
        let slice = key
            .slice(
                SliceSpec::new()
                    .field("items", &items)
                    .field("unrelated", &unrelated)
                    .field("total", &total),
            )
            .unwrap();
        let s1 = StoreState::create(&[slice]).unwrap();
        let s2 = s1.apply(&unrelated.update(1)).unwrap();

        let a = total.get(&s1).unwrap();
        let b = total.get(&s2).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn wrong_type_is_reported() {
        let key = Key::new("typed", &[]);
        let count = key.field(1_u8).unwrap();
        let slice = key.slice(SliceSpec::new().field("count", &count)).unwrap();
        let state = StoreState::create(&[slice.clone()]).unwrap();

        let view = slice.get(&state).unwrap();
        assert!(matches!(
            view.get::<String>("count"),
            Err(Error::TypeMismatch(_))
        ));
    }
}
