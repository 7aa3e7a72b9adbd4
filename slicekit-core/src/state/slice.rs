//! Slices
//!
//! A slice is the externally visible handle of a key. It exposes a set of
//! named fields and reads them through a [`SliceView`].
//!
//! Views are accessor objects built from the name -> field table the slice
//! fixed at construction. Reading a name looks the value up (state fields)
//! or computes it (derived fields) on first access and caches it in the
//! view. One view cache exists per (slice, snapshot); it lives inside the
//! snapshot and is dropped with it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::ids::{FieldId, SliceId};
use crate::reactive::{EffectDecl, EffectStore};

use super::field::{downcast, AnyField, ErasedField, FieldCore, Value};
use super::store_state::StoreState;

/// Values already resolved by views of one slice in one snapshot.
pub(crate) type ViewCache = RefCell<HashMap<String, Value>>;

/// Names the fields a slice exposes.
#[derive(Debug, Default)]
pub struct SliceSpec {
    pub(crate) fields: IndexMap<String, ErasedField>,
}

impl SliceSpec {
    /// An empty spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `field` under `name`.
    pub fn field(mut self, name: &str, field: &impl AnyField) -> Self {
        self.fields.insert(name.to_string(), field.erased());
        self
    }
}

pub(crate) struct SliceInner {
    id: SliceId,
    name: String,
    dependencies: Vec<Slice>,
    exposed: IndexMap<String, Rc<FieldCore>>,
    initial: IndexMap<FieldId, Value>,
    effects: Vec<EffectDecl>,
}

/// Handle to a partition of the store state.
#[derive(Clone)]
pub struct Slice {
    inner: Rc<SliceInner>,
}

impl Slice {
    pub(crate) fn new(
        id: SliceId,
        name: String,
        dependencies: Vec<Slice>,
        exposed: IndexMap<String, Rc<FieldCore>>,
        initial: IndexMap<FieldId, Value>,
        effects: Vec<EffectDecl>,
    ) -> Self {
        Self {
            inner: Rc::new(SliceInner {
                id,
                name,
                dependencies,
                exposed,
                initial,
                effects,
            }),
        }
    }

    /// The slice id.
    pub fn id(&self) -> &SliceId {
        &self.inner.id
    }

    /// The slice name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Slices this slice depends on.
    pub fn dependencies(&self) -> &[Slice] {
        &self.inner.dependencies
    }

    /// Names of the exposed fields, in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.inner.exposed.keys().map(String::as_str)
    }

    pub(crate) fn exposed(&self, name: &str) -> Result<&Rc<FieldCore>> {
        self.inner
            .exposed
            .get(name)
            .ok_or_else(|| Error::UnknownFieldName {
                slice: self.inner.id.clone(),
                name: name.to_string(),
            })
    }

    pub(crate) fn initial_values(&self) -> &IndexMap<FieldId, Value> {
        &self.inner.initial
    }

    pub(crate) fn effects(&self) -> &[EffectDecl] {
        &self.inner.effects
    }

    pub(crate) fn downgrade(&self) -> Weak<SliceInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn as_ptr(&self) -> *const SliceInner {
        Rc::as_ptr(&self.inner)
    }

    /// The slice's view of `state`.
    ///
    /// Repeated calls with the same snapshot share one cache.
    pub fn get(&self, state: &StoreState) -> Result<SliceView> {
        let values = state.view_cache(&self.inner.id)?;
        Ok(SliceView {
            slice: self.clone(),
            state: state.clone(),
            values,
            tracker: None,
        })
    }

    /// A view of the effect's current state whose reads are tracked.
    pub fn track(&self, store: &EffectStore) -> Result<SliceView> {
        let mut view = self.get(&store.state())?;
        view.tracker = Some(store.clone());
        Ok(view)
    }
}

impl PartialEq for Slice {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Slice {}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slice")
            .field("id", &self.inner.id)
            .field("fields", &self.inner.exposed.keys().collect::<Vec<_>>())
            .field(
                "dependencies",
                &self.inner.dependencies.iter().map(Slice::id).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Lazily evaluated accessor over one slice in one snapshot.
///
/// Reads go by exposed name and downcast at runtime. For reads checked at
/// compile time, use [`StateField::get`](crate::StateField::get) and
/// [`DerivedField::get`](crate::DerivedField::get) on the field handles.
pub struct SliceView {
    slice: Slice,
    state: StoreState,
    values: Rc<ViewCache>,
    tracker: Option<EffectStore>,
}

impl SliceView {
    /// Read the field exposed as `name`.
    pub fn get<T: 'static>(&self, name: &str) -> Result<Rc<T>> {
        let field = self.slice.exposed(name)?;

        let cached = self.values.borrow().get(name).cloned();
        let value = match cached {
            Some(value) => value,
            None => {
                let value = field.read(&self.state)?;
                self.values
                    .borrow_mut()
                    .insert(name.to_string(), Rc::clone(&value));
                value
            }
        };

        if let Some(store) = &self.tracker {
            store.record(Rc::clone(field), Rc::clone(&value));
        }
        downcast(value, &field.id)
    }

    /// The snapshot this view reads.
    pub fn state(&self) -> &StoreState {
        &self.state
    }

    /// The slice this view reads.
    pub fn slice(&self) -> &Slice {
        &self.slice
    }

    /// Whether both views share one cache, i.e. same slice and snapshot.
    pub fn ptr_eq(&self, other: &SliceView) -> bool {
        Rc::ptr_eq(&self.values, &other.values)
    }
}

impl fmt::Debug for SliceView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceView")
            .field("slice", self.slice.id())
            .field("snapshot", &self.state.sequence())
            .field("tracked", &self.tracker.is_some())
            .finish()
    }
}
