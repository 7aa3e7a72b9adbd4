//! Keys
//!
//! A key is the construction-time namespace of a slice. Fields and effects
//! are declared on the key; the key then produces exactly one [`Slice`].
//! After that the key is sealed and rejects further declarations.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::ids::{FieldId, IdGenerator, SliceId};
use crate::reactive::{EffectCallback, EffectDecl, EffectOptions, EffectResult, EffectStore};

use super::field::{DerivedField, FieldCore, FieldKind, StateField, Value};
use super::slice::{Slice, SliceSpec};
use super::store_state::StoreState;

/// The part of a key every field of it can see.
pub(crate) struct KeyShared {
    pub(crate) name: String,
    pub(crate) slice_id: SliceId,
    created: Cell<bool>,
}

impl KeyShared {
    pub(crate) fn is_created(&self) -> bool {
        self.created.get()
    }
}

#[derive(Default)]
struct Registry {
    fields: IndexMap<FieldId, Rc<FieldCore>>,
    effects: Vec<EffectDecl>,
}

struct KeyInner {
    shared: Rc<KeyShared>,
    dependencies: Vec<Slice>,
    ids: IdGenerator,
    registry: RefCell<Registry>,
}

/// Per-slice namespace owning field and effect declarations.
#[derive(Clone)]
pub struct Key {
    inner: Rc<KeyInner>,
}

impl Key {
    /// Create a key for a slice named `name` depending on `dependencies`.
    pub fn new(name: &str, dependencies: &[Slice]) -> Self {
        Self::with_ids(IdGenerator::global(), name, dependencies)
    }

    /// Like [`Key::new`], drawing ids from `ids`.
    pub fn with_ids(ids: IdGenerator, name: &str, dependencies: &[Slice]) -> Self {
        let shared = Rc::new(KeyShared {
            name: name.to_string(),
            slice_id: SliceId::generate(&ids, name),
            created: Cell::new(false),
        });

        Self {
            inner: Rc::new(KeyInner {
                shared,
                dependencies: dependencies.to_vec(),
                ids,
                registry: RefCell::new(Registry::default()),
            }),
        }
    }

    /// The slice name.
    pub fn name(&self) -> &str {
        &self.inner.shared.name
    }

    /// Id the key's slice will carry.
    pub fn slice_id(&self) -> &SliceId {
        &self.inner.shared.slice_id
    }

    /// Slices this key's slice depends on.
    pub fn dependencies(&self) -> &[Slice] {
        &self.inner.dependencies
    }

    /// Whether the key already produced its slice.
    pub fn is_sealed(&self) -> bool {
        self.inner.shared.is_created()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::KeySealed(self.slice_id().clone()));
        }
        Ok(())
    }

    fn register(&self, kind: FieldKind) -> Rc<FieldCore> {
        let id = FieldId::generate(&self.inner.ids, self.name());
        let core = Rc::new(FieldCore::new(
            id.clone(),
            Rc::clone(&self.inner.shared),
            kind,
        ));
        self.inner
            .registry
            .borrow_mut()
            .fields
            .insert(id, Rc::clone(&core));
        core
    }

    /// Declare a state field with an initial value.
    pub fn field<T: 'static>(&self, initial: T) -> Result<StateField<T>> {
        self.ensure_open()?;
        let initial: Value = Rc::new(initial);
        Ok(StateField::from_core(self.register(FieldKind::State { initial })))
    }

    /// Declare a derived field computed from the store state.
    pub fn derive<T, F>(&self, compute: F) -> Result<DerivedField<T>>
    where
        T: 'static,
        F: Fn(&StoreState) -> Result<T> + 'static,
    {
        self.ensure_open()?;
        let compute = Rc::new(move |state: &StoreState| -> Result<Value> {
            let value: Value = Rc::new(compute(state)?);
            Ok(value)
        });
        Ok(DerivedField::from_core(
            self.register(FieldKind::Derived { compute }),
        ))
    }

    /// Declare an effect registered with every store that includes the slice.
    pub fn effect<F>(&self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(&EffectStore) -> EffectResult + 'static,
    {
        self.effect_with(callback, EffectOptions::named(name))
    }

    /// Declare an effect with explicit options.
    pub fn effect_with<F>(&self, callback: F, options: EffectOptions) -> Result<()>
    where
        F: Fn(&EffectStore) -> EffectResult + 'static,
    {
        self.ensure_open()?;
        let callback: EffectCallback = Rc::new(callback);
        self.inner
            .registry
            .borrow_mut()
            .effects
            .push(EffectDecl { callback, options });
        Ok(())
    }

    /// Produce the key's slice, exposing the fields named in `spec`.
    ///
    /// Fails if the key already produced a slice or if `spec` exposes a
    /// field declared on another key.
    pub fn slice(&self, spec: SliceSpec) -> Result<Slice> {
        let shared = &self.inner.shared;
        if shared.is_created() {
            return Err(Error::SliceAlreadyCreated(shared.slice_id.clone()));
        }

        let registry = self.inner.registry.borrow();
        let mut exposed = IndexMap::with_capacity(spec.fields.len());
        for (name, field) in spec.fields {
            let owned = registry
                .fields
                .get(&field.core.id)
                .is_some_and(|core| Rc::ptr_eq(core, &field.core));
            if !owned {
                return Err(Error::ForeignField {
                    slice: shared.slice_id.clone(),
                    field: field.core.id.clone(),
                });
            }
            exposed.insert(name, field.core);
        }

        let initial = registry
            .fields
            .iter()
            .filter_map(|(id, core)| match &core.kind {
                FieldKind::State { initial } => Some((id.clone(), Rc::clone(initial))),
                FieldKind::Derived { .. } => None,
            })
            .collect();

        shared.created.set(true);
        tracing::debug!(slice = %shared.slice_id, fields = registry.fields.len(), "slice created");

        Ok(Slice::new(
            shared.slice_id.clone(),
            shared.name.clone(),
            self.inner.dependencies.clone(),
            exposed,
            initial,
            registry.effects.clone(),
        ))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("slice_id", self.slice_id())
            .field("sealed", &self.is_sealed())
            .field("fields", &self.inner.registry.borrow().fields.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_slice_fails() {
        let key = Key::new("once", &[]);
        key.slice(SliceSpec::new()).unwrap();

        let err = key.slice(SliceSpec::new()).unwrap_err();
        assert!(matches!(err, Error::SliceAlreadyCreated(id) if id == *key.slice_id()));
    }

    #[test]
    fn sealed_key_rejects_declarations() {
        let key = Key::new("sealed", &[]);
        key.slice(SliceSpec::new()).unwrap();

        assert!(key.is_sealed());
        assert!(matches!(key.field(1), Err(Error::KeySealed(_))));
        assert!(matches!(
            key.derive(|_| Ok(1)),
            Err(Error::KeySealed(_))
        ));
        assert!(matches!(
            key.effect("late", |_| Ok(())),
            Err(Error::KeySealed(_))
        ));
    }

    #[test]
    fn foreign_field_is_rejected() {
        let a = Key::new("a", &[]);
        let b = Key::new("b", &[]);
        let from_a = a.field(0).unwrap();

        let err = b.slice(SliceSpec::new().field("x", &from_a)).unwrap_err();
        assert!(matches!(err, Error::ForeignField { .. }));
        assert!(!b.is_sealed());
    }

    #[test]
    fn ids_come_from_injected_generator() {
        let ids = IdGenerator::new();
        let key = Key::with_ids(ids.clone(), "todos", &[]);
        let field = key.field(Vec::<String>::new()).unwrap();

        assert_eq!(key.slice_id().as_str(), "sl_todos");
        assert_eq!(field.id().as_str(), "f_todos");
        assert_eq!(key.field(0).unwrap().id().as_str(), "f_todos$1");
    }
}
