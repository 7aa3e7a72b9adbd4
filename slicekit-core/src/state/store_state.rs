//! Store State
//!
//! A [`StoreState`] is an immutable snapshot of every slice's field values.
//! Snapshots are only produced by [`StoreState::create`] and
//! [`StoreState::apply`]; old snapshots stay valid forever.
//!
//! # Structural Sharing
//!
//! Each slice's values live in a `SliceStateManager`. Applying a
//! transaction replaces only the managers whose values changed; everything
//! else is shared with the previous snapshot. Change detection between two
//! snapshots is a pointer comparison per slice.
//!
//! # Lineage
//!
//! All snapshots descending from one `create` share a lineage. It issues
//! snapshot sequence numbers and remembers the last value of every derived
//! field, which is what keeps derived values reference-stable across
//! snapshots.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::ids::{FieldId, SliceId};

use super::field::{ErasedCompute, FieldCore, Value};
use super::slice::{Slice, SliceInner, ViewCache};
use super::slice_state::SliceStateManager;
use super::transaction::Transaction;

/// Initial values replacing the key-declared ones, by slice id and exposed
/// field name.
#[derive(Clone, Default)]
pub struct StateOverride {
    values: HashMap<SliceId, Vec<(String, Value)>>,
}

impl StateOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `slice`'s field `name` at `value`.
    pub fn set<T: 'static>(mut self, slice: &SliceId, name: &str, value: T) -> Self {
        self.values
            .entry(slice.clone())
            .or_default()
            .push((name.to_string(), Rc::new(value)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for StateOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.values
                    .iter()
                    .map(|(slice, fields)| (slice, fields.iter().map(|(n, _)| n).collect::<Vec<_>>())),
            )
            .finish()
    }
}

/// The validated slice list, shared by a whole lineage.
struct SliceRegistry {
    slices: Vec<Slice>,
    lookup: IndexMap<SliceId, Slice>,
    graph: Rc<DependencyGraph>,
}

/// A graph built for one slice list, identified by slice pointers.
struct CachedGraph {
    slices: Vec<Weak<SliceInner>>,
    graph: Rc<DependencyGraph>,
}

impl CachedGraph {
    fn is_live(&self) -> bool {
        self.slices.iter().all(|slice| slice.strong_count() > 0)
    }

    fn matches(&self, slices: &[Slice]) -> bool {
        self.slices.len() == slices.len()
            && self
                .slices
                .iter()
                .zip(slices)
                .all(|(cached, slice)| std::ptr::eq(cached.as_ptr(), slice.as_ptr()))
    }
}

thread_local! {
    static GRAPHS: RefCell<Vec<CachedGraph>> = const { RefCell::new(Vec::new()) };
}

/// The dependency graph of `slices`, shared by every snapshot created from
/// the same slice list while those slices are alive.
fn dependency_graph(slices: &[Slice]) -> Result<Rc<DependencyGraph>> {
    let cached = GRAPHS.with(|graphs| {
        let mut graphs = graphs.borrow_mut();
        graphs.retain(CachedGraph::is_live);
        graphs
            .iter()
            .find(|entry| entry.matches(slices))
            .map(|entry| Rc::clone(&entry.graph))
    });
    if let Some(graph) = cached {
        return Ok(graph);
    }

    let graph = Rc::new(DependencyGraph::new(slices.iter().map(|slice| {
        (
            slice.id().clone(),
            slice.dependencies().iter().map(|d| d.id().clone()).collect(),
        )
    }))?);
    tracing::trace!(slices = slices.len(), "dependency graph built");
    GRAPHS.with(|graphs| {
        graphs.borrow_mut().push(CachedGraph {
            slices: slices.iter().map(Slice::downgrade).collect(),
            graph: Rc::clone(&graph),
        })
    });
    Ok(graph)
}

#[derive(Default)]
struct Lineage {
    next_sequence: Cell<u64>,
    derived: RefCell<HashMap<FieldId, Value>>,
}

impl Lineage {
    fn next_sequence(&self) -> u64 {
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence + 1);
        sequence
    }

    /// Swap `fresh` for the previously remembered value when they are equal.
    fn stabilize(&self, field: &FieldCore, fresh: Value) -> Value {
        let previous = self.derived.borrow().get(&field.id).cloned();
        if let Some(previous) = previous {
            if field.is_equal(&previous, &fresh) {
                return previous;
            }
        }
        self.derived
            .borrow_mut()
            .insert(field.id.clone(), Rc::clone(&fresh));
        fresh
    }
}

struct StateInner {
    sequence: u64,
    registry: Rc<SliceRegistry>,
    managers: IndexMap<SliceId, SliceStateManager>,
    lineage: Rc<Lineage>,

    /// Derived values computed against this snapshot.
    derived: RefCell<HashMap<FieldId, Value>>,

    /// Slice view caches for this snapshot.
    views: RefCell<HashMap<SliceId, Rc<ViewCache>>>,
}

/// Immutable snapshot of all slice states.
#[derive(Clone)]
pub struct StoreState {
    inner: Rc<StateInner>,
}

impl StoreState {
    /// Build the initial snapshot for `slices`.
    pub fn create(slices: &[Slice]) -> Result<Self> {
        Self::create_with(slices, &StateOverride::default())
    }

    /// Build the initial snapshot, starting overridden fields at the given
    /// values.
    ///
    /// The slice list must have unique ids, and every dependency must appear
    /// earlier in the list than the slices depending on it.
    pub fn create_with(slices: &[Slice], overrides: &StateOverride) -> Result<Self> {
        let lookup = validate(slices)?;
        let graph = dependency_graph(slices)?;

        for slice_id in overrides.values.keys() {
            if !lookup.contains_key(slice_id) {
                return Err(Error::SliceNotFound(slice_id.clone()));
            }
        }

        let mut managers = IndexMap::with_capacity(slices.len());
        for slice in slices {
            let mut values: HashMap<FieldId, Value> = slice
                .initial_values()
                .iter()
                .map(|(id, value)| (id.clone(), Rc::clone(value)))
                .collect();

            if let Some(fields) = overrides.values.get(slice.id()) {
                for (name, value) in fields {
                    let field = slice.exposed(name)?;
                    if field.is_derived() {
                        return Err(Error::DerivedOverride {
                            slice: slice.id().clone(),
                            field: field.id.clone(),
                        });
                    }
                    values.insert(field.id.clone(), Rc::clone(value));
                }
            }

            managers.insert(
                slice.id().clone(),
                SliceStateManager::new(slice.id().clone(), values),
            );
        }

        let lineage = Rc::new(Lineage::default());
        tracing::debug!(slices = slices.len(), "store state created");

        Ok(Self {
            inner: Rc::new(StateInner {
                sequence: lineage.next_sequence(),
                registry: Rc::new(SliceRegistry {
                    slices: slices.to_vec(),
                    lookup,
                    graph,
                }),
                managers,
                lineage,
                derived: RefCell::new(HashMap::new()),
                views: RefCell::new(HashMap::new()),
            }),
        })
    }

    /// Apply `tx`, returning the resulting snapshot.
    ///
    /// Steps run in order. When no step replaced any slice's values, the
    /// result is this very snapshot.
    pub fn apply(&self, tx: &Transaction) -> Result<StoreState> {
        let steps = tx.take_steps()?;
        tracing::trace!(tx = %tx.id(), steps = steps.len(), "applying transaction");

        let mut state = self.clone();
        for step in steps {
            state = step(&state)?;
        }

        if state.ptr_eq(self) || state.same_managers(self) {
            return Ok(self.clone());
        }
        Ok(state)
    }

    /// Slices whose values differ between `self` and `other`.
    pub fn changed_slices(&self, other: &StoreState) -> Vec<SliceId> {
        self.inner
            .managers
            .iter()
            .filter(|(id, manager)| {
                other
                    .inner
                    .managers
                    .get(*id)
                    .map_or(true, |theirs| !manager.ptr_eq(theirs))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The slices of this lineage, in dependency order.
    pub fn slices(&self) -> &[Slice] {
        &self.inner.registry.slices
    }

    pub fn slice(&self, id: &SliceId) -> Option<&Slice> {
        self.inner.registry.lookup.get(id)
    }

    /// Dependency graph of the slice list.
    pub fn graph(&self) -> &DependencyGraph {
        self.inner.registry.graph.as_ref()
    }

    /// Sequence number of this snapshot within its lineage.
    pub fn sequence(&self) -> u64 {
        self.inner.sequence
    }

    /// Whether both handles point at the same snapshot.
    pub fn ptr_eq(&self, other: &StoreState) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn same_managers(&self, other: &StoreState) -> bool {
        Rc::ptr_eq(&self.inner.registry, &other.inner.registry)
            && self
                .inner
                .managers
                .values()
                .zip(other.inner.managers.values())
                .all(|(a, b)| a.ptr_eq(b))
    }

    pub(crate) fn slice_state(&self, id: &SliceId) -> Result<&SliceStateManager> {
        self.inner
            .managers
            .get(id)
            .ok_or_else(|| Error::SliceNotFound(id.clone()))
    }

    /// Snapshot with `field` set to `value`, or `self` if nothing changed.
    pub(crate) fn update_field(&self, field: &FieldCore, value: Value) -> Result<StoreState> {
        let current = self.slice_state(field.slice_id())?;
        let next = current.update_field(field, value)?;
        if next.ptr_eq(current) {
            return Ok(self.clone());
        }

        let mut managers = self.inner.managers.clone();
        managers.insert(field.slice_id().clone(), next);

        Ok(Self {
            inner: Rc::new(StateInner {
                sequence: self.inner.lineage.next_sequence(),
                registry: Rc::clone(&self.inner.registry),
                managers,
                lineage: Rc::clone(&self.inner.lineage),
                derived: RefCell::new(HashMap::new()),
                views: RefCell::new(HashMap::new()),
            }),
        })
    }

    pub(crate) fn derived_value(&self, field: &FieldCore, compute: &ErasedCompute) -> Result<Value> {
        self.slice_state(field.slice_id())?;

        let cached = self.inner.derived.borrow().get(&field.id).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }

        let fresh = compute(self)?;
        let value = self.inner.lineage.stabilize(field, fresh);
        self.inner
            .derived
            .borrow_mut()
            .insert(field.id.clone(), Rc::clone(&value));
        Ok(value)
    }

    pub(crate) fn view_cache(&self, slice: &SliceId) -> Result<Rc<ViewCache>> {
        self.slice_state(slice)?;
        let mut views = self.inner.views.borrow_mut();
        Ok(Rc::clone(views.entry(slice.clone()).or_default()))
    }
}

fn validate(slices: &[Slice]) -> Result<IndexMap<SliceId, Slice>> {
    let mut seen: IndexMap<SliceId, Slice> = IndexMap::with_capacity(slices.len());

    for slice in slices {
        if seen.contains_key(slice.id()) {
            return Err(Error::DuplicateSlice(slice.id().clone()));
        }

        for dep in slice.dependencies() {
            if seen.contains_key(dep.id()) {
                continue;
            }
            let later = slices.iter().any(|s| s.id() == dep.id());
            return Err(if later {
                Error::DependencyOutOfOrder {
                    slice: slice.id().clone(),
                    dependency: dep.id().clone(),
                }
            } else {
                Error::MissingDependency {
                    slice: slice.id().clone(),
                    dependency: dep.id().clone(),
                }
            });
        }

        seen.insert(slice.id().clone(), slice.clone());
    }

    Ok(seen)
}

impl fmt::Debug for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreState")
            .field("sequence", &self.inner.sequence)
            .field(
                "slices",
                &self
                    .inner
                    .managers
                    .iter()
                    .map(|(id, manager)| (id, manager.len()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
