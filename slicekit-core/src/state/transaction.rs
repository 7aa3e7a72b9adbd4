//! Transactions
//!
//! A transaction is an ordered list of pure `StoreState -> StoreState`
//! steps. It can be applied exactly once; a second `apply`, on any state,
//! fails with [`Error::TransactionAlreadyApplied`].
//!
//! Transactions carry provenance: the slice that produced them, an action
//! name, and a string-keyed [`Metadata`] bag the store fills in on dispatch.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::{IdGenerator, SliceId, TransactionId};

use super::store_state::StoreState;

/// Metadata key holding the dispatching store's name.
pub const META_STORE: &str = "store";

/// Metadata key holding the name of the effect or operation that dispatched.
pub const META_DISPATCHER: &str = "dispatcher";

/// String-keyed provenance bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set `key`, replacing any previous value.
    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    /// Append `value` to `key`, comma separated.
    pub fn append(&mut self, key: &str, value: &str) {
        self.entries
            .entry(key.to_string())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    /// An independent copy.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One state transformation.
pub type Step = Box<dyn FnOnce(&StoreState) -> Result<StoreState>>;

struct TxInner {
    id: TransactionId,
    action: String,
    source: RefCell<Option<SliceId>>,
    steps: RefCell<Vec<Step>>,
    applied: Cell<bool>,
    metadata: RefCell<Metadata>,
}

/// Single-use, ordered list of state transformations.
///
/// Cloning shares the transaction, including its applied flag.
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<TxInner>,
}

impl Transaction {
    /// An empty transaction for `action`.
    pub fn new(action: &str) -> Self {
        Self::with_ids(&IdGenerator::global(), action)
    }

    /// Like [`Transaction::new`], drawing the id from `ids`.
    pub fn with_ids(ids: &IdGenerator, action: &str) -> Self {
        Self {
            inner: Rc::new(TxInner {
                id: TransactionId::generate(ids, action),
                action: action.to_string(),
                source: RefCell::new(None),
                steps: RefCell::new(Vec::new()),
                applied: Cell::new(false),
                metadata: RefCell::new(Metadata::new()),
            }),
        }
    }

    pub fn id(&self) -> &TransactionId {
        &self.inner.id
    }

    pub fn action(&self) -> &str {
        &self.inner.action
    }

    /// Slice that produced the transaction, if any.
    pub fn source_slice(&self) -> Option<SliceId> {
        self.inner.source.borrow().clone()
    }

    /// Record the slice that produced the transaction.
    pub fn with_source(self, slice: &SliceId) -> Self {
        *self.inner.source.borrow_mut() = Some(slice.clone());
        self
    }

    /// Append a step.
    pub fn step<F>(self, step: F) -> Self
    where
        F: FnOnce(&StoreState) -> Result<StoreState> + 'static,
    {
        self.push_step(step);
        self
    }

    /// Append a step through a shared reference.
    pub fn push_step<F>(&self, step: F)
    where
        F: FnOnce(&StoreState) -> Result<StoreState> + 'static,
    {
        self.inner.steps.borrow_mut().push(Box::new(step));
    }

    /// Append a step applying `other`. `other` is consumed when this
    /// transaction is applied, not before.
    pub fn then(self, other: Transaction) -> Self {
        self.step(move |state| state.apply(&other))
    }

    /// Number of steps not yet applied.
    pub fn len(&self) -> usize {
        self.inner.steps.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the transaction was applied.
    pub fn is_applied(&self) -> bool {
        self.inner.applied.get()
    }

    /// A copy of the metadata bag.
    pub fn metadata(&self) -> Metadata {
        self.inner.metadata.borrow().clone()
    }

    pub fn set_metadata(&self, key: &str, value: &str) {
        self.inner.metadata.borrow_mut().set(key, value);
    }

    pub fn append_metadata(&self, key: &str, value: &str) {
        self.inner.metadata.borrow_mut().append(key, value);
    }

    /// Mark the transaction applied and hand out its steps.
    pub(crate) fn take_steps(&self) -> Result<Vec<Step>> {
        if self.inner.applied.replace(true) {
            return Err(Error::TransactionAlreadyApplied(self.inner.id.clone()));
        }
        Ok(self.inner.steps.take())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source.borrow())
            .field("steps", &self.len())
            .field("applied", &self.is_applied())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Key, SliceSpec};

    fn counter_state() -> (crate::state::StateField<i32>, StoreState) {
        let key = Key::new("tx", &[]);
        let count = key.field(0).unwrap();
        let slice = key.slice(SliceSpec::new().field("count", &count)).unwrap();
        (count, StoreState::create(&[slice]).unwrap())
    }

    #[test]
    fn second_apply_fails_with_id() {
        let (count, state) = counter_state();
        let tx = count.update(1);
        let next = state.apply(&tx).unwrap();

        let err = next.apply(&tx).unwrap_err();
        assert!(matches!(&err, Error::TransactionAlreadyApplied(id) if id == tx.id()));

        let err = state.apply(&tx).unwrap_err();
        assert!(err.to_string().contains(tx.id().as_str()));
    }

    #[test]
    fn steps_run_in_order() {
        let (count, state) = counter_state();
        let tx = Transaction::new("chain")
            .then(count.update_with(|c| c + 1))
            .then(count.update_with(|c| c * 10));

        let next = state.apply(&tx).unwrap();
        assert_eq!(*count.get(&next).unwrap(), 10);
    }

    #[test]
    fn nested_transaction_obeys_once_rule() {
        let (count, state) = counter_state();
        let inner = count.update(5);
        let first = Transaction::new("first").then(inner.clone());
        let second = Transaction::new("second").then(inner);

        state.apply(&first).unwrap();
        assert!(matches!(
            state.apply(&second),
            Err(Error::TransactionAlreadyApplied(_))
        ));
    }

    #[test]
    fn empty_transaction_returns_same_state() {
        let (_, state) = counter_state();
        let next = state.apply(&Transaction::new("noop")).unwrap();
        assert!(next.ptr_eq(&state));
    }

    #[test]
    fn metadata_appends_and_forks() {
        let mut meta = Metadata::new();
        meta.append("origin", "a");
        meta.append("origin", "b");
        let fork = meta.fork();
        meta.set("origin", "c");

        assert_eq!(fork.get("origin"), Some("a,b"));
        assert_eq!(meta.get("origin"), Some("c"));
    }

    #[test]
    fn update_records_source_slice() {
        let (count, _) = counter_state();
        let tx = count.update(1);
        assert_eq!(tx.source_slice().as_ref(), Some(count.slice_id()));
        assert_eq!(tx.action(), "update");
        assert_eq!(tx.len(), 1);
    }
}
