//! Run Contexts
//!
//! User callbacks receive a context object instead of the store itself:
//!
//! - an [`EffectStore`] for one run of an effect; reads tracked through it
//!   become the effect's dependencies for that run
//! - an [`OperationStore`] for one dispatched operation
//!
//! Both can register cleanups. [`CleanupTarget`] is the tagged union over
//! the two kinds; [`cleanup`] dispatches on it.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::{BoxError, Result};
use crate::state::{FieldCore, StoreState, Value};
use crate::store::{Dispatchable, Store};

use super::effect::Effect;

/// A deferred teardown callback.
pub type Cleanup = Box<dyn FnOnce() -> std::result::Result<(), BoxError>>;

/// Run every cleanup, reporting failures one by one.
pub(crate) fn run_cleanups(cleanups: Vec<Cleanup>, owner: &str) {
    for cleanup in cleanups {
        match catch_unwind(AssertUnwindSafe(cleanup)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(owner, "cleanup failed: {err}"),
            Err(panic) => {
                tracing::warn!(owner, "cleanup panicked: {}", panic_message(&*panic))
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ----------------------------------------------------------------------------
// Effect context
// ----------------------------------------------------------------------------

/// Context handed to one effect run.
#[derive(Clone)]
pub struct EffectStore {
    store: Store,
    effect: Rc<Effect>,
    run: u64,
}

impl EffectStore {
    pub(crate) fn new(store: Store, effect: Rc<Effect>, run: u64) -> Self {
        Self { store, effect, run }
    }

    /// The store's current state.
    pub fn state(&self) -> StoreState {
        self.store.state()
    }

    /// Dispatch on the owning store, recording the effect as dispatcher.
    pub fn dispatch(&self, item: impl Into<Dispatchable>) -> Result<()> {
        self.store.dispatch_from(item.into(), Some(self.effect.name()))
    }

    /// The effect's name.
    pub fn name(&self) -> &str {
        self.effect.name()
    }

    /// Which run this context belongs to, starting at 1.
    pub fn run(&self) -> u64 {
        self.run
    }

    /// Store-wide configuration.
    pub fn config(&self) -> &serde_json::Map<String, serde_json::Value> {
        self.store.config()
    }

    /// Register `callback` to run before the next run or on destroy.
    pub fn cleanup<F>(&self, callback: F)
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + 'static,
    {
        cleanup(self, callback);
    }

    /// Record a tracked read. Reads through a context of an earlier run are
    /// ignored.
    pub(crate) fn record(&self, field: Rc<FieldCore>, value: Value) {
        if self.effect.run_count() == self.run {
            self.effect.record(field, value);
        }
    }
}

impl fmt::Debug for EffectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectStore")
            .field("effect", &self.effect.name())
            .field("run", &self.run)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Operation context
// ----------------------------------------------------------------------------

/// Context handed to a dispatched operation.
#[derive(Clone)]
pub struct OperationStore {
    store: Store,
    name: String,
}

impl OperationStore {
    pub(crate) fn new(store: Store, name: String) -> Self {
        Self { store, name }
    }

    pub fn state(&self) -> StoreState {
        self.store.state()
    }

    /// Dispatch on the owning store, recording the operation as dispatcher.
    pub fn dispatch(&self, item: impl Into<Dispatchable>) -> Result<()> {
        self.store.dispatch_from(item.into(), Some(&self.name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &serde_json::Map<String, serde_json::Value> {
        self.store.config()
    }

    /// Register `callback` to run when the store is destroyed.
    pub fn cleanup<F>(&self, callback: F)
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + 'static,
    {
        cleanup(self, callback);
    }
}

impl fmt::Debug for OperationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationStore")
            .field("name", &self.name)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Cleanup targets
// ----------------------------------------------------------------------------

/// Where a cleanup is attached.
#[derive(Debug, Clone, Copy)]
pub enum CleanupTarget<'a> {
    Effect(&'a EffectStore),
    Operation(&'a OperationStore),
}

impl<'a> From<&'a EffectStore> for CleanupTarget<'a> {
    fn from(store: &'a EffectStore) -> Self {
        CleanupTarget::Effect(store)
    }
}

impl<'a> From<&'a OperationStore> for CleanupTarget<'a> {
    fn from(store: &'a OperationStore) -> Self {
        CleanupTarget::Operation(store)
    }
}

/// Attach `callback` to an effect or operation context.
///
/// Effect cleanups run before the effect's next run and when it is
/// destroyed; operation cleanups run when the store is destroyed. If the
/// owner is already destroyed the callback runs immediately.
pub fn cleanup<'a, F>(target: impl Into<CleanupTarget<'a>>, callback: F)
where
    F: FnOnce() -> std::result::Result<(), BoxError> + 'static,
{
    match target.into() {
        CleanupTarget::Effect(store) => store.effect.add_cleanup(Box::new(callback)),
        CleanupTarget::Operation(store) => store.store.add_cleanup(Box::new(callback)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn failing_cleanup_does_not_block_the_rest() {
        let ran = Rc::new(Cell::new(0));
        let a = Rc::clone(&ran);
        let b = Rc::clone(&ran);

        let mut cleanups: Vec<Cleanup> = Vec::new();
        cleanups.push(Box::new(|| -> std::result::Result<(), BoxError> {
            Err("boom".into())
        }));
        cleanups.push(Box::new(move || -> std::result::Result<(), BoxError> {
            a.set(a.get() + 1);
            Ok(())
        }));
        cleanups.push(Box::new(|| -> std::result::Result<(), BoxError> {
            panic!("cleanup panic")
        }));
        cleanups.push(Box::new(move || -> std::result::Result<(), BoxError> {
            b.set(b.get() + 1);
            Ok(())
        }));
        run_cleanups(cleanups, "test");

        assert_eq!(ran.get(), 2);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let panic = catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(&*panic), "static message");

        let panic = catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(&*panic), "formatted 42");
    }
}
