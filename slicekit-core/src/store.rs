//! The store: current snapshot, dispatch pipeline and effects.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::config::StoreOptions;
use crate::debug::{DebugCallback, DebugEvent};
use crate::error::{BoxError, Error, Result};
use crate::ids::{EffectId, IdGenerator};
use crate::reactive::{
    Cleanup, Effect, EffectCallback, EffectHandle, EffectManager, EffectOptions, EffectResult,
    EffectStore, ManualScheduler, OperationStore, RunReason, Scheduler,
};
use crate::state::{StoreState, Transaction, META_DISPATCHER, META_STORE};

/// Intercepts dispatched transactions. Receives the store, the function
/// applying a transaction locally, and the transaction.
pub type DispatchHook = Rc<dyn Fn(&Store, &dyn Fn(Transaction) -> Result<()>, Transaction) -> Result<()>>;

type OperationFn = Box<dyn FnOnce(&OperationStore) -> std::result::Result<(), BoxError>>;

/// A named callback run synchronously when dispatched.
pub struct Operation {
    name: String,
    run: OperationFn,
}

impl Operation {
    pub fn new<F>(name: &str, run: F) -> Self
    where
        F: FnOnce(&OperationStore) -> std::result::Result<(), BoxError> + 'static,
    {
        Self {
            name: name.to_string(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").field("name", &self.name).finish()
    }
}

/// Anything [`Store::dispatch`] accepts.
#[derive(Debug)]
pub enum Dispatchable {
    Transaction(Transaction),
    Operation(Operation),
}

impl From<Transaction> for Dispatchable {
    fn from(tx: Transaction) -> Self {
        Dispatchable::Transaction(tx)
    }
}

impl From<Operation> for Dispatchable {
    fn from(op: Operation) -> Self {
        Dispatchable::Operation(op)
    }
}

pub(crate) struct StoreInner {
    name: Option<String>,
    state: RefCell<StoreState>,
    effects: EffectManager,
    /// Queue used when no scheduler was configured.
    default_queue: Option<ManualScheduler>,
    debug: Option<DebugCallback>,
    config: serde_json::Map<String, serde_json::Value>,
    dispatch_hook: Option<DispatchHook>,
    operation_cleanups: RefCell<Vec<Cleanup>>,
    destroyed: Cell<bool>,
    ids: IdGenerator,
}

impl StoreInner {
    fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<unnamed>".to_string())
    }

    fn teardown(&self) {
        self.effects.destroy();
        let cleanups = std::mem::take(&mut *self.operation_cleanups.borrow_mut());
        crate::reactive::run_cleanups(cleanups, &self.label());
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if !self.destroyed.replace(true) {
            self.teardown();
        }
    }
}

/// Holds the current [`StoreState`] and runs effects against it.
///
/// Cloning a store clones a handle; all clones share state and effects.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    /// Create a store over the slices in `options`.
    ///
    /// Fails on invalid slice lists (duplicates, dependencies out of
    /// order, cycles) and invalid state overrides. Effects declared on the
    /// slices' keys are registered and, unless disabled, started.
    pub fn new(options: StoreOptions) -> Result<Self> {
        let StoreOptions {
            slices,
            config,
            debug,
            state_override,
            scheduler,
            dispatch_hook,
            ids,
        } = options;

        let state = StoreState::create_with(&slices, &state_override)?;
        let (scheduler, default_queue): (Rc<dyn Scheduler>, _) = match scheduler {
            Some(scheduler) => (scheduler, None),
            None => {
                let queue = ManualScheduler::new();
                (Rc::new(queue.clone()), Some(queue))
            }
        };

        let store = Store {
            inner: Rc::new(StoreInner {
                name: config.name,
                state: RefCell::new(state),
                effects: EffectManager::new(scheduler, true),
                default_queue,
                debug,
                config: config.config,
                dispatch_hook,
                operation_cleanups: RefCell::new(Vec::new()),
                destroyed: Cell::new(false),
                ids,
            }),
        };

        for slice in &slices {
            for decl in slice.effects() {
                store.register_effect(Rc::clone(&decl.callback), decl.options.clone());
            }
        }
        tracing::debug!(
            store = %store.inner.label(),
            slices = slices.len(),
            effects = store.effect_count(),
            "store created"
        );

        if config.auto_start_effects {
            store.start_effects();
        }
        Ok(store)
    }

    pub(crate) fn from_inner(inner: Rc<StoreInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// The current snapshot.
    pub fn state(&self) -> StoreState {
        self.inner.state.borrow().clone()
    }

    pub fn config(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.inner.config
    }

    /// Apply a transaction or run an operation.
    ///
    /// A transaction is applied before this returns; effects it affects
    /// are only queued.
    pub fn dispatch(&self, item: impl Into<Dispatchable>) -> Result<()> {
        self.dispatch_from(item.into(), None)
    }

    pub(crate) fn dispatch_from(&self, item: Dispatchable, dispatcher: Option<&str>) -> Result<()> {
        if self.inner.destroyed.get() {
            return Err(Error::StoreDestroyed(self.inner.label()));
        }
        match item {
            Dispatchable::Transaction(tx) => self.dispatch_transaction(tx, dispatcher),
            Dispatchable::Operation(op) => self.run_operation(op, dispatcher),
        }
    }

    fn dispatch_transaction(&self, tx: Transaction, dispatcher: Option<&str>) -> Result<()> {
        if let Some(name) = &self.inner.name {
            if tx.metadata().get(META_STORE).is_none() {
                tx.set_metadata(META_STORE, name);
            }
        }
        if let Some(dispatcher) = dispatcher {
            tx.append_metadata(META_DISPATCHER, dispatcher);
        }

        match self.inner.dispatch_hook.clone() {
            Some(hook) => {
                let store = self.clone();
                let update = move |tx: Transaction| store.update_state(tx);
                hook(self, &update, tx)
            }
            None => self.update_state(tx),
        }
    }

    fn run_operation(&self, op: Operation, dispatcher: Option<&str>) -> Result<()> {
        let Operation { name, run } = op;
        tracing::debug!(operation = %name, dispatcher, "running operation");

        let context = OperationStore::new(self.clone(), name.clone());
        run(&context).map_err(|err| Error::OperationFailed {
            name,
            message: err.to_string(),
        })
    }

    /// Apply `tx` to the current state and queue affected effects.
    fn update_state(&self, tx: Transaction) -> Result<()> {
        if self.inner.destroyed.get() {
            return Err(Error::StoreDestroyed(self.inner.label()));
        }

        let current = self.state();
        let next = current.apply(&tx)?;

        let metadata = tx.metadata();
        self.emit(DebugEvent::Transaction {
            id: tx.id().clone(),
            source_slice: tx.source_slice(),
            action: tx.action().to_string(),
            dispatcher: metadata.get(META_DISPATCHER).map(str::to_string),
            store: metadata.get(META_STORE).map(str::to_string),
        });

        if next.ptr_eq(&current) {
            tracing::trace!(tx = %tx.id(), "transaction left state unchanged");
            return Ok(());
        }

        let changed = current.changed_slices(&next);
        tracing::debug!(
            tx = %tx.id(),
            action = tx.action(),
            changed = changed.len(),
            sequence = next.sequence(),
            "transaction applied"
        );
        *self.inner.state.borrow_mut() = next.clone();
        self.inner.effects.queue_run(Some(&changed), &next);
        Ok(())
    }

    /// Register an effect. It runs once the store's effects are active.
    pub fn effect<F>(&self, callback: F, options: EffectOptions) -> EffectHandle
    where
        F: Fn(&EffectStore) -> EffectResult + 'static,
    {
        self.register_effect(Rc::new(callback), options)
    }

    fn register_effect(&self, callback: EffectCallback, options: EffectOptions) -> EffectHandle {
        let hint = options.name.clone().unwrap_or_default();
        let id = EffectId::generate(&self.inner.ids, &hint);
        let effect = Rc::new(Effect::new(id, callback, options, Rc::downgrade(&self.inner)));

        if self.inner.destroyed.get() {
            effect.destroy();
        } else {
            self.inner.effects.register(Rc::clone(&effect), &self.state());
        }
        EffectHandle::new(effect, Rc::downgrade(&self.inner))
    }

    pub(crate) fn unregister_effect(&self, id: &EffectId) {
        self.inner.effects.unregister(id);
    }

    /// Resume effects with a full run of every effect.
    pub fn start_effects(&self) {
        if self.inner.destroyed.get() {
            return;
        }
        self.inner.effects.start(&self.state());
    }

    /// Run queued effects until none are left. Returns the number of runs.
    ///
    /// Only stores created without a scheduler queue runs here; with a
    /// custom scheduler this is a no-op returning 0.
    pub fn flush_effects(&self) -> usize {
        match &self.inner.default_queue {
            Some(queue) => queue.flush(),
            None => 0,
        }
    }

    /// Stop running effects and cancel queued runs.
    pub fn pause_effects(&self) {
        self.inner.effects.pause();
    }

    pub fn effects_paused(&self) -> bool {
        self.inner.effects.is_paused()
    }

    /// Destroy every effect and run operation cleanups. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        self.inner.teardown();
        tracing::debug!(store = %self.inner.label(), "store destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Number of live registered effects.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.len()
    }

    pub(crate) fn add_cleanup(&self, cleanup: Cleanup) {
        if self.inner.destroyed.get() {
            crate::reactive::run_cleanups(vec![cleanup], &self.inner.label());
            return;
        }
        self.inner.operation_cleanups.borrow_mut().push(cleanup);
    }

    pub(crate) fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::clone(self.inner.effects.scheduler())
    }

    pub(crate) fn emit_effect_run(&self, name: &str, reason: &RunReason) {
        self.emit(DebugEvent::effect_run(name, reason));
    }

    fn emit(&self, event: DebugEvent) {
        if let Some(debug) = &self.inner.debug {
            debug(&event);
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("sequence", &self.inner.state.borrow().sequence())
            .field("effects", &self.effect_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ManualScheduler;
    use crate::state::{Key, SliceSpec};

    fn counter_store() -> (Store, crate::state::StateField<i32>, ManualScheduler) {
        let key = Key::new("counter", &[]);
        let count = key.field(0).unwrap();
        let slice = key.slice(SliceSpec::new().field("count", &count)).unwrap();
        let scheduler = ManualScheduler::new();
        let store = Store::new(
            StoreOptions::new(vec![slice])
                .name("test")
                .scheduler(scheduler.clone()),
        )
        .unwrap();
        (store, count, scheduler)
    }

    #[test]
    fn dispatch_applies_before_returning() {
        let (store, count, scheduler) = counter_store();
        store.dispatch(count.update(3)).unwrap();
        assert_eq!(*count.get(&store.state()).unwrap(), 3);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn dispatch_records_store_name() {
        let (store, count, _) = counter_store();
        let tx = count.update(1);
        store.dispatch(tx.clone()).unwrap();
        assert_eq!(tx.metadata().get(META_STORE), Some("test"));
        assert_eq!(tx.metadata().get(META_DISPATCHER), None);
    }

    #[test]
    fn dispatch_after_destroy_fails() {
        let (store, count, _) = counter_store();
        store.destroy();
        store.destroy();
        assert!(store.is_destroyed());
        assert!(matches!(
            store.dispatch(count.update(1)),
            Err(Error::StoreDestroyed(name)) if name == "test"
        ));
    }

    #[test]
    fn failing_operation_reports_its_name() {
        let (store, _, _) = counter_store();
        let err = store
            .dispatch(Operation::new("load", |_| Err("offline".into())))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::OperationFailed { ref name, ref message } if name == "load" && message == "offline"
        ));
    }

    #[test]
    fn effect_registered_after_destroy_is_destroyed() {
        let (store, _, scheduler) = counter_store();
        store.destroy();
        let handle = store.effect(|_| Ok(()), EffectOptions::named("late"));
        assert!(handle.is_destroyed());
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(store.effect_count(), 0);
    }
}
