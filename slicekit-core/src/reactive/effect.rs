//! Effect Implementation
//!
//! An effect is a side-effecting callback re-run when a field it read on
//! its previous run changes.
//!
//! # Lifecycle
//!
//! ```text
//! never-run -> queued -> running -> idle -> queued -> running -> ... -> destroyed
//! ```
//!
//! 1. A registered effect has never run and is queued as soon as its store's
//!    effects are active.
//!
//! 2. After a transition, the effect is queued if a tracked field in a
//!    changed slice now holds a different value. While a run is queued,
//!    further transitions do not queue another one; the queued run sees
//!    the latest state.
//!
//! 3. A run first runs the previous run's cleanups and clears the tracker,
//!    then invokes the callback with a fresh [`EffectStore`].
//!
//! 4. Destroying runs all cleanups once. Cleanups registered afterwards run
//!    immediately.
//!
//! # Failures
//!
//! A callback that returns an error or panics is reported through the
//! scheduler's `report_error`. It never reaches the dispatcher or other
//! effects.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::error::{BoxError, EffectFailure};
use crate::ids::{EffectId, FieldId, SliceId};
use crate::state::{FieldCore, Metadata, StoreState, Value};
use crate::store::{Store, StoreInner};

use super::context::{panic_message, run_cleanups, Cleanup, EffectStore};
use super::scheduler::{CancelHandle, ScheduleOptions, Scheduler};
use super::tracker::{changed_field, Tracker};

/// What an effect callback returns.
pub type EffectResult = std::result::Result<(), BoxError>;

/// A shareable effect callback.
pub type EffectCallback = Rc<dyn Fn(&EffectStore) -> EffectResult>;

/// Options for a registered effect.
#[derive(Debug, Clone, Default)]
pub struct EffectOptions {
    pub name: Option<String>,

    /// Upper bound on how long a queued run may be deferred.
    pub max_wait: Option<Duration>,

    /// Passed to the scheduler with every run.
    pub metadata: Metadata,
}

impl EffectOptions {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.set(key, value);
        self
    }
}

/// An effect declared on a key, registered when a store is created.
#[derive(Clone)]
pub struct EffectDecl {
    pub(crate) callback: EffectCallback,
    pub(crate) options: EffectOptions,
}

impl fmt::Debug for EffectDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectDecl")
            .field("options", &self.options)
            .finish()
    }
}

/// Why a run was queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunReason {
    FirstRun,
    FullRun,
    FieldChanged(FieldId),
}

/// Runtime record of a registered effect.
pub(crate) struct Effect {
    id: EffectId,
    name: String,
    callback: EffectCallback,
    options: EffectOptions,
    store: Weak<StoreInner>,
    tracker: RefCell<Tracker>,
    cleanups: RefCell<Vec<Cleanup>>,
    run_count: Cell<u64>,
    destroyed: Cell<bool>,
    queued: Cell<bool>,
    pending: RefCell<Option<CancelHandle>>,
    reason: RefCell<Option<RunReason>>,
}

impl Effect {
    pub(crate) fn new(
        id: EffectId,
        callback: EffectCallback,
        options: EffectOptions,
        store: Weak<StoreInner>,
    ) -> Self {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| id.as_str().to_string());
        Self {
            id,
            name,
            callback,
            options,
            store,
            tracker: RefCell::new(Tracker::default()),
            cleanups: RefCell::new(Vec::new()),
            run_count: Cell::new(0),
            destroyed: Cell::new(false),
            queued: Cell::new(false),
            pending: RefCell::new(None),
            reason: RefCell::new(None),
        }
    }

    pub(crate) fn id(&self) -> &EffectId {
        &self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run_count(&self) -> u64 {
        self.run_count.get()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub(crate) fn is_queued(&self) -> bool {
        self.queued.get()
    }

    pub(crate) fn tracked_fields(&self) -> Vec<FieldId> {
        self.tracker.borrow().field_ids()
    }

    pub(crate) fn record(&self, field: Rc<FieldCore>, value: Value) {
        if self.destroyed.get() {
            return;
        }
        self.tracker.borrow_mut().record(field, value);
    }

    pub(crate) fn add_cleanup(&self, cleanup: Cleanup) {
        if self.destroyed.get() {
            run_cleanups(vec![cleanup], &self.name);
            return;
        }
        self.cleanups.borrow_mut().push(cleanup);
    }

    /// Whether a run is owed given the changed slices (`None` means all).
    fn should_queue_run(
        &self,
        changed: Option<&HashSet<SliceId>>,
        state: &StoreState,
    ) -> Option<RunReason> {
        if self.destroyed.get() {
            return None;
        }
        if self.run_count.get() == 0 {
            return Some(RunReason::FirstRun);
        }
        let Some(changed) = changed else {
            return Some(RunReason::FullRun);
        };

        let reads = self.tracker.borrow().reads();
        changed_field(&reads, changed, state).map(RunReason::FieldChanged)
    }

    /// Queue a run through `scheduler` if one is owed and none is pending.
    pub(crate) fn queue_run(
        self: &Rc<Self>,
        changed: Option<&HashSet<SliceId>>,
        state: &StoreState,
        scheduler: &Rc<dyn Scheduler>,
    ) {
        if self.queued.get() {
            return;
        }
        let Some(reason) = self.should_queue_run(changed, state) else {
            return;
        };

        tracing::trace!(effect = %self.name, ?reason, "queueing effect run");
        self.queued.set(true);
        *self.reason.borrow_mut() = Some(reason);

        let options = ScheduleOptions {
            metadata: self.options.metadata.clone(),
            max_wait: self.options.max_wait,
        };
        let effect = Rc::downgrade(self);
        let cancel = scheduler.schedule(
            Box::new(move || {
                if let Some(effect) = effect.upgrade() {
                    effect.run_scheduled();
                }
            }),
            &options,
        );

        if self.queued.get() {
            *self.pending.borrow_mut() = Some(cancel);
        }
    }

    /// Cancel a queued run, if any.
    pub(crate) fn cancel_pending(&self) {
        self.queued.set(false);
        self.reason.borrow_mut().take();
        let pending = self.pending.borrow_mut().take();
        if let Some(cancel) = pending {
            cancel.cancel();
        }
    }

    fn run_scheduled(self: &Rc<Self>) {
        self.queued.set(false);
        self.pending.borrow_mut().take();
        self.run();
    }

    /// Run the callback once.
    pub(crate) fn run(self: &Rc<Self>) {
        if self.destroyed.get() {
            return;
        }
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let store = Store::from_inner(inner);

        let previous = std::mem::take(&mut *self.cleanups.borrow_mut());
        run_cleanups(previous, &self.name);
        self.tracker.borrow_mut().clear();

        let run = self.run_count.get() + 1;
        self.run_count.set(run);

        let reason = self.reason.borrow_mut().take().unwrap_or(RunReason::FullRun);
        store.emit_effect_run(&self.name, &reason);
        tracing::debug!(effect = %self.name, run, ?reason, "running effect");

        let context = EffectStore::new(store.clone(), Rc::clone(self), run);
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.callback)(&context)));

        let message = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(panic) => panic_message(&*panic),
        };
        store.scheduler().report_error(&EffectFailure {
            effect: self.id.clone(),
            name: self.name.clone(),
            message,
        });
    }

    /// Stop the effect and run its cleanups. Idempotent.
    pub(crate) fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        self.cancel_pending();
        self.tracker.borrow_mut().clear();

        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        run_cleanups(cleanups, &self.name);
        tracing::debug!(effect = %self.name, "effect destroyed");
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("run_count", &self.run_count())
            .field("queued", &self.is_queued())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Handle to an effect registered with [`Store::effect`].
#[derive(Clone)]
pub struct EffectHandle {
    effect: Rc<Effect>,
    store: Weak<StoreInner>,
}

impl EffectHandle {
    pub(crate) fn new(effect: Rc<Effect>, store: Weak<StoreInner>) -> Self {
        Self { effect, store }
    }

    pub fn id(&self) -> &EffectId {
        self.effect.id()
    }

    pub fn name(&self) -> &str {
        self.effect.name()
    }

    /// Number of completed or in-progress runs.
    pub fn run_count(&self) -> u64 {
        self.effect.run_count()
    }

    /// Whether a run is queued with the scheduler.
    pub fn is_queued(&self) -> bool {
        self.effect.is_queued()
    }

    pub fn is_destroyed(&self) -> bool {
        self.effect.is_destroyed()
    }

    /// Fields read through `track` on the latest run.
    pub fn tracked_fields(&self) -> Vec<FieldId> {
        self.effect.tracked_fields()
    }

    /// Destroy the effect, running its cleanups. Idempotent.
    pub fn destroy(&self) {
        if let Some(inner) = self.store.upgrade() {
            Store::from_inner(inner).unregister_effect(self.effect.id());
        }
        self.effect.destroy();
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.effect.fmt(f)
    }
}
