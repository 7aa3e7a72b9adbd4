//! Effect Manager
//!
//! The manager is the per-store coordinator for effects. It owns the
//! registered effects and decides which of them to queue after a
//! transition.
//!
//! # How It Works
//!
//! 1. When an effect is registered it is queued for its first run, unless
//!    effects are paused.
//!
//! 2. After a transition the store hands over the changed slices. The
//!    manager widens them with every transitive dependent slice, since a
//!    derived field may read any slice it depends on.
//!
//! 3. Each effect checks its tracked reads against the widened set and
//!    queues itself if one of them now holds a different value.
//!
//! 4. Pausing cancels queued runs. Resuming queues every effect for a full
//!    run, since transitions while paused were not observed.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ids::{EffectId, SliceId};
use crate::state::StoreState;

use super::effect::Effect;
use super::scheduler::Scheduler;

pub(crate) struct EffectManager {
    effects: RefCell<IndexMap<EffectId, Rc<Effect>>>,
    paused: Cell<bool>,
    scheduler: Rc<dyn Scheduler>,
}

impl EffectManager {
    pub(crate) fn new(scheduler: Rc<dyn Scheduler>, paused: bool) -> Self {
        Self {
            effects: RefCell::new(IndexMap::new()),
            paused: Cell::new(paused),
            scheduler,
        }
    }

    pub(crate) fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.scheduler
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.get()
    }

    pub(crate) fn len(&self) -> usize {
        self.effects.borrow().len()
    }

    pub(crate) fn register(&self, effect: Rc<Effect>, state: &StoreState) {
        self.effects
            .borrow_mut()
            .insert(effect.id().clone(), Rc::clone(&effect));
        if !self.paused.get() {
            effect.queue_run(None, state, &self.scheduler);
        }
    }

    pub(crate) fn unregister(&self, id: &EffectId) -> Option<Rc<Effect>> {
        self.effects.borrow_mut().shift_remove(id)
    }

    /// Queue the effects affected by a transition. `None` queues a full run
    /// of every effect.
    pub(crate) fn queue_run(&self, changed: Option<&[SliceId]>, state: &StoreState) {
        if self.paused.get() {
            return;
        }
        let widened: Option<HashSet<SliceId>> = changed.map(|ids| state.graph().widen(ids));
        tracing::trace!(changed = ?widened, "queueing effects");

        for effect in self.snapshot() {
            effect.queue_run(widened.as_ref(), state, &self.scheduler);
        }
    }

    /// Stop queueing runs and cancel queued ones.
    pub(crate) fn pause(&self) {
        if self.paused.replace(true) {
            return;
        }
        for effect in self.snapshot() {
            effect.cancel_pending();
        }
        tracing::debug!(effects = self.len(), "effects paused");
    }

    /// Resume and queue a full run of every effect.
    pub(crate) fn start(&self, state: &StoreState) {
        self.paused.set(false);
        tracing::debug!(effects = self.len(), "effects started");
        self.queue_run(None, state);
    }

    /// Destroy every effect.
    pub(crate) fn destroy(&self) {
        self.paused.set(true);
        let effects: Vec<Rc<Effect>> = self.effects.borrow_mut().drain(..).map(|(_, e)| e).collect();
        for effect in effects {
            effect.destroy();
        }
    }

    // Effects may register or destroy effects while we iterate.
    fn snapshot(&self) -> Vec<Rc<Effect>> {
        self.effects.borrow().values().cloned().collect()
    }
}
