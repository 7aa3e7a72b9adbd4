//! Reactive Effects
//!
//! This module implements the side of the engine that reacts to state
//! transitions: effects, the contexts they run with, and the schedulers
//! that run them.
//!
//! # Concepts
//!
//! ## Effects
//!
//! An effect is a callback that re-runs whenever a field it read through
//! `track` on its previous run changes. Effects are used to synchronize
//! state with external systems, such as persisting or logging.
//!
//! ## Tracking
//!
//! Reads are recorded per run in a tracker owned by the effect, together
//! with the value observed. There is no ambient "current effect": the
//! [`EffectStore`] passed to the callback is the tracking context.
//!
//! ## Scheduling
//!
//! Effects never run inside `dispatch`. Runs are handed to a [`Scheduler`],
//! and a queued run coalesces any further transitions until it executes.

mod context;
mod effect;
mod manager;
mod scheduler;
mod tracker;

pub use context::{cleanup, Cleanup, CleanupTarget, EffectStore, OperationStore};
pub use effect::{EffectCallback, EffectDecl, EffectHandle, EffectOptions, EffectResult};
pub use scheduler::{CancelHandle, ManualScheduler, ScheduleOptions, Scheduler, Task, TokioScheduler};

pub(crate) use context::run_cleanups;
pub(crate) use effect::{Effect, RunReason};
pub(crate) use manager::EffectManager;
