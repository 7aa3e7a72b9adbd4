//! Slicekit Core
//!
//! This crate provides the engine of the Slicekit state container.
//! It implements:
//!
//! - Slices of state declared through keys, with state and derived fields
//! - Immutable, structurally shared snapshots and single-use transactions
//! - Effects that re-run only when a field they read changes
//! - Pluggable scheduling of effect runs
//!
//! The engine is single-threaded: stores, snapshots and effects are `Rc`
//! based and live on one thread (or one tokio `LocalSet`).
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `state`: keys, fields, slices, snapshots and transactions
//! - `graph`: dependency graph over slices
//! - `reactive`: effects, tracking and schedulers
//! - `store`: the composition root and dispatch pipeline
//!
//! # Example
//!
//! ```rust,ignore
//! use slicekit_core::{Key, ManualScheduler, SliceSpec, Store, StoreOptions};
//!
//! // Declare a slice
//! let key = Key::new("counter", &[]);
//! let count = key.field(0)?;
//! let slice = key.slice(SliceSpec::new().field("count", &count))?;
//!
//! // Create a store
//! let scheduler = ManualScheduler::new();
//! let store = Store::new(StoreOptions::new(vec![slice]).scheduler(scheduler.clone()))?;
//!
//! // Log every change
//! let logged = count.clone();
//! store.effect(
//!     move |ctx| {
//!         println!("count: {}", logged.track(ctx)?);
//!         Ok(())
//!     },
//!     Default::default(),
//! );
//!
//! store.dispatch(count.update_with(|c| c + 1))?;
//! scheduler.flush();
//! // prints "count: 1"
//! ```

pub mod config;
pub mod debug;
pub mod error;
pub mod graph;
pub mod ids;
pub mod reactive;
pub mod state;
pub mod store;

pub use config::{StoreConfig, StoreOptions};
pub use debug::{DebugCallback, DebugEvent};
pub use error::{BoxError, EffectFailure, Error, Result};
pub use ids::{EffectId, FieldId, IdGenerator, IdKind, SliceId, TransactionId};
pub use reactive::{
    cleanup, CancelHandle, CleanupTarget, EffectHandle, EffectOptions, EffectResult, EffectStore,
    ManualScheduler, OperationStore, ScheduleOptions, Scheduler, TokioScheduler,
};
pub use state::{
    DerivedField, Key, Metadata, Slice, SliceSpec, SliceView, StateField, StateOverride,
    StoreState, Transaction,
};
pub use store::{DispatchHook, Dispatchable, Operation, Store};
