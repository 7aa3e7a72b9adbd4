//! Effect Scheduler
//!
//! The engine never runs an effect inside `dispatch`. It hands a task to a
//! [`Scheduler`], which decides when the task runs and returns a
//! [`CancelHandle`] the engine uses on pause and destroy.
//!
//! Two schedulers ship with the crate:
//!
//! - [`ManualScheduler`] queues tasks until the host calls `flush`. It is
//!   deterministic and is what the tests use.
//! - [`TokioScheduler`] spawns each task on the current tokio `LocalSet`,
//!   after a yield or a delay bounded by the effect's `max_wait`.
//!
//! Any `Fn(Task, &ScheduleOptions) -> CancelHandle` closure is a scheduler
//! as well.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::error::EffectFailure;
use crate::state::Metadata;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Per-task scheduling hints.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Metadata of the effect the task belongs to.
    pub metadata: Metadata,

    /// Upper bound on how long the task may be deferred.
    pub max_wait: Option<Duration>,
}

/// Cancels one scheduled task. Dropping the handle does not cancel.
pub struct CancelHandle {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl CancelHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle whose cancellation does nothing.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Deferred-execution capability effects run through.
pub trait Scheduler {
    /// Arrange for `task` to run later, never before this call returns.
    fn schedule(&self, task: Task, options: &ScheduleOptions) -> CancelHandle;

    /// Surface a failed effect run.
    fn report_error(&self, failure: &EffectFailure) {
        tracing::error!(
            effect = %failure.effect,
            name = %failure.name,
            "effect failed: {}",
            failure.message
        );
    }
}

impl<F> Scheduler for F
where
    F: Fn(Task, &ScheduleOptions) -> CancelHandle,
{
    fn schedule(&self, task: Task, options: &ScheduleOptions) -> CancelHandle {
        self(task, options)
    }
}

// ----------------------------------------------------------------------------
// Manual scheduler
// ----------------------------------------------------------------------------

/// Rounds `flush` runs before giving up on effects that keep re-queueing.
const MAX_FLUSH_ROUNDS: usize = 1_000;

#[derive(Default)]
struct ManualQueue {
    tasks: RefCell<VecDeque<(u64, Task)>>,
    next_ticket: Cell<u64>,
    failures: RefCell<Vec<EffectFailure>>,
}

/// Host-driven scheduler: tasks wait in a queue until flushed.
///
/// Clones share the queue, so tests can keep a handle after passing one to
/// the store.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Rc<ManualQueue>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.tasks.borrow().len()
    }

    /// Run the tasks queued at the time of the call. Tasks they schedule
    /// stay queued. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let boundary = self.queue.next_ticket.get();
        let mut ran = 0;
        loop {
            let next = {
                let mut tasks = self.queue.tasks.borrow_mut();
                match tasks.front() {
                    Some((ticket, _)) if *ticket < boundary => tasks.pop_front(),
                    _ => None,
                }
            };
            match next {
                Some((_, task)) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Run tasks until the queue is empty. Returns the number of tasks run.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        for _ in 0..MAX_FLUSH_ROUNDS {
            if self.pending() == 0 {
                return ran;
            }
            ran += self.run_pending();
        }
        tracing::warn!(
            pending = self.pending(),
            "flush stopped after {MAX_FLUSH_ROUNDS} rounds"
        );
        ran
    }

    /// Failures reported so far.
    pub fn failures(&self) -> Vec<EffectFailure> {
        self.queue.failures.borrow().clone()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, task: Task, _options: &ScheduleOptions) -> CancelHandle {
        let ticket = self.queue.next_ticket.get();
        self.queue.next_ticket.set(ticket + 1);
        self.queue.tasks.borrow_mut().push_back((ticket, task));

        let queue: Weak<ManualQueue> = Rc::downgrade(&self.queue);
        CancelHandle::new(move || {
            if let Some(queue) = queue.upgrade() {
                queue.tasks.borrow_mut().retain(|(t, _)| *t != ticket);
            }
        })
    }

    fn report_error(&self, failure: &EffectFailure) {
        tracing::error!(effect = %failure.effect, "effect failed: {}", failure.message);
        self.queue.failures.borrow_mut().push(failure.clone());
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .field("failures", &self.queue.failures.borrow().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tokio scheduler
// ----------------------------------------------------------------------------

/// Runs tasks on the current tokio `LocalSet`.
///
/// With a zero delay the task runs after one yield to the runtime;
/// otherwise after `min(delay, max_wait)`. Must be used from within a
/// `LocalSet`.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler {
    delay: Duration,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer every task by `delay` (bounded by the task's `max_wait`).
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task, options: &ScheduleOptions) -> CancelHandle {
        let delay = match options.max_wait {
            Some(max_wait) => self.delay.min(max_wait),
            None => self.delay,
        };

        let handle = tokio::task::spawn_local(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            task();
        });

        CancelHandle::new(move || handle.abort())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_task(counter: &Rc<Cell<u32>>) -> Task {
        let counter = Rc::clone(counter);
        Box::new(move || counter.set(counter.get() + 1))
    }

    #[test]
    fn manual_scheduler_defers_until_flush() {
        let scheduler = ManualScheduler::new();
        let runs = Rc::new(Cell::new(0));

        scheduler.schedule(counter_task(&runs), &ScheduleOptions::default());
        scheduler.schedule(counter_task(&runs), &ScheduleOptions::default());
        assert_eq!(runs.get(), 0);
        assert_eq!(scheduler.pending(), 2);

        assert_eq!(scheduler.flush(), 2);
        assert_eq!(runs.get(), 2);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn cancelled_task_never_runs() {
        let scheduler = ManualScheduler::new();
        let runs = Rc::new(Cell::new(0));

        let cancel = scheduler.schedule(counter_task(&runs), &ScheduleOptions::default());
        scheduler.schedule(counter_task(&runs), &ScheduleOptions::default());
        cancel.cancel();

        assert_eq!(scheduler.flush(), 1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn run_pending_leaves_new_tasks_queued() {
        let scheduler = ManualScheduler::new();
        let runs = Rc::new(Cell::new(0));

        let inner = scheduler.clone();
        let nested_runs = Rc::clone(&runs);
        scheduler.schedule(
            Box::new(move || {
                inner.schedule(counter_task(&nested_runs), &ScheduleOptions::default());
            }),
            &ScheduleOptions::default(),
        );

        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(runs.get(), 0);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn closures_are_schedulers() {
        let queued: Rc<RefCell<Vec<Task>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&queued);
        let scheduler = move |task: Task, _: &ScheduleOptions| {
            sink.borrow_mut().push(task);
            CancelHandle::noop()
        };

        let runs = Rc::new(Cell::new(0));
        scheduler
            .schedule(counter_task(&runs), &ScheduleOptions::default())
            .cancel();
        for task in queued.borrow_mut().drain(..) {
            task();
        }
        assert_eq!(runs.get(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn tokio_scheduler_runs_on_local_set() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = TokioScheduler::new();
                let runs = Rc::new(Cell::new(0));

                scheduler.schedule(counter_task(&runs), &ScheduleOptions::default());
                assert_eq!(runs.get(), 0);

                tokio::time::sleep(Duration::from_millis(10)).await;
                assert_eq!(runs.get(), 1);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn tokio_scheduler_cancel_aborts_task() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = TokioScheduler::with_delay(Duration::from_millis(5));
                let runs = Rc::new(Cell::new(0));

                let cancel = scheduler.schedule(counter_task(&runs), &ScheduleOptions::default());
                cancel.cancel();

                tokio::time::sleep(Duration::from_millis(20)).await;
                assert_eq!(runs.get(), 0);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn max_wait_bounds_the_delay() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = TokioScheduler::with_delay(Duration::from_secs(60));
                let runs = Rc::new(Cell::new(0));
                let options = ScheduleOptions {
                    max_wait: Some(Duration::from_millis(1)),
                    ..ScheduleOptions::default()
                };

                scheduler.schedule(counter_task(&runs), &options);
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert_eq!(runs.get(), 1);
            })
            .await;
    }
}
