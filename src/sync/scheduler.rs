//! Debounced one-shot scheduling of executor runs.
//!
//! At most one run is scheduled at a time: scheduling again replaces the
//! pending timer. Runs are spawned with [`tokio::task::spawn_local`], so the
//! scheduler must be driven from inside a [`tokio::task::LocalSet`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use tokio::task::JoinHandle;

type Job = Rc<dyn Fn() -> LocalBoxFuture<'static, ()>>;

struct Scheduled {
    generation: u64,
    handle: JoinHandle<()>,
}

/// One-shot timer around a run job.
pub struct Scheduler {
    job: Job,
    generation: Cell<u64>,
    slot: Rc<RefCell<Option<Scheduled>>>,
}

impl Scheduler {
    /// Create a scheduler that invokes `job` whenever a scheduled run fires.
    pub fn new<F>(job: F) -> Self
    where
        F: Fn() -> LocalBoxFuture<'static, ()> + 'static,
    {
        Self {
            job: Rc::new(job),
            generation: Cell::new(0),
            slot: Rc::new(RefCell::new(None)),
        }
    }

    /// Replace any scheduled run with one firing after `delay`.
    pub fn schedule_run(&self, delay: Duration) {
        self.cancel_scheduled();

        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let slot = Rc::clone(&self.slot);
        let job = Rc::clone(&self.job);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            // Vacate the slot first so the job itself may schedule the next run
            {
                let mut current = slot.borrow_mut();
                if current.as_ref().is_some_and(|s| s.generation == generation) {
                    *current = None;
                }
            }
            job().await;
        });

        log::trace!("sync run scheduled in {delay:?}");
        *self.slot.borrow_mut() = Some(Scheduled { generation, handle });
    }

    /// Cancel the scheduled run, if any. Returns true if one was cancelled.
    pub fn cancel_scheduled(&self) -> bool {
        let Some(scheduled) = self.slot.borrow_mut().take() else {
            return false;
        };
        scheduled.handle.abort();
        log::trace!("scheduled sync run cancelled");
        true
    }

    /// Whether a run is waiting on its timer.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_scheduled();
    }
}
