//! Batch Scheduler
//!
//! The scheduler coalesces snapshot writes requested within one scheduling
//! tick into a single flush.
//!
//! # Algorithm
//!
//! 1. `enqueue` appends a callback to the pending list. If no flush is
//!    scheduled yet, it marks one as scheduled and hands a flush request to
//!    the [`Tick`].
//! 2. When the tick runs the flush, the pending list is swapped for an empty
//!    one and the scheduled flag is cleared *before* any callback runs. A
//!    callback that enqueues more work therefore starts a new batch instead
//!    of re-entering the current one.
//! 3. The swapped-out callbacks run in insertion order inside a single
//!    batched-updates scope, so the host renders once for the whole batch.
//!
//! # Failure
//!
//! A callback that panics aborts the rest of its batch; the remaining
//! callbacks are dropped, never retried. The scheduler itself stays usable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::tick::Tick;

/// A pending snapshot update.
pub type Task = Box<dyn FnOnce() + Send>;

/// A scope in which state changes are collected and rendered once.
pub trait BatchedUpdates: Send + Sync {
    /// Run `updates`, deferring any re-render they cause until it returns.
    fn batched_updates(&self, updates: &mut dyn FnMut());
}

#[derive(Default)]
struct Queue {
    pending: Vec<Task>,
    flush_scheduled: bool,
}

/// Queue of pending updates shared by every binding of a host.
pub struct Scheduler {
    queue: Mutex<Queue>,
    tick: Arc<dyn Tick>,
    batcher: Option<Weak<dyn BatchedUpdates>>,
    flushes: AtomicU64,
    this: Weak<Scheduler>,
}

impl Scheduler {
    /// Create a scheduler whose flushes run callbacks without a batching scope.
    pub fn new(tick: Arc<dyn Tick>) -> Arc<Self> {
        Self::build(tick, None)
    }

    /// Create a scheduler whose flushes run inside `batcher`'s scope.
    pub fn with_batcher(tick: Arc<dyn Tick>, batcher: Weak<dyn BatchedUpdates>) -> Arc<Self> {
        Self::build(tick, Some(batcher))
    }

    fn build(tick: Arc<dyn Tick>, batcher: Option<Weak<dyn BatchedUpdates>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            queue: Mutex::new(Queue::default()),
            tick,
            batcher,
            flushes: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    /// The tick driving this scheduler.
    pub fn tick(&self) -> &Arc<dyn Tick> {
        &self.tick
    }

    /// Queue `task` for the next flush, scheduling one if needed.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let schedule = {
            let mut queue = self.queue.lock();
            queue.pending.push(Box::new(task));
            trace!(pending = queue.pending.len(), "enqueued snapshot update");
            !std::mem::replace(&mut queue.flush_scheduled, true)
        };

        if schedule {
            let request = FlushRequest {
                scheduler: self.this.clone(),
                ran: false,
            };
            self.tick.schedule(Box::new(move || request.run()));
        }
    }

    /// Run every pending callback as one batch and return how many ran.
    ///
    /// Normally called by the tick; calling it directly forces the batch out
    /// early, and the flush the tick still holds becomes a no-op.
    pub fn flush(&self) -> usize {
        let batch = {
            let mut queue = self.queue.lock();
            queue.flush_scheduled = false;
            std::mem::take(&mut queue.pending)
        };

        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        self.flushes.fetch_add(1, Ordering::Relaxed);
        trace!(callbacks = count, "flushing scheduler batch");

        let mut tasks = batch.into_iter();
        let mut run = || {
            for task in tasks.by_ref() {
                task();
            }
        };

        match self.batcher.as_ref().and_then(Weak::upgrade) {
            Some(batcher) => batcher.batched_updates(&mut run),
            None => run(),
        }

        count
    }

    /// Number of callbacks waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Whether a flush has been handed to the tick and not yet run.
    pub fn is_flush_scheduled(&self) -> bool {
        self.queue.lock().flush_scheduled
    }

    /// Number of non-empty flushes run so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

/// A flush handed to the tick.
///
/// If the tick drops it without running it (for example a tokio runtime that
/// has shut down), the scheduled flag is cleared so the next enqueue asks
/// again instead of waiting on a flush that will never come.
struct FlushRequest {
    scheduler: Weak<Scheduler>,
    ran: bool,
}

impl FlushRequest {
    fn run(mut self) {
        self.ran = true;
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.flush();
        }
    }
}

impl Drop for FlushRequest {
    fn drop(&mut self) {
        if self.ran {
            return;
        }
        if let Some(scheduler) = self.scheduler.upgrade() {
            let pending = {
                let mut queue = scheduler.queue.lock();
                queue.flush_scheduled = false;
                queue.pending.len()
            };
            warn!(pending, "scheduled flush was dropped before running; rescheduling on next enqueue");
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending_len())
            .field("flush_scheduled", &self.is_flush_scheduled())
            .field("flushes", &self.flush_count())
            .finish()
    }
}
