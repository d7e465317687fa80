//! Tick Primitives
//!
//! A tick decides *when* a scheduled flush runs. The scheduler only asks for
//! "the next scheduling point"; the tick picks what that means:
//!
//! - [`TokioTick`] spawns the flush as a task, so it runs once the current
//!   task yields. On a current-thread runtime this matches a microtask queue.
//! - [`ManualTick`] holds flushes until [`Tick::drain`] is called.
//! - [`ImmediateTick`] runs the flush on the spot.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::warn;

/// A flush request handed to a tick.
pub type FlushFn = Box<dyn FnOnce() + Send>;

/// A scheduling primitive for scheduler flushes.
pub trait Tick: Send + Sync + 'static {
    /// Arrange for `flush` to run at the next scheduling point.
    fn schedule(&self, flush: FlushFn);

    /// Run any flushes this tick is holding back and return how many ran.
    ///
    /// Ticks that run flushes on their own return 0.
    fn drain(&self) -> usize {
        0
    }
}

/// Spawns each flush onto a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioTick {
    handle: Option<Handle>,
}

impl TokioTick {
    /// Spawn onto whichever runtime is current when a flush is scheduled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always spawn onto `handle`.
    ///
    /// Flushes requested after that runtime shuts down are dropped; the
    /// scheduler notices and schedules again on the next enqueue.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Tick for TokioTick {
    fn schedule(&self, flush: FlushFn) {
        let handle = self.handle.clone().or_else(|| Handle::try_current().ok());
        // A handle to a runtime that has shut down drops the spawned task.
        match handle {
            Some(handle) => {
                handle.spawn(async move { flush() });
            }
            None => {
                warn!("no tokio runtime available; flushing synchronously");
                flush();
            }
        }
    }
}

/// Holds flushes until they are drained explicitly.
#[derive(Default)]
pub struct ManualTick {
    queued: Mutex<VecDeque<FlushFn>>,
}

impl ManualTick {
    /// Create a tick with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of flushes waiting to run.
    pub fn pending(&self) -> usize {
        self.queued.lock().len()
    }
}

impl Tick for ManualTick {
    fn schedule(&self, flush: FlushFn) {
        self.queued.lock().push_back(flush);
    }

    /// Runs queued flushes in order, including any scheduled while draining.
    fn drain(&self) -> usize {
        let mut ran = 0;
        loop {
            // Lock released before the flush runs so it can schedule again.
            let next = self.queued.lock().pop_front();
            let Some(flush) = next else { break };
            flush();
            ran += 1;
        }
        ran
    }
}

impl std::fmt::Debug for ManualTick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTick")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Runs every flush as soon as it is scheduled.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateTick;

impl Tick for ImmediateTick {
    fn schedule(&self, flush: FlushFn) {
        flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counter_flush(counter: &Arc<AtomicI32>) -> FlushFn {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn manual_tick_defers_until_drain() {
        let tick = ManualTick::new();
        let count = Arc::new(AtomicI32::new(0));

        tick.schedule(counter_flush(&count));
        tick.schedule(counter_flush(&count));
        assert_eq!(tick.pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(tick.drain(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(tick.pending(), 0);
    }

    #[test]
    fn manual_tick_drains_flushes_scheduled_while_draining() {
        let tick = Arc::new(ManualTick::new());
        let count = Arc::new(AtomicI32::new(0));

        let inner_tick = tick.clone();
        let inner_count = count.clone();
        tick.schedule(Box::new(move || {
            inner_tick.schedule(counter_flush(&inner_count));
        }));

        assert_eq!(tick.drain(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn immediate_tick_runs_inline() {
        let count = Arc::new(AtomicI32::new(0));
        ImmediateTick.schedule(counter_flush(&count));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(ImmediateTick.drain(), 0);
    }

    #[test]
    fn tokio_tick_without_runtime_flushes_inline() {
        let count = Arc::new(AtomicI32::new(0));
        TokioTick::default().schedule(counter_flush(&count));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tokio_tick_follows_the_current_runtime() {
        let count = Arc::new(AtomicI32::new(0));
        let first = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let tick = first.block_on(async { TokioTick::new() });
        drop(first);

        let second = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        second.block_on(async {
            tick.schedule(counter_flush(&count));
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tokio_tick_runs_after_yield() {
        let count = Arc::new(AtomicI32::new(0));
        let tick = TokioTick::new();

        tick.schedule(counter_flush(&count));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
