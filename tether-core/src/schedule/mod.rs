//! Update Scheduling
//!
//! This module turns bursts of data-change notifications into batched
//! snapshot writes.
//!
//! # Overview
//!
//! Many bindings can be notified within the same scheduling tick, for example
//! when one store commit touches keys read by several components. Writing each
//! snapshot as it arrives would render once per notification and could expose
//! a state where only some of the components saw the commit. Instead every
//! accepted notification is queued on the [`Scheduler`], and a single flush,
//! run at the next point the [`Tick`] picks, applies them all inside one
//! batched-updates scope.
//!
//! # Design Decisions
//!
//! 1. The scheduler is an explicit object rather than module-level state, so
//!    tests can build isolated schedulers with a [`ManualTick`].
//!
//! 2. The queue lives behind one mutex. Enqueue and flush are the only
//!    operations that touch it, and neither holds the lock while running
//!    callbacks.

mod scheduler;
mod tick;

pub use scheduler::{BatchedUpdates, Scheduler, Task};
pub use tick::{FlushFn, ImmediateTick, ManualTick, Tick, TokioTick};
