//! Reactive Bridge
//!
//! This module connects subscription sources to component renders: a
//! component calls [`use_subscribe`] while rendering, and re-renders when the
//! query result it subscribed to changes.
//!
//! # Concepts
//!
//! ## Snapshot Cells
//!
//! A [`SnapshotCell`] holds the latest query result for one component. It is
//! absent until the first result is flushed, and reads fall back to the
//! caller's default while absent. A legitimate null result is not absent.
//!
//! ## Bindings
//!
//! A [`Binding`] owns the live subscription for one `use_subscribe` call site
//! of one component instance. It resubscribes when the source or the
//! dependency key changes and releases the subscription when the component
//! unmounts. Results are never written to the cell directly: they go through
//! the scheduler so that everything notified in one tick renders together.
//!
//! ## Host
//!
//! The [`Host`] owns mounted components, their hook slots and the render
//! pass. Its batched-updates scope is what the scheduler flushes inside.
//!
//! # Implementation Notes
//!
//! Hooks locate their component through a thread-local render stack (see
//! [`RenderContext`]) and keep their state in slots indexed by call order, so
//! hooks must be called unconditionally and in the same order on every
//! render.

mod binding;
mod cell;
mod context;
mod hook;
mod ids;
mod options;
mod runtime;

pub use binding::{Binding, BindingStatus};
pub use cell::{Snapshot, SnapshotCell};
pub use context::RenderContext;
pub use hook::{try_use_subscribe, use_subscribe};
pub use ids::{ComponentId, SubscriptionId};
pub use options::{DefaultOrOptions, Deps, SubscribeOptions, RECOGNIZED_KEYS};
pub use runtime::Host;
