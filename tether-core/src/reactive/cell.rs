//! Snapshot Cell
//!
//! A snapshot cell is the UI-visible slot a subscription writes into. It
//! starts out [`Snapshot::Absent`] and readers see the caller's default until
//! a value arrives.
//!
//! # How Cells Are Written
//!
//! 1. Scheduler flushes call [`SnapshotCell::set`]. The value is stored and the
//!    owning component is marked dirty, so the host renders it once the
//!    batched scope ends.
//!
//! 2. Detaching a binding calls [`SnapshotCell::reset`]. This write is silent:
//!    it happens during teardown or during the render that is about to read
//!    the cell, so there is nothing to re-render.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::runtime::Host;
use super::ComponentId;

/// Contents of a snapshot cell.
///
/// `Absent` is distinct from any value, including a null query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot<R> {
    Absent,
    Present(R),
}

impl<R> Default for Snapshot<R> {
    fn default() -> Self {
        Snapshot::Absent
    }
}

impl<R> Snapshot<R> {
    /// Whether no value has been stored.
    pub fn is_absent(&self) -> bool {
        matches!(self, Snapshot::Absent)
    }

    /// The stored value, if any.
    pub fn as_ref(&self) -> Option<&R> {
        match self {
            Snapshot::Absent => None,
            Snapshot::Present(value) => Some(value),
        }
    }

    /// The present value, or `default`.
    pub fn resolve(self, default: R) -> R {
        match self {
            Snapshot::Absent => default,
            Snapshot::Present(value) => value,
        }
    }
}

/// A value slot owned by one component instance.
pub struct SnapshotCell<R> {
    value: Mutex<Snapshot<R>>,
    owner: Option<(Weak<Host>, ComponentId)>,
    writes: AtomicU64,
}

impl<R> SnapshotCell<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// Create a cell with no owning component.
    ///
    /// Writes are stored but never trigger a render.
    pub fn new() -> Self {
        Self {
            value: Mutex::new(Snapshot::Absent),
            owner: None,
            writes: AtomicU64::new(0),
        }
    }

    /// Create a cell whose writes mark `component` dirty on `host`.
    pub fn owned_by(host: &Arc<Host>, component: ComponentId) -> Self {
        Self {
            value: Mutex::new(Snapshot::Absent),
            owner: Some((Arc::downgrade(host), component)),
            writes: AtomicU64::new(0),
        }
    }

    /// The stored value, or a clone of `default` while absent.
    pub fn get_or(&self, default: &R) -> R {
        match &*self.value.lock() {
            Snapshot::Absent => default.clone(),
            Snapshot::Present(value) => value.clone(),
        }
    }

    /// A copy of the raw contents.
    pub fn snapshot(&self) -> Snapshot<R> {
        self.value.lock().clone()
    }

    /// Whether no value has been stored since creation or the last reset.
    pub fn is_absent(&self) -> bool {
        self.value.lock().is_absent()
    }

    /// Store `value` and schedule the owner for re-render.
    pub fn set(&self, value: R) {
        *self.value.lock() = Snapshot::Present(value);
        self.writes.fetch_add(1, Ordering::Relaxed);

        if let Some((host, component)) = &self.owner {
            if let Some(host) = host.upgrade() {
                host.mark_dirty(*component);
            }
        }
    }

    /// Clear the cell back to absent without notifying the owner.
    pub fn reset(&self) {
        *self.value.lock() = Snapshot::Absent;
    }

    /// Number of values stored through [`set`](Self::set).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// The component whose renders this cell drives.
    pub fn owner(&self) -> Option<ComponentId> {
        self.owner.as_ref().map(|(_, component)| *component)
    }
}

impl<R> Default for SnapshotCell<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for SnapshotCell<R>
where
    R: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCell")
            .field("value", &self.snapshot())
            .field("owner", &self.owner())
            .field("writes", &self.write_count())
            .finish()
    }
}
