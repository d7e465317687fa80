//! Subscription Binding
//!
//! A binding owns at most one live subscription to a source on behalf of one
//! component instance, and funnels the data it receives into a
//! [`SnapshotCell`] through the [`Scheduler`].
//!
//! # How Bindings Work
//!
//! 1. On every render the binding is synced with the current source and
//!    dependency key. If either differs from the attached pair (or nothing is
//!    attached yet), the old subscription is released and a new one is made.
//!
//! 2. Each attachment gets a new generation number. Notifications carry the
//!    generation they were subscribed under; a notification whose generation
//!    is no longer current is dropped, both when it arrives and when its
//!    queued write is flushed.
//!
//! 3. Detaching releases the subscription, bumps the generation and resets
//!    the cell to absent.
//!
//! # States
//!
//! ```text
//! Unattached --attach--> Attached --detach--> Detached --attach--> Attached
//! ```
//!
//! A binding whose source stays absent remains `Unattached`. Dropping the
//! binding detaches it.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::cell::SnapshotCell;
use super::options::Deps;
use crate::schedule::Scheduler;
use crate::source::{IsEqual, OnData, Query, SourceOptions, SubscriptionSource, Unsubscribe};

/// Lifecycle state of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStatus {
    /// Never attached.
    Unattached,

    /// Holding a live subscription.
    Attached,

    /// Released its subscription.
    Detached,
}

/// The pair a binding is attached under.
struct AttachKey<S> {
    source: Option<Weak<S>>,
    deps: Deps,
}

impl<S> AttachKey<S> {
    fn matches(&self, source: Option<&Arc<S>>, deps: &Deps) -> bool {
        let same_source = match (&self.source, source) {
            (None, None) => true,
            (Some(held), Some(current)) => std::ptr::eq(held.as_ptr(), Arc::as_ptr(current)),
            _ => false,
        };
        same_source && self.deps == *deps
    }
}

/// One component's subscription to a source.
pub struct Binding<S, R>
where
    S: SubscriptionSource,
    R: Clone + Send + Sync + 'static,
{
    cell: Arc<SnapshotCell<R>>,
    scheduler: Arc<Scheduler>,
    key: Option<AttachKey<S>>,
    unsubscribe: Option<Unsubscribe>,
    generation: Arc<AtomicU64>,
    status: BindingStatus,
    attach_count: u64,
    _source: PhantomData<fn(&S)>,
}

impl<S, R> Binding<S, R>
where
    S: SubscriptionSource,
    R: Clone + Send + Sync + 'static,
{
    /// Create an unattached binding writing into `cell`.
    pub fn new(cell: Arc<SnapshotCell<R>>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            cell,
            scheduler,
            key: None,
            unsubscribe: None,
            generation: Arc::new(AtomicU64::new(0)),
            status: BindingStatus::Unattached,
            attach_count: 0,
            _source: PhantomData,
        }
    }

    /// The cell this binding writes into.
    pub fn cell(&self) -> &Arc<SnapshotCell<R>> {
        &self.cell
    }

    /// Current lifecycle state.
    pub fn status(&self) -> BindingStatus {
        self.status
    }

    /// Number of subscriptions made so far.
    pub fn attach_count(&self) -> u64 {
        self.attach_count
    }

    /// Current generation. Changes on every attach and detach.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Bring the binding in line with `source` and `deps`.
    ///
    /// `query` and `is_equal` are only used when a new subscription is made;
    /// changing them alone does not resubscribe. Returns whether the binding
    /// was re-established.
    pub fn sync(
        &mut self,
        source: Option<&Arc<S>>,
        query: &Query<S::Tx, R>,
        deps: &Deps,
        is_equal: Option<&IsEqual<R>>,
    ) -> bool {
        if let Some(key) = &self.key {
            if key.matches(source, deps) {
                return false;
            }
        }

        self.detach();
        self.key = Some(AttachKey {
            source: source.map(Arc::downgrade),
            deps: deps.clone(),
        });

        if let Some(source) = source {
            self.attach(source, query, is_equal);
        }
        true
    }

    fn attach(&mut self, source: &Arc<S>, query: &Query<S::Tx, R>, is_equal: Option<&IsEqual<R>>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut on_data = self.deliver(generation);
        let mut equality = is_equal.cloned();

        if !source.supports_equality() {
            if let Some(is_equal) = equality.take() {
                on_data = gate(is_equal, on_data);
            }
        }

        // Set before subscribing: the source may deliver synchronously.
        self.status = BindingStatus::Attached;
        self.attach_count += 1;
        debug!(generation, attach = self.attach_count, "binding attached");

        let handle = source.subscribe(
            Arc::clone(query),
            SourceOptions {
                on_data,
                is_equal: equality,
            },
        );
        self.unsubscribe = Some(handle);
    }

    /// Callback that queues a cell write, tagged with `generation`.
    fn deliver(&self, generation: u64) -> OnData<R> {
        let cell = Arc::downgrade(&self.cell);
        let current = Arc::clone(&self.generation);
        let scheduler = Arc::clone(&self.scheduler);

        Arc::new(move |value: R| {
            if current.load(Ordering::SeqCst) != generation {
                trace!(generation, "dropping notification from detached subscription");
                return;
            }

            let cell = cell.clone();
            let current = Arc::clone(&current);
            scheduler.enqueue(move || {
                if current.load(Ordering::SeqCst) != generation {
                    trace!(generation, "dropping write queued before detach");
                    return;
                }
                if let Some(cell) = cell.upgrade() {
                    cell.set(value);
                }
            });
        })
    }

    /// Release the subscription, if any, and reset the cell.
    pub fn detach(&mut self) {
        let Some(handle) = self.unsubscribe.take() else {
            return;
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        handle.call();
        self.cell.reset();
        self.status = BindingStatus::Detached;
        debug!(generation, "binding detached");
    }
}

impl<S, R> Drop for Binding<S, R>
where
    S: SubscriptionSource,
    R: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.detach();
    }
}

impl<S, R> std::fmt::Debug for Binding<S, R>
where
    S: SubscriptionSource,
    R: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("status", &self.status)
            .field("generation", &self.generation())
            .field("attach_count", &self.attach_count)
            .finish()
    }
}

/// Equality gate for sources that do not apply `is_equal` themselves.
fn gate<R>(is_equal: IsEqual<R>, on_data: OnData<R>) -> OnData<R>
where
    R: Clone + Send + Sync + 'static,
{
    let last: Mutex<Option<R>> = Mutex::new(None);
    Arc::new(move |value: R| {
        {
            let mut last = last.lock();
            if let Some(previous) = last.as_ref() {
                if is_equal(previous, &value) {
                    trace!("binding suppressed an equal value");
                    return;
                }
            }
            *last = Some(value.clone());
        }
        on_data(value);
    })
}
