//! Host Runtime
//!
//! The host is the minimal render runtime that owns mounted component
//! instances. It connects snapshot cells to re-renders and provides the
//! batched-updates scope the scheduler flushes inside.
//!
//! # How It Works
//!
//! 1. `mount` registers a render function (optionally under a parent) and
//!    renders it right away.
//!
//! 2. Rendering a component runs its render function inside a
//!    [`RenderContext`], then re-renders its children in mount order.
//!
//! 3. When a snapshot cell is written, the host marks the owning component
//!    dirty:
//!    a. Inside a batched scope or a render, the component is remembered.
//!    b. Otherwise it renders immediately.
//!
//! 4. When the outermost batched scope ends, every remembered component is
//!    rendered in one pass. A component whose ancestor is also dirty is only
//!    rendered as part of that ancestor's subtree.
//!
//! # Hook Storage
//!
//! Hooks keep their state in per-component slots, indexed by call order. The
//! slots are dropped on unmount, which is how a subscription hook releases its
//! subscription.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::context::RenderContext;
use super::ComponentId;
use crate::config::HostConfig;
use crate::error::HookError;
use crate::schedule::{BatchedUpdates, Scheduler, Tick};

type Slot = Arc<dyn Any + Send + Sync>;

struct ComponentEntry {
    parent: Option<ComponentId>,
    render: Box<dyn Fn() + Send + Sync>,
    slots: Mutex<Vec<Slot>>,
    renders: AtomicU64,
}

#[derive(Default)]
struct HostState {
    /// Mounted components, in mount order.
    components: IndexMap<ComponentId, Arc<ComponentEntry>>,
    dirty: IndexSet<ComponentId>,
    batch_depth: usize,
    render_depth: usize,
    render_passes: u64,
}

impl HostState {
    fn children_of(&self, id: ComponentId) -> Vec<ComponentId> {
        self.components
            .iter()
            .filter(|(_, entry)| entry.parent == Some(id))
            .map(|(child, _)| *child)
            .collect()
    }

    fn has_ancestor_in(&self, id: ComponentId, set: &IndexSet<ComponentId>) -> bool {
        let mut current = self.components.get(&id).and_then(|entry| entry.parent);
        while let Some(parent) = current {
            if set.contains(&parent) {
                return true;
            }
            current = self.components.get(&parent).and_then(|entry| entry.parent);
        }
        false
    }

    fn is_deferring(&self) -> bool {
        self.batch_depth > 0 || self.render_depth > 0
    }
}

/// The render runtime for a tree of components.
pub struct Host {
    state: Mutex<HostState>,
    scheduler: Arc<Scheduler>,
    max_render_rounds: usize,
    this: Weak<Host>,
}

static GLOBAL: OnceLock<Arc<Host>> = OnceLock::new();

impl Host {
    /// Create a host whose scheduler is driven by `tick`.
    pub fn new(tick: Arc<dyn Tick>) -> Arc<Self> {
        Self::build(tick, HostConfig::default().max_render_rounds)
    }

    /// Create a host from configuration.
    pub fn from_config(config: &HostConfig) -> Arc<Self> {
        Self::build(config.build_tick(), config.max_render_rounds)
    }

    fn build(tick: Arc<dyn Tick>, max_render_rounds: usize) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Host>| {
            let batcher: Weak<dyn BatchedUpdates> = this.clone();
            Self {
                state: Mutex::new(HostState::default()),
                scheduler: Scheduler::with_batcher(tick, batcher),
                max_render_rounds: max_render_rounds.max(1),
                this: this.clone(),
            }
        })
    }

    /// The process-wide host.
    ///
    /// Flushes are spawned on whichever tokio runtime is current when they
    /// are scheduled, not the one current when the host was first used.
    pub fn global() -> &'static Arc<Host> {
        GLOBAL.get_or_init(|| Host::from_config(&HostConfig::default()))
    }

    /// The scheduler every binding of this host enqueues into.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Run flushes held back by the tick.
    pub fn drain_ticks(&self) -> usize {
        self.scheduler.tick().drain()
    }

    /// Mount a component and render it.
    pub fn mount<F>(&self, parent: Option<ComponentId>, render: F) -> ComponentId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ComponentId::new();
        let entry = Arc::new(ComponentEntry {
            parent,
            render: Box::new(render),
            slots: Mutex::new(Vec::new()),
            renders: AtomicU64::new(0),
        });

        self.state.lock().components.insert(id, entry);
        debug!(component = %id, parent = ?parent.map(|p| p.raw()), "mounted component");

        self.render_pass(IndexSet::from([id]));
        id
    }

    /// Unmount a component and everything below it.
    ///
    /// Hook slots are dropped after the host lock is released, so their
    /// teardown may call back into the host.
    pub fn unmount(&self, id: ComponentId) {
        let removed: Vec<Arc<ComponentEntry>> = {
            let mut state = self.state.lock();
            let mut doomed = vec![id];
            let mut i = 0;
            while i < doomed.len() {
                let children = state.children_of(doomed[i]);
                doomed.extend(children);
                i += 1;
            }

            doomed
                .into_iter()
                .filter_map(|doomed| {
                    state.dirty.shift_remove(&doomed);
                    state.components.shift_remove(&doomed)
                })
                .collect()
        };

        debug!(component = %id, removed = removed.len(), "unmounted component");
        for entry in removed {
            let slots = std::mem::take(&mut *entry.slots.lock());
            drop(slots);
        }
    }

    /// Schedule `id` for re-render.
    ///
    /// Components left dirty by a batch that unwound are rendered along with
    /// it.
    pub fn mark_dirty(&self, id: ComponentId) {
        let roots = {
            let mut state = self.state.lock();
            if !state.components.contains_key(&id) {
                return;
            }
            state.dirty.insert(id);
            if state.is_deferring() {
                return;
            }
            std::mem::take(&mut state.dirty)
        };

        self.render_pass(roots);
    }

    /// Run `updates` and render everything they dirtied in one pass.
    pub fn batch<F: FnOnce()>(&self, updates: F) {
        let mut updates = Some(updates);
        self.batched_updates(&mut || {
            if let Some(updates) = updates.take() {
                updates();
            }
        });
    }

    /// Whether `id` is currently mounted.
    pub fn is_mounted(&self, id: ComponentId) -> bool {
        self.state.lock().components.contains_key(&id)
    }

    /// Number of mounted components.
    pub fn component_count(&self) -> usize {
        self.state.lock().components.len()
    }

    /// Number of render passes run so far.
    pub fn render_passes(&self) -> u64 {
        self.state.lock().render_passes
    }

    /// Number of times `id` has rendered.
    pub fn render_count(&self, id: ComponentId) -> u64 {
        self.state
            .lock()
            .components
            .get(&id)
            .map(|entry| entry.renders.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Fetch the hook state at `index` of `component`, creating it on first use.
    pub(crate) fn slot<T, F>(&self, component: ComponentId, index: usize, init: F) -> Result<Arc<T>, HookError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let entry = self
            .state
            .lock()
            .components
            .get(&component)
            .cloned()
            .ok_or(HookError::Unmounted(component))?;

        let mut slots = entry.slots.lock();
        if let Some(slot) = slots.get(index) {
            return Arc::clone(slot)
                .downcast::<T>()
                .map_err(|_| HookError::SlotMismatch { component, index });
        }

        let created = Arc::new(init());
        slots.push(created.clone());
        Ok(created)
    }

    /// Render `roots` and their subtrees, then follow up on writes made while
    /// rendering.
    fn render_pass(&self, mut roots: IndexSet<ComponentId>) {
        let mut rounds = 0;
        loop {
            let targets: Vec<ComponentId> = {
                let mut state = self.state.lock();
                let targets: Vec<_> = roots
                    .iter()
                    .copied()
                    .filter(|id| state.components.contains_key(id) && !state.has_ancestor_in(*id, &roots))
                    .collect();
                if targets.is_empty() {
                    return;
                }
                state.render_passes += 1;
                targets
            };

            trace!(components = targets.len(), "render pass");
            for id in targets {
                self.render_subtree(id);
            }

            rounds += 1;
            roots = {
                let mut state = self.state.lock();
                if state.is_deferring() {
                    return;
                }
                std::mem::take(&mut state.dirty)
            };
            if roots.is_empty() {
                return;
            }
            if rounds >= self.max_render_rounds {
                error!(rounds, dropped = roots.len(), "render did not settle; dropping remaining updates");
                return;
            }
        }
    }

    fn render_subtree(&self, id: ComponentId) {
        let Some(host) = self.this.upgrade() else {
            return;
        };
        let Some(entry) = self.state.lock().components.get(&id).cloned() else {
            return;
        };

        self.state.lock().render_depth += 1;
        let _depth = RenderDepth(self);
        {
            let _ctx = RenderContext::enter(host, id);
            (entry.render)();
        }
        entry.renders.fetch_add(1, Ordering::Relaxed);

        let children = self.state.lock().children_of(id);
        for child in children {
            self.render_subtree(child);
        }
    }
}

impl BatchedUpdates for Host {
    fn batched_updates(&self, updates: &mut dyn FnMut()) {
        self.state.lock().batch_depth += 1;
        let scope = BatchScope(self);
        updates();
        drop(scope);
    }
}

/// Closes a batched scope, rendering dirty components if it was outermost.
struct BatchScope<'a>(&'a Host);

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        let dirty = {
            let mut state = self.0.state.lock();
            state.batch_depth -= 1;
            // While unwinding the dirty set is kept for the next pass.
            if state.is_deferring() || std::thread::panicking() {
                return;
            }
            std::mem::take(&mut state.dirty)
        };

        if !dirty.is_empty() {
            self.0.render_pass(dirty);
        }
    }
}

struct RenderDepth<'a>(&'a Host);

impl Drop for RenderDepth<'_> {
    fn drop(&mut self) {
        self.0.state.lock().render_depth -= 1;
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Host")
            .field("components", &state.components.len())
            .field("dirty", &state.dirty.len())
            .field("render_passes", &state.render_passes)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ManualTick;

    fn host() -> Arc<Host> {
        Host::new(Arc::new(ManualTick::new()))
    }

    fn log() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn logging(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl Fn() + Send + Sync + 'static {
        let log = log.clone();
        move || log.lock().push(name)
    }

    #[test]
    fn mount_renders_immediately() {
        let host = host();
        let log = log();
        let id = host.mount(None, logging(&log, "a"));

        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(host.render_count(id), 1);
        assert_eq!(host.render_passes(), 1);
        assert!(host.is_mounted(id));
    }

    #[test]
    fn mark_dirty_outside_batch_renders_now() {
        let host = host();
        let log = log();
        let id = host.mount(None, logging(&log, "a"));

        host.mark_dirty(id);
        assert_eq!(*log.lock(), vec!["a", "a"]);
        assert_eq!(host.render_passes(), 2);
    }

    #[test]
    fn batch_renders_once_per_component() {
        let host = host();
        let log = log();
        let a = host.mount(None, logging(&log, "a"));
        let b = host.mount(None, logging(&log, "b"));
        log.lock().clear();
        let passes = host.render_passes();

        host.batch(|| {
            host.mark_dirty(b);
            host.mark_dirty(a);
            host.mark_dirty(b);
            assert!(log.lock().is_empty());
        });

        assert_eq!(*log.lock(), vec!["b", "a"]);
        assert_eq!(host.render_passes(), passes + 1);
    }

    #[test]
    fn nested_batches_render_at_outermost_end() {
        let host = host();
        let log = log();
        let a = host.mount(None, logging(&log, "a"));
        log.lock().clear();

        host.batch(|| {
            host.batch(|| host.mark_dirty(a));
            assert!(log.lock().is_empty());
        });
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[test]
    fn parent_render_covers_dirty_child() {
        let host = host();
        let log = log();
        let parent = host.mount(None, logging(&log, "parent"));
        let child = host.mount(Some(parent), logging(&log, "child"));
        assert_eq!(*log.lock(), vec!["parent", "child"]);
        log.lock().clear();

        host.batch(|| {
            host.mark_dirty(child);
            host.mark_dirty(parent);
        });
        assert_eq!(*log.lock(), vec!["parent", "child"]);

        log.lock().clear();
        host.mark_dirty(child);
        assert_eq!(*log.lock(), vec!["child"]);
    }

    #[test]
    fn unmount_removes_subtree_and_drops_slots() {
        let host = host();
        let parent = host.mount(None, || {});
        let child = host.mount(Some(parent), || {});

        let slot = host.slot(child, 0, || 5u32).unwrap();
        assert_eq!(Arc::strong_count(&slot), 2);

        host.unmount(parent);
        assert!(!host.is_mounted(parent));
        assert!(!host.is_mounted(child));
        assert_eq!(Arc::strong_count(&slot), 1);
        assert_eq!(host.component_count(), 0);

        // Writes to unmounted components are ignored.
        host.mark_dirty(child);
    }

    #[test]
    fn slots_persist_and_check_type() {
        let host = host();
        let id = host.mount(None, || {});

        let first = host.slot(id, 0, || 1u32).unwrap();
        let again = host.slot(id, 0, || 2u32).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let err = host.slot(id, 0, || "other").unwrap_err();
        assert!(matches!(err, HookError::SlotMismatch { index: 0, .. }));

        let gone = ComponentId::new();
        assert!(matches!(host.slot(gone, 0, || 0u8), Err(HookError::Unmounted(_))));
    }

    #[test]
    fn writes_during_render_follow_up() {
        let host = host();
        let renders = Arc::new(AtomicU64::new(0));
        let counter = renders.clone();
        let weak = Arc::downgrade(&host);
        let id_cell: Arc<Mutex<Option<ComponentId>>> = Arc::new(Mutex::new(None));
        let id_for_render = id_cell.clone();

        let id = host.mount(None, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            // Dirty itself once while rendering.
            if n == 1 {
                if let (Some(host), Some(id)) = (weak.upgrade(), *id_for_render.lock()) {
                    host.mark_dirty(id);
                }
            }
        });
        *id_cell.lock() = Some(id);

        host.mark_dirty(id);
        assert_eq!(renders.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn render_rounds_are_bounded() {
        let config = HostConfig {
            max_render_rounds: 3,
            ..HostConfig::default()
        };
        let host = Host::from_config(&config);
        let renders = Arc::new(AtomicU64::new(0));
        let counter = renders.clone();
        let weak = Arc::downgrade(&host);
        let id_cell: Arc<Mutex<Option<ComponentId>>> = Arc::new(Mutex::new(None));
        let id_for_render = id_cell.clone();

        let id = host.mount(None, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            if let (Some(host), Some(id)) = (weak.upgrade(), *id_for_render.lock()) {
                host.mark_dirty(id);
            }
        });
        *id_cell.lock() = Some(id);

        renders.store(0, Ordering::SeqCst);
        host.mark_dirty(id);
        assert_eq!(renders.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn host_recovers_from_a_panicking_flush() {
        use crate::reactive::SnapshotCell;
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let host = host();
        let log = log();
        let a = host.mount(None, logging(&log, "a"));
        let b = host.mount(None, logging(&log, "b"));
        log.lock().clear();

        let cell = Arc::new(SnapshotCell::owned_by(&host, a));
        let written = cell.clone();
        host.scheduler().enqueue(move || written.set(1));
        host.scheduler().enqueue(|| panic!("snapshot write failed"));

        let result = catch_unwind(AssertUnwindSafe(|| host.drain_ticks()));
        assert!(result.is_err());
        assert!(log.lock().is_empty());
        assert_eq!(cell.get_or(&0), 1);

        // The next render picks up the component the failed batch dirtied.
        host.mark_dirty(b);
        assert_eq!(*log.lock(), vec!["a", "b"]);

        // Later flushes batch as usual.
        log.lock().clear();
        let passes = host.render_passes();
        let written = cell.clone();
        host.scheduler().enqueue(move || written.set(2));
        assert_eq!(host.drain_ticks(), 1);
        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(host.render_passes(), passes + 1);
    }
}
