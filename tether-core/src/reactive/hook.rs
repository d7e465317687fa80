//! The `use_subscribe` hook.
//!
//! Called from a component's render function, `use_subscribe` keeps a
//! [`Binding`] in the component's hook slot, syncs it with the current source
//! and dependency key, and returns the cell's value (or the default).
//!
//! ```rust,ignore
//! host.mount(None, move || {
//!     let name = use_subscribe(
//!         Some(&store),
//!         query(|tx: ReadTransaction| async move { tx.get_as::<String>("name") }),
//!         SubscribeOptions::with_default(None).dependencies([json!(user_id)]),
//!     );
//!     render_name(name);
//! });
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use super::binding::Binding;
use super::cell::SnapshotCell;
use super::context::RenderContext;
use super::options::SubscribeOptions;
use crate::error::HookError;
use crate::source::{Query, SubscriptionSource};

/// Hook state stored in a component slot.
struct SubscribeHook<S, R>
where
    S: SubscriptionSource,
    R: Clone + Send + Sync + 'static,
{
    binding: Mutex<Binding<S, R>>,
}

/// Subscribe the rendering component to `query` on `source`.
///
/// Must be called during a render, at the same position on every render.
/// Returns the most recently flushed result, or the default while there is
/// none (including while `source` is `None`).
pub fn try_use_subscribe<S, R>(
    source: Option<&Arc<S>>,
    query: Query<S::Tx, R>,
    options: impl Into<SubscribeOptions<R>>,
) -> Result<R, HookError>
where
    S: SubscriptionSource,
    R: Clone + Send + Sync + 'static,
{
    let options = options.into();
    let (host, component, index) = RenderContext::next_slot().ok_or(HookError::OutsideRender)?;

    let hook = host.slot(component, index, || {
        let cell = Arc::new(SnapshotCell::owned_by(&host, component));
        SubscribeHook {
            binding: Mutex::new(Binding::<S, R>::new(cell, Arc::clone(host.scheduler()))),
        }
    })?;

    let mut binding = hook.binding.lock();
    binding.sync(source, &query, options.deps(), options.equality());
    Ok(binding.cell().get_or(options.default_value()))
}

/// Like [`try_use_subscribe`], panicking on hook misuse.
pub fn use_subscribe<S, R>(
    source: Option<&Arc<S>>,
    query: Query<S::Tx, R>,
    options: impl Into<SubscribeOptions<R>>,
) -> R
where
    S: SubscriptionSource,
    R: Clone + Send + Sync + 'static,
{
    match try_use_subscribe(source, query, options) {
        Ok(value) => value,
        Err(err) => panic!("use_subscribe: {err}"),
    }
}
