//! Render Context
//!
//! The render context tracks which component is currently rendering. Hooks
//! use it to find the component they belong to and the slot they occupy.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Rendering a component pushes a frame
//! holding the host, the component id and a hook cursor; each hook call takes
//! the next slot index from the top frame. The frame is popped when the guard
//! is dropped.
//!
//! A stack (rather than a single slot) supports a component being rendered
//! while another render is in progress on the same thread.

use std::cell::RefCell;
use std::sync::Arc;

use super::runtime::Host;
use super::ComponentId;

thread_local! {
    static RENDER_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

struct Frame {
    host: Arc<Host>,
    component: ComponentId,
    /// Index of the next hook slot.
    cursor: usize,
}

/// Guard that pops the render frame when dropped.
///
/// The stack stays balanced even if the render function panics.
pub struct RenderContext {
    component: ComponentId,
}

impl RenderContext {
    /// Enter a render frame for `component` of `host`.
    pub fn enter(host: Arc<Host>, component: ComponentId) -> Self {
        RENDER_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                host,
                component,
                cursor: 0,
            });
        });

        Self { component }
    }

    /// Check if a component is rendering on this thread.
    pub fn is_active() -> bool {
        RENDER_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The component currently rendering, if any.
    pub fn current_component() -> Option<ComponentId> {
        RENDER_STACK.with(|stack| stack.borrow().last().map(|frame| frame.component))
    }

    /// Claim the next hook slot of the current frame.
    ///
    /// Returns the host, the component and the slot index.
    pub(crate) fn next_slot() -> Option<(Arc<Host>, ComponentId, usize)> {
        RENDER_STACK.with(|stack| {
            stack.borrow_mut().last_mut().map(|frame| {
                let index = frame.cursor;
                frame.cursor += 1;
                (Arc::clone(&frame.host), frame.component, index)
            })
        })
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        let popped = RENDER_STACK.with(|stack| stack.borrow_mut().pop());

        if let Some(frame) = popped {
            debug_assert_eq!(
                frame.component, self.component,
                "RenderContext mismatch: expected {}, got {}",
                self.component, frame.component
            );
        }
    }
}
