//! Render-context discipline
//!
//! The host holds an internal lock for the whole duration of a render
//! callback, and the same lock is needed to create, start, stop or dispose an
//! output unit. Two rules follow:
//!
//! 1. The render callback is a non-blocking leaf. It must not wait on any lock
//!    that a thread creating or tearing down a stream might hold, directly or
//!    transitively.
//! 2. Control-plane operations may block on the host, so they must never run
//!    inside a render callback.
//!
//! Rule 1 cannot be checked by the compiler or the host; it is a convention
//! exercised by the lock-order tests. Rule 2 is enforced here: the dispatch
//! layer marks the render thread while a client callback runs, and control
//! operations refuse to proceed from a marked thread instead of deadlocking
//! on the host lock the thread already holds.

use std::cell::Cell;
use std::marker::PhantomData;

use crate::audio::error::{AudioError, Result};

thread_local! {
    static RENDER_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as running a render callback until dropped
pub(crate) struct RenderScope {
    // Tied to the thread whose counter it bumped
    _not_send: PhantomData<*const ()>,
}

impl RenderScope {
    pub(crate) fn enter() -> Self {
        RENDER_DEPTH.with(|depth| depth.set(depth.get() + 1));
        RenderScope {
            _not_send: PhantomData,
        }
    }
}

impl Drop for RenderScope {
    fn drop(&mut self) {
        RENDER_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Whether the calling thread is currently inside a render callback
pub fn in_render_context() -> bool {
    RENDER_DEPTH.with(|depth| depth.get() > 0)
}

/// Refuse a control-plane operation issued from inside a render callback
pub(crate) fn ensure_control_context(operation: &'static str) -> Result<()> {
    if in_render_context() {
        return Err(AudioError::RenderContextViolation { operation });
    }
    Ok(())
}
