//! Event linkage: one-way `Input` ports, re-targetable `Output` ports, and
//! the re-entrancy guard (`InputContext`) that bounds dispatch depth.
//!
//! Everything here is single-threaded by design (§5): a `Pipeline` and its
//! `Filter`s never cross a thread boundary, so `Rc`/`RefCell` are the right
//! tools, not `Arc`/`Mutex`. This mirrors the teacher's `PoisonGuard`
//! RAII idiom (`poison.rs`): entering sets up state that is undone on scope
//! exit, not by an explicit "finally" the caller must remember to call.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::config::DISPATCH_DEPTH_LIMIT;
use crate::event::Event;

/// A one-way port that accepts events.
pub trait Input {
    fn input(self: Rc<Self>, evt: Event);
}

/// A handle to an `Input`, used as the target of an `Output` edge.
pub type InputHandle = Rc<dyn Input>;

/// A re-targetable output edge: an `Input` that can be rewired to point at
/// a different downstream `Input`.
#[derive(Clone, Default)]
pub struct OutputPort {
    target: Rc<RefCell<Option<InputHandle>>>,
}

impl fmt::Debug for OutputPort {
    /// The target itself (a `dyn Input`) carries no useful debug
    /// representation, so this only reports whether the edge is wired —
    /// enough for filters that embed an `OutputPort` to derive `Debug`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort").field("chained", &self.is_chained()).finish()
    }
}

impl OutputPort {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point this output at a new downstream input.
    pub fn chain(&self, input: InputHandle) {
        *self.target.borrow_mut() = Some(input);
    }

    /// Disconnect this output.
    pub fn unchain(&self) {
        *self.target.borrow_mut() = None;
    }

    #[must_use]
    pub fn is_chained(&self) -> bool {
        self.target.borrow().is_some()
    }

    /// The current downstream target, if any.
    #[must_use]
    pub fn target(&self) -> Option<InputHandle> {
        self.target.borrow().clone()
    }

    /// Emit an event through this output, respecting the re-entrancy
    /// discipline of [`InputContext`]. Silently dropped if unchained (a
    /// filter that outputs before `chain()` has no observable effect, which
    /// matches the teacher's "drop silently" posture for unreachable
    /// targets, e.g. `router.rs`'s unknown routing id).
    pub fn emit(&self, evt: Event) {
        if let Some(input) = self.target.borrow().clone() {
            InputContext::dispatch(input, evt);
        }
    }
}

thread_local! {
    static DISPATCH_DEPTH: RefCell<usize> = const { RefCell::new(0) };
    static FLUSH_QUEUE: RefCell<Vec<(InputHandle, Event)>> = RefCell::new(Vec::new());
}

/// Scoped re-entrancy guard for event dispatch.
///
/// Every call into an `Input` goes through [`InputContext::dispatch`],
/// which enters a guard, bumping a per-thread depth counter; while depth
/// exceeds [`DISPATCH_DEPTH_LIMIT`], further dispatches are deferred to a
/// FIFO flush queue instead of being delivered inline. On scope exit
/// (depth back to zero), the queue drains in enqueue order. This bounds
/// native call-stack depth for pipelines that re-enter their own input
/// from within a downstream callback, without requiring any filter author
/// to reason about synchronous back-propagation.
pub struct InputContext;

impl InputContext {
    /// Dispatch `evt` into `input`, applying the re-entrancy discipline.
    pub fn dispatch(input: InputHandle, evt: Event) {
        let depth = DISPATCH_DEPTH.with(|d| *d.borrow());
        if depth >= DISPATCH_DEPTH_LIMIT {
            FLUSH_QUEUE.with(|q| q.borrow_mut().push((input, evt)));
            return;
        }

        let _guard = DepthGuard::enter();
        input.input(evt);
        // The guard drains the flush queue on scope exit once depth
        // returns to zero (see `DepthGuard::drop`).
    }
}

/// RAII depth counter, modeled directly on `PoisonGuard`: entering sets up
/// state unconditionally; `Drop` restores it, draining the flush queue only
/// when this is the outermost guard.
struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        DISPATCH_DEPTH.with(|d| *d.borrow_mut() += 1);
        Self
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let now_zero = DISPATCH_DEPTH.with(|d| {
            let mut d = d.borrow_mut();
            *d -= 1;
            *d == 0
        });
        if now_zero {
            drain_flush_queue();
        }
    }
}

fn drain_flush_queue() {
    loop {
        let next = FLUSH_QUEUE.with(|q| {
            let mut q = q.borrow_mut();
            if q.is_empty() {
                None
            } else {
                Some(q.remove(0))
            }
        });
        let Some((input, evt)) = next else { break };
        let _guard = DepthGuard::enter();
        input.input(evt);
    }
}
