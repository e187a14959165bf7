//! The `Filter` contract every pipeline stage honors (§4.4).

use std::fmt;
use std::rc::Rc;

use crate::event::Event;
use crate::io::{Input, OutputPort};
use crate::pipeline::SubPipelineFactory;

/// A stateful event transformer with exactly one upstream input and one
/// downstream output. Filters are cloned per `Pipeline` instantiation from
/// a layout-owned prototype (`clone`), wired together by the layout
/// (`chain`), driven by `process`, and returned to a blank slate on
/// recycling (`reset`).
pub trait Filter: fmt::Debug {
    /// Produce a fresh prototype copy suitable for a new `Pipeline`
    /// instantiation. Per-invocation state must not be shared with the
    /// original.
    fn clone_filter(&self) -> Box<dyn Filter>;

    /// Called once after the owning `Pipeline` has wired this filter's
    /// `output` to the next filter's input. Most filters stash `_output`
    /// for use from `process`; a few have nothing to do here at all.
    fn chain(&mut self, _output: OutputPort) {}

    /// Called once, at the same point as `chain`, with a factory this
    /// filter can stash and call from `process` to spawn sub-pipelines
    /// registered on its owning layout (§4.4, §9). Most filters have no
    /// sub-pipelines and leave this as a no-op.
    fn bind_children(&mut self, _factory: SubPipelineFactory) {}

    /// Return this filter to a blank slate suitable for reuse from the
    /// owning layout's pool.
    fn reset(&mut self);

    /// The sink every upstream edge writes into.
    fn process(&mut self, evt: Event);

    /// A short diagnostic name, used for pipeline graphing/tracing.
    fn dump(&self) -> &'static str;
}

/// Adapter so a `Box<dyn Filter>` behind an `Rc<RefCell<_>>` can serve as an
/// [`Input`] target for an upstream [`OutputPort`]. Pipelines wrap each
/// filter slot in this to present a uniform `Input` edge regardless of the
/// concrete filter type.
pub struct FilterSlot {
    filter: std::cell::RefCell<Box<dyn Filter>>,
    output: OutputPort,
}

impl fmt::Debug for FilterSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSlot")
            .field("filter", &self.filter.borrow().dump())
            .finish()
    }
}

impl FilterSlot {
    #[must_use]
    pub fn new(filter: Box<dyn Filter>) -> Rc<Self> {
        Rc::new(Self {
            filter: std::cell::RefCell::new(filter),
            output: OutputPort::new(),
        })
    }

    #[must_use]
    pub fn output(&self) -> OutputPort {
        self.output.clone()
    }

    pub fn chain(&self, next: OutputPort) {
        self.filter.borrow_mut().chain(next);
    }

    pub fn bind_children(&self, factory: SubPipelineFactory) {
        self.filter.borrow_mut().bind_children(factory);
    }

    pub fn reset(&self) {
        self.filter.borrow_mut().reset();
    }

    #[must_use]
    pub fn dump(&self) -> &'static str {
        self.filter.borrow().dump()
    }
}

impl Input for FilterSlot {
    fn input(self: Rc<Self>, evt: Event) {
        // Filters write downstream through their own `output` field inside
        // `process`; here we only drive the sink. Filters that need to emit
        // call `self.output.emit(..)` from within `process`, so `process`
        // itself must have access to the same `OutputPort` this slot holds.
        // Concrete filters receive it via `chain`, stashing it for use
        // inside `process`.
        self.filter.borrow_mut().process(evt);
    }
}
