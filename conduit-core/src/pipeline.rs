//! `PipelineLayout` and `Pipeline` (§4.3): the template/instance split that
//! lets a hot pipeline be allocated by cloning prototypes and recycled
//! without re-parsing configuration.
//!
//! Filters form a forward-only chain (`filter[i].output -> filter[i+1]`);
//! the last filter's output is chained to a `TailNode` owned by the
//! `Pipeline`, never back to the `Pipeline` itself, so there is no
//! ownership cycle (§9, "shared mutable graphs").

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::config::PIPELINE_POOL_CAP;
use crate::error::{CoreError, StreamErrorKind};
use crate::event::Event;
use crate::filter::{Filter, FilterSlot};
use crate::io::{Input, InputHandle, OutputPort};

/// The kind of root a `PipelineLayout` serves, mirroring the four contexts
/// a pipeline can be instantiated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutType {
    Named,
    Listen,
    Read,
    Task,
}

/// The opaque scripting/environment handle attached to each `Pipeline`.
/// The scripting VM itself is out of scope; this is the seam the host
/// would hang its own state from.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub id: u64,
}

/// Lifecycle state of a live `Pipeline` (pooled pipelines are not
/// represented by a live `Pipeline` value at all; they live in the
/// layout's free list as fully-reset instances, so this only distinguishes
/// `Running` from `Draining`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
}

/// Immutable-after-bind template for instantiating `Pipeline`s.
pub struct PipelineLayout {
    name: String,
    ty: LayoutType,
    prototypes: RefCell<Vec<Box<dyn Filter>>>,
    bound: Cell<bool>,
    pool: RefCell<Vec<Pipeline>>,
    live: RefCell<Vec<Weak<PipelineHandle>>>,
    allocated: Cell<usize>,
    /// Child layouts a filter in this layout may spawn sub-pipelines from,
    /// referenced by integer index resolved at bind time (§9, "sub-pipeline
    /// factories indexed by integer").
    children: RefCell<Vec<Rc<PipelineLayout>>>,
}

impl PipelineLayout {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: LayoutType) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            ty,
            prototypes: RefCell::new(Vec::new()),
            bound: Cell::new(false),
            pool: RefCell::new(Vec::new()),
            live: RefCell::new(Vec::new()),
            allocated: Cell::new(0),
            children: RefCell::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn layout_type(&self) -> LayoutType {
        self.ty
    }

    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated.get()
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.live.borrow().iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Number of recycled, reset `Pipeline` instances currently sitting in
    /// the free pool (capped at [`PIPELINE_POOL_CAP`]).
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.pool.borrow().len()
    }

    /// Append a filter prototype. Only valid before `bind()`.
    ///
    /// # Panics
    ///
    /// Panics if called after the layout has been bound; this is a
    /// programming error in the caller, not a runtime condition.
    pub fn append(&self, filter: Box<dyn Filter>) {
        assert!(!self.bound.get(), "cannot append filters to a bound layout");
        self.prototypes.borrow_mut().push(filter);
    }

    /// Register a child layout a filter in this layout may spawn
    /// sub-pipelines from, returning the index `Filter::bind_children`
    /// receivers use to reach it via `SubPipelineFactory::sub_pipeline`.
    /// Only valid before `bind()`.
    ///
    /// # Panics
    ///
    /// Panics if called after the layout has been bound.
    pub fn add_child(&self, layout: Rc<PipelineLayout>) -> usize {
        assert!(!self.bound.get(), "cannot add a child layout to a bound layout");
        let mut children = self.children.borrow_mut();
        children.push(layout);
        children.len() - 1
    }

    /// The child layout registered at `index`, if any.
    #[must_use]
    pub fn child(&self, index: usize) -> Option<Rc<PipelineLayout>> {
        self.children.borrow().get(index).cloned()
    }

    /// Freeze the filter sequence. Idempotent.
    pub fn bind(&self) {
        self.bound.set(true);
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound.get()
    }

    /// Allocate a `Pipeline`: pop from the free pool if non-empty, else
    /// clone every filter prototype and wire them in a chain whose last
    /// filter's output feeds a fresh `TailNode`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnboundLayout`] if `bind()` was never called.
    pub fn alloc(
        self: &Rc<Self>,
        ctx: Context,
        downstream: OutputPort,
    ) -> Result<Rc<PipelineHandle>, CoreError> {
        if !self.bound.get() {
            return Err(CoreError::UnboundLayout {
                name: self.name.clone(),
            });
        }

        let recycled = self.pool.borrow_mut().pop();
        let pipeline = recycled.unwrap_or_else(|| self.construct());

        self.allocated.set(self.allocated.get() + 1);

        let handle = Rc::new(PipelineHandle {
            layout: self.clone(),
            pipeline: RefCell::new(Some(pipeline)),
            state: Cell::new(PipelineState::Running),
        });

        handle.pipeline_ref(|p| {
            *p.context.borrow_mut() = ctx;
            p.tail.output.chain_output(downstream);
        });

        self.live.borrow_mut().push(Rc::downgrade(&handle));
        self.live.borrow_mut().retain(|w| w.strong_count() > 0);

        Ok(handle)
    }

    fn construct(self: &Rc<Self>) -> Pipeline {
        let prototypes = self.prototypes.borrow();
        let slots: Vec<Rc<FilterSlot>> = prototypes
            .iter()
            .map(|p| FilterSlot::new(p.clone_filter()))
            .collect();
        drop(prototypes);

        let tail = Rc::new(TailNode::new());

        let mut next_input: InputHandle = tail.clone();
        for slot in slots.iter().rev() {
            let out = slot.output();
            out.chain(next_input);
            slot.chain(out);
            next_input = slot.clone();
        }

        let head = if slots.is_empty() {
            tail.clone() as InputHandle
        } else {
            slots[0].clone() as InputHandle
        };

        let context = Rc::new(RefCell::new(Context::default()));
        for slot in &slots {
            slot.bind_children(SubPipelineFactory {
                layout: self.clone(),
                ctx: context.clone(),
            });
        }

        Pipeline {
            filters: slots,
            head,
            tail,
            context,
        }
    }

    /// Recycle `pipeline`: reset every filter in reverse order, unlink the
    /// output, and return it to the pool (capped; surplus is dropped).
    fn free(&self, mut pipeline: Pipeline) {
        for slot in pipeline.filters.iter().rev() {
            slot.reset();
        }
        pipeline.tail.output.unchain_output();

        let mut pool = self.pool.borrow_mut();
        if pool.len() < PIPELINE_POOL_CAP {
            pool.push(pipeline);
        } else {
            drop(pipeline);
        }
    }

    /// Signal every live pipeline to drain (`StreamEnd{graceful}` into
    /// their head). Freed pipelines already back in the pool are
    /// unaffected.
    pub fn shutdown(self: &Rc<Self>) {
        for weak in self.live.borrow().iter() {
            if let Some(handle) = weak.upgrade() {
                handle.shutdown();
            }
        }
    }
}

/// An externally-visible, ref-counted `Pipeline` instantiation. The inner
/// `Pipeline` is taken out on `free()` so the same layout-owned storage is
/// reused without double-borrowing across the handle boundary.
pub struct PipelineHandle {
    layout: Rc<PipelineLayout>,
    pipeline: RefCell<Option<Pipeline>>,
    state: Cell<PipelineState>,
}

impl PipelineHandle {
    fn pipeline_ref<R>(&self, f: impl FnOnce(&Pipeline) -> R) -> R {
        let guard = self.pipeline.borrow();
        f(guard.as_ref().expect("pipeline accessed after free"))
    }

    #[must_use]
    pub fn layout(&self) -> &Rc<PipelineLayout> {
        &self.layout
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    #[must_use]
    pub fn head(&self) -> InputHandle {
        self.pipeline_ref(|p| p.head.clone())
    }

    /// The `Context` bound to this instantiation, made available to the
    /// (out-of-scope) scripting host per §6.
    #[must_use]
    pub fn context(&self) -> Context {
        self.pipeline_ref(|p| p.context.borrow().clone())
    }

    /// Emit `StreamEnd{graceful}` through the head, marking this pipeline
    /// as draining.
    pub fn shutdown(self: &Rc<Self>) {
        self.state.set(PipelineState::Draining);
        let head = self.head();
        head.input(Event::stream_end(StreamErrorKind::Graceful));
    }

    /// Reset all filters and return the underlying `Pipeline` storage to
    /// the owning layout's pool.
    pub fn free(&self) {
        if let Some(pipeline) = self.pipeline.borrow_mut().take() {
            self.layout.free(pipeline);
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.free();
    }
}

/// A live instantiation of a layout: a filter chain plus the forwarding
/// `TailNode` every chain's last filter feeds.
struct Pipeline {
    filters: Vec<Rc<FilterSlot>>,
    head: InputHandle,
    tail: Rc<TailNode>,
    context: Rc<RefCell<Context>>,
}

/// Forwards events off the end of a filter chain to the pipeline's
/// downstream output. Exists so the last filter always has something
/// concrete to chain to, even when the layout has zero filters.
struct TailNode {
    output: OutputPort,
}

impl TailNode {
    fn new() -> Self {
        Self {
            output: OutputPort::new(),
        }
    }
}

// `OutputPort` already exposes `chain`/`unchain`; these aliases read better
// at the pipeline's own chain/unchain call sites.
impl OutputPort {
    fn chain_output(&self, downstream: OutputPort) {
        if let Some(target) = downstream.target() {
            self.chain(target);
        } else {
            self.unchain();
        }
    }

    fn unchain_output(&self) {
        self.unchain();
    }
}

impl Input for TailNode {
    fn input(self: Rc<Self>, evt: Event) {
        self.output.emit(evt);
    }
}

/// Handed to a `Filter` via [`Filter::bind_children`]: lets it instantiate
/// the sub-pipelines its owning layout registered for it via
/// [`PipelineLayout::add_child`] (§4.4, §9 "sub-pipeline factories indexed
/// by integer"). One factory is bound per filter instance, once, when its
/// owning `Pipeline` is first constructed; it stays valid across that
/// pipeline's pool recycling because it holds the same `Rc<RefCell<Context>>`
/// the owning `Pipeline` mutates on every `alloc()`.
#[derive(Clone)]
pub struct SubPipelineFactory {
    layout: Rc<PipelineLayout>,
    ctx: Rc<RefCell<Context>>,
}

impl fmt::Debug for SubPipelineFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubPipelineFactory").field("layout", &self.layout.name()).finish()
    }
}

impl SubPipelineFactory {
    /// Instantiate the child layout registered at `index` on this filter's
    /// owning layout. The new sub-pipeline's output is wired to
    /// `output_sink`; its input is the caller's (`PipelineHandle::head`) to
    /// write into. If `recycle_on_end`, the sub-pipeline frees itself back
    /// to its layout's pool the moment its own output stream closes
    /// (`MessageEnd`/`StreamEnd`) instead of requiring the caller to call
    /// `free()` explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InternalInvariant`] if `index` has no
    /// registered child layout, or propagates [`CoreError::UnboundLayout`]
    /// from the child layout's own `alloc`.
    pub fn sub_pipeline(
        &self,
        index: usize,
        recycle_on_end: bool,
        output_sink: OutputPort,
    ) -> Result<Rc<PipelineHandle>, CoreError> {
        let child = self
            .layout
            .child(index)
            .ok_or(CoreError::InternalInvariant("no child layout registered at that index"))?;
        let ctx = self.ctx.borrow().clone();

        if !recycle_on_end {
            return child.alloc(ctx, output_sink);
        }

        let gate = Rc::new(RecycleGate {
            inner: output_sink,
            handle: RefCell::new(None),
        });
        let wrapped = OutputPort::new();
        wrapped.chain(gate.clone());
        let handle = child.alloc(ctx, wrapped)?;
        *gate.handle.borrow_mut() = Some(Rc::downgrade(&handle));
        Ok(handle)
    }
}

/// Forwards events to the caller-supplied sink, then frees the sub-pipeline
/// it is attached to once that pipeline's own output stream closes.
struct RecycleGate {
    inner: OutputPort,
    handle: RefCell<Option<Weak<PipelineHandle>>>,
}

impl Input for RecycleGate {
    fn input(self: Rc<Self>, evt: Event) {
        let closing = evt.is_message_end() || evt.is_stream_end();
        self.inner.emit(evt);
        if closing {
            if let Some(handle) = self.handle.borrow().as_ref().and_then(Weak::upgrade) {
                handle.free();
            }
        }
    }
}
