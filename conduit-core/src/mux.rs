//! Stream multiplexing (§4.8): fold many independent upstream logical
//! streams down onto a small number of shared downstream "sessions",
//! keyed by whatever the caller chooses (destination address, routing
//! key, ...). Sessions are reference-counted and released once their last
//! upstream stream detaches.
//!
//! `Merge` fans every inbound event two ways (§4.8): cloned into the
//! `Session` as a buffered burst, and passed through unchanged to its own
//! downstream. A stream is buffered in full before being forwarded to the
//! shared session as a single burst, so a session never observes a
//! partially-written message interleaved with another stream's bytes. The
//! reference only flushes a buffered stream if it actually saw a
//! `MessageStart` — a stream that never started (e.g. one that only ever
//! saw a stray `StreamEnd`) produces no burst at all, though the original
//! event is still passed downstream either way.

use hashbrown::HashMap;
use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use crate::buffer::Data;
use crate::event::Event;
use crate::io::{Input, OutputPort};
use crate::pipeline::{Context, PipelineHandle, PipelineLayout};

/// A shared downstream pipeline instance, reference-counted across however
/// many upstream streams currently share it.
pub struct Session {
    pipeline: Rc<PipelineHandle>,
    refs: RefCell<usize>,
}

impl Session {
    #[must_use]
    pub fn head(&self) -> crate::io::InputHandle {
        self.pipeline.head()
    }

    #[must_use]
    pub fn ref_count(&self) -> usize {
        *self.refs.borrow()
    }

    fn retain(&self) {
        *self.refs.borrow_mut() += 1;
    }

    /// Returns `true` if this was the last reference (caller should drop
    /// the session from its keyed map).
    fn release(&self) -> bool {
        let mut refs = self.refs.borrow_mut();
        *refs = refs.saturating_sub(1);
        *refs == 0
    }
}

/// Keyed pool of [`Session`]s, each backed by a pipeline allocated from a
/// shared layout.
pub struct MuxCore<K> {
    layout: Rc<PipelineLayout>,
    downstream: OutputPort,
    sessions: RefCell<HashMap<K, Rc<Session>>>,
}

impl<K: Eq + Hash + Clone> MuxCore<K> {
    #[must_use]
    pub fn new(layout: Rc<PipelineLayout>, downstream: OutputPort) -> Rc<Self> {
        Rc::new(Self {
            layout,
            downstream,
            sessions: RefCell::new(HashMap::new()),
        })
    }

    /// Open (or join) the session for `key`, allocating a fresh pipeline on
    /// first use.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::error::CoreError::UnboundLayout`] if the
    /// underlying layout was never bound.
    pub fn open(&self, key: K) -> Result<Rc<Session>, crate::error::CoreError> {
        if let Some(existing) = self.sessions.borrow().get(&key) {
            existing.retain();
            return Ok(existing.clone());
        }
        let handle = self.layout.alloc(Context::default(), self.downstream.clone())?;
        let session = Rc::new(Session {
            pipeline: handle,
            refs: RefCell::new(1),
        });
        self.sessions.borrow_mut().insert(key, session.clone());
        Ok(session)
    }

    /// Release one reference to `key`'s session. Frees the session's
    /// pipeline back to the layout pool once the last reference drops.
    pub fn close(&self, key: &K) {
        let done = self
            .sessions
            .borrow()
            .get(key)
            .is_some_and(|s| s.release());
        if done {
            if let Some(session) = self.sessions.borrow_mut().remove(key) {
                session.pipeline.free();
            }
        }
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }
}

/// Per-upstream-stream adapter that both buffers one logical message in
/// full for a shared [`Session`] and fans the original event straight
/// through to its own downstream.
///
/// Mirrors the reference `Merge::Stream`: `Data` is only accumulated once a
/// `MessageStart` has been observed, and the burst (`MessageStart` +
/// buffered `Data` + `MessageEnd`) is only emitted to the session if that
/// guard held — but every event reaches `out` regardless, since Merge is a
/// fan-out, not a diversion.
pub struct MergeStream {
    session: Weak<Session>,
    out: OutputPort,
    started: RefCell<bool>,
    buffer: RefCell<Data>,
}

impl MergeStream {
    #[must_use]
    pub fn new(session: &Rc<Session>, out: OutputPort) -> Self {
        Self {
            session: Rc::downgrade(session),
            out,
            started: RefCell::new(false),
            buffer: RefCell::new(Data::new()),
        }
    }

    /// Feed one upstream event. Returns `true` if a burst was flushed to
    /// the session (useful for tests asserting the start-guard). The event
    /// itself is always re-emitted to `out`, independent of that guard.
    pub fn on_event(&self, evt: Event) -> bool {
        let flushed = match &evt {
            Event::MessageStart(_) => {
                *self.started.borrow_mut() = true;
                self.buffer.borrow_mut().clear();
                false
            }
            Event::Data(data) => {
                if *self.started.borrow() {
                    self.buffer.borrow_mut().push(data.clone());
                }
                false
            }
            Event::MessageEnd(_) | Event::StreamEnd(_) => self.flush(),
        };
        self.out.emit(evt);
        flushed
    }

    fn flush(&self) -> bool {
        if !*self.started.borrow() {
            return false;
        }
        *self.started.borrow_mut() = false;
        let Some(session) = self.session.upgrade() else {
            self.buffer.borrow_mut().clear();
            return false;
        };
        let head = session.head();
        head.clone().input(Event::message_start());
        let payload = std::mem::replace(&mut *self.buffer.borrow_mut(), Data::new());
        if !payload.empty() {
            head.clone().input(Event::data(payload));
        }
        head.input(Event::message_end());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::pipeline::LayoutType;
    use std::cell::RefCell as StdRefCell;

    #[derive(Debug, Default)]
    struct Collect {
        out: OutputPort,
    }

    impl Filter for Collect {
        fn clone_filter(&self) -> Box<dyn Filter> {
            Box::new(Collect::default())
        }
        fn chain(&mut self, output: OutputPort) {
            self.out = output;
        }
        fn reset(&mut self) {}
        fn process(&mut self, evt: Event) {
            self.out.emit(evt);
        }
        fn dump(&self) -> &'static str {
            "collect"
        }
    }

    #[derive(Default)]
    struct Recorder {
        tags: StdRefCell<Vec<&'static str>>,
    }

    impl Input for Recorder {
        fn input(self: Rc<Self>, evt: Event) {
            let tag = match evt {
                Event::MessageStart(_) => "start",
                Event::Data(_) => "data",
                Event::MessageEnd(_) => "end",
                Event::StreamEnd(_) => "stream_end",
            };
            self.tags.borrow_mut().push(tag);
        }
    }

    fn layout() -> Rc<PipelineLayout> {
        let layout = PipelineLayout::new("mux-test", LayoutType::Named);
        layout.append(Box::new(Collect::default()));
        layout.bind();
        layout
    }

    #[test]
    fn two_streams_share_one_session() {
        let recorder = Rc::new(Recorder::default());
        let downstream = OutputPort::new();
        downstream.chain(recorder.clone());
        let mux: Rc<MuxCore<&'static str>> = MuxCore::new(layout(), downstream);

        let session_a = mux.open("peer-1").unwrap();
        let session_b = mux.open("peer-1").unwrap();
        assert_eq!(session_a.ref_count(), 2);
        assert!(Rc::ptr_eq(&session_a, &session_b));
        assert_eq!(mux.session_count(), 1);

        mux.close(&"peer-1");
        assert_eq!(mux.session_count(), 1, "one reference still outstanding");
        mux.close(&"peer-1");
        assert_eq!(mux.session_count(), 0);
    }

    #[test]
    fn merge_stream_buffers_and_flushes_as_one_burst() {
        let recorder = Rc::new(Recorder::default());
        let downstream = OutputPort::new();
        downstream.chain(recorder.clone());
        let mux: Rc<MuxCore<u32>> = MuxCore::new(layout(), downstream);
        let session = mux.open(1).unwrap();

        let fanout = Rc::new(Recorder::default());
        let fanout_port = OutputPort::new();
        fanout_port.chain(fanout.clone());

        let stream = MergeStream::new(&session, fanout_port);
        stream.on_event(Event::message_start());
        stream.on_event(Event::data(Data::from(&b"ab"[..])));
        stream.on_event(Event::data(Data::from(&b"cd"[..])));
        let flushed = stream.on_event(Event::message_end());

        assert!(flushed);
        assert_eq!(*recorder.tags.borrow(), vec!["start", "data", "end"]);
        assert_eq!(
            *fanout.tags.borrow(),
            vec!["start", "data", "data", "end"],
            "every inbound event must also reach the stream's own downstream"
        );
    }

    #[test]
    fn merge_stream_without_start_never_flushes_but_still_fans_out() {
        let recorder = Rc::new(Recorder::default());
        let downstream = OutputPort::new();
        downstream.chain(recorder.clone());
        let mux: Rc<MuxCore<u32>> = MuxCore::new(layout(), downstream);
        let session = mux.open(1).unwrap();

        let fanout = Rc::new(Recorder::default());
        let fanout_port = OutputPort::new();
        fanout_port.chain(fanout.clone());

        let stream = MergeStream::new(&session, fanout_port);
        let flushed = stream.on_event(Event::message_end());

        assert!(!flushed);
        assert!(recorder.tags.borrow().is_empty(), "session never saw a MessageStart");
        assert_eq!(
            *fanout.tags.borrow(),
            vec!["end"],
            "fan-out passes the event through regardless of the session guard"
        );
    }
}
