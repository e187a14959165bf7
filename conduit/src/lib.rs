//! # Conduit
//!
//! The event-streaming dataflow runtime for a programmable network-traffic
//! proxy: a typed event model over ref-counted buffers, pooled pipeline
//! instantiation, stream demux/mux, and wire-protocol codecs built on top
//! of it.
//!
//! This crate is the public assembly point over two internal layers:
//!
//! - **`conduit-core`**: the event model, `Pipeline`/`PipelineLayout`,
//!   `Filter` contract, demux/mux, deframing driver, and worker-thread
//!   model. Always available, re-exported wholesale as [`core`].
//! - **`conduit-bgp`** (feature `bgp`, on by default): the BGP-4 wire codec
//!   and its `BgpDecoder`/`BgpEncoder` filters, the worked protocol example
//!   from the design (re-exported as [`bgp`] when the feature is enabled).
//! - **`conduit-haproxy`** (feature `haproxy`, on by default): the PROXY
//!   protocol (v1/v2) header decoder and its `HaproxyDecoder` filter
//!   (re-exported as [`haproxy`] when the feature is enabled).
//!
//! The raw socket/TLS/listener layer, the embedded scripting host that
//! drives user filters, and the CLI/configuration/management surface are
//! deliberately out of scope here — this crate only hosts the event-flow
//! kernel those collaborators plug into.
//!
//! ## Quick start
//!
//! Build a layout, append filters, bind it, and allocate a pipeline:
//!
//! ```rust
//! use conduit::core::prelude::*;
//! use std::rc::Rc;
//!
//! #[derive(Debug, Default)]
//! struct Echo {
//!     out: OutputPort,
//! }
//!
//! impl Filter for Echo {
//!     fn clone_filter(&self) -> Box<dyn Filter> {
//!         Box::new(Echo::default())
//!     }
//!     fn chain(&mut self, output: OutputPort) {
//!         self.out = output;
//!     }
//!     fn reset(&mut self) {}
//!     fn process(&mut self, evt: Event) {
//!         self.out.emit(evt);
//!     }
//!     fn dump(&self) -> &'static str {
//!         "echo"
//!     }
//! }
//!
//! struct Sink;
//! impl Input for Sink {
//!     fn input(self: Rc<Self>, _evt: Event) {}
//! }
//!
//! let layout = PipelineLayout::new("demo", LayoutType::Named);
//! layout.append(Box::new(Echo::default()));
//! layout.bind();
//!
//! let downstream = OutputPort::new();
//! downstream.chain(Rc::new(Sink));
//! let pipeline = layout.alloc(Context::default(), downstream).expect("bound layout");
//! pipeline.head().input(Event::message_start());
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub use bytes::Bytes;

/// Re-export of `conduit-core`: the event-streaming kernel.
pub use conduit_core as core;

/// Re-export of `conduit-bgp`: the BGP-4 wire codec built on the kernel.
#[cfg(feature = "bgp")]
pub use conduit_bgp as bgp;

/// Re-export of `conduit-haproxy`: the PROXY protocol header decoder built
/// on the kernel.
#[cfg(feature = "haproxy")]
pub use conduit_haproxy as haproxy;

/// Development helper for enabling `tracing` output in examples/tests.
/// Never called by library code itself (§10.1: no crate here installs a
/// global subscriber on the caller's behalf).
pub mod dev_tracing;
