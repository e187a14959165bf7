//! Conduit Core
//!
//! The event-streaming dataflow kernel: a typed event model over
//! ref-counted buffers, the pipeline/filter runtime that instantiates and
//! recycles filter graphs from pooled layouts, stream demultiplexing and
//! multiplexing, a generic deframing driver for byte-oriented wire
//! protocols, and the worker-thread model that owns one event loop per
//! core.
//!
//! - Buffers (`buffer`)
//! - Event model (`event`)
//! - Event linkage and re-entrancy discipline (`io`)
//! - Filter contract (`filter`)
//! - Pipeline templates and instances (`pipeline`)
//! - Stream demux (`demux`)
//! - Stream mux (`mux`)
//! - Deframing driver for wire decoders (`deframer`)
//! - Worker threads (`worker`)
//! - Error types (`error`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]

pub mod buffer;
pub mod config;
pub mod deframer;
pub mod demux;
pub mod error;
pub mod event;
pub mod filter;
pub mod io;
pub mod mux;
pub mod pipeline;
pub mod worker;

pub mod prelude {
    pub use crate::buffer::{Builder, Data, Producer, Reader};
    pub use crate::deframer::{DeframerCore, DeframerHandler};
    pub use crate::demux::DemuxCore;
    pub use crate::error::{CoreError, Result, StreamErrorKind};
    pub use crate::event::{Event, MessageEndInfo, MessageStartInfo, PropertyBag, PropertyValue};
    pub use crate::filter::{Filter, FilterSlot};
    pub use crate::io::{Input, InputContext, InputHandle, OutputPort};
    pub use crate::mux::{MergeStream, MuxCore, Session};
    pub use crate::pipeline::{
        Context, LayoutType, PipelineHandle, PipelineLayout, PipelineState, SubPipelineFactory,
    };
    pub use crate::worker::{Net, WorkerHandle, WorkerThread};
}
