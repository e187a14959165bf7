//! Pipeline [`Filter`]s wrapping the BGP codec (§6, "Filter/script
//! interface").
//!
//! `BgpDecoder` sits on an ingress leg: it turns a raw wire byte stream
//! into one `MessageStart`/`Data`/`MessageEnd` triple per decoded BGP
//! message. The `MessageStart` head carries the scalar properties a
//! script would want to branch on (`kind`, and per-kind fields such as
//! `version`/`myAS`/`holdTime`/`identifier` for OPEN); the accompanying
//! `Data` carries the message's canonical wire encoding, so anything
//! needing full structural fidelity (UPDATE's attribute/prefix lists,
//! NOTIFICATION's trailing data) gets it losslessly via
//! [`crate::codec::decode`] rather than a second, lossy property
//! projection.
//!
//! `BgpEncoder` is the thin egress-side counterpart: it unwraps a
//! decoded-message triple back down to its `Data` payload for a
//! transport sink, dropping the head/tail wrapping.

use std::fmt;

use conduit_core::error::StreamErrorKind;
use conduit_core::event::{Event, PropertyBag, PropertyValue};
use conduit_core::filter::Filter;
use conduit_core::io::OutputPort;

use crate::codec;
use crate::message::Message;
use crate::parser::Parser;

/// Decodes a raw BGP-4 byte stream into per-message event triples.
pub struct BgpDecoder {
    parser: Parser,
    out: OutputPort,
}

impl Default for BgpDecoder {
    fn default() -> Self {
        Self {
            parser: Parser::new(),
            out: OutputPort::new(),
        }
    }
}

impl fmt::Debug for BgpDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BgpDecoder")
            .field("latched", &self.parser.is_latched())
            .finish()
    }
}

impl BgpDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn emit_message(&self, msg: &Message) {
        let mut head = PropertyBag::new();
        head.set("kind", PropertyValue::Str(msg.kind_name().into()));
        match msg {
            Message::Open(open) => {
                head.set("version", PropertyValue::Number(f64::from(open.version)));
                head.set("myAS", PropertyValue::Number(f64::from(open.my_as)));
                head.set("holdTime", PropertyValue::Number(f64::from(open.hold_time)));
                head.set("identifier", PropertyValue::Str(open.identifier.to_string().into()));
            }
            Message::Update(update) => {
                head.set("withdrawnCount", PropertyValue::Number(update.withdrawn_routes.len() as f64));
                head.set("pathAttributeCount", PropertyValue::Number(update.path_attributes.len() as f64));
                head.set("destinationCount", PropertyValue::Number(update.destinations.len() as f64));
            }
            Message::Notification(notification) => {
                head.set("errorCode", PropertyValue::Number(f64::from(notification.error_code)));
                head.set("errorSubcode", PropertyValue::Number(f64::from(notification.error_subcode)));
            }
            Message::Keepalive => {}
        }

        self.out.emit(Event::message_start_with_head(head));
        self.out.emit(Event::data(codec::encode(msg)));
        self.out.emit(Event::message_end());
    }
}

impl Filter for BgpDecoder {
    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self::new())
    }

    fn chain(&mut self, output: OutputPort) {
        self.out = output;
    }

    fn reset(&mut self) {
        self.parser = Parser::new();
    }

    fn process(&mut self, evt: Event) {
        let Event::Data(mut data) = evt else {
            // Upstream framing events carry no bytes of their own; each
            // decoded BGP message gets its own triple emitted below, so
            // there is nothing to forward here except a StreamEnd.
            if let Event::StreamEnd(kind) = evt {
                self.out.emit(Event::stream_end(kind));
            }
            return;
        };

        for msg in self.parser.feed(&mut data) {
            self.emit_message(&msg);
        }

        if self.parser.is_latched() {
            self.out.emit(Event::stream_end(StreamErrorKind::MalformedInput));
        }
    }

    fn dump(&self) -> &'static str {
        "bgp-decoder"
    }
}

/// Unwraps a decoded-message triple back to its wire-encoded `Data`, for
/// an egress leg writing to a transport sink.
#[derive(Debug, Default)]
pub struct BgpEncoder {
    out: OutputPort,
}

impl BgpEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for BgpEncoder {
    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self::new())
    }

    fn chain(&mut self, output: OutputPort) {
        self.out = output;
    }

    fn reset(&mut self) {}

    fn process(&mut self, evt: Event) {
        if let Event::Data(data) = evt {
            self.out.emit(Event::data(data));
        }
    }

    fn dump(&self) -> &'static str {
        "bgp-encoder"
    }
}
