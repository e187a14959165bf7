//! Pipeline [`Filter`] wrapping the PROXY protocol decoder (§6, "Filter/script
//! interface"; §8 scenario 4).
//!
//! `HaproxyDecoder` sits on an ingress leg: once the header parses, it emits
//! a single `MessageStart` whose head carries the connect-callback
//! properties (`protocol`, `sourceAddress`, `sourcePort`, `targetAddress`,
//! `targetPort`), then forwards every subsequent byte as `Data` straight
//! through to the sub-pipeline unmodified — mirroring the reference
//! `Server::process` handing the remainder of the stream to
//! `Filter::output()` once the header is known.

use std::fmt;

use conduit_core::error::StreamErrorKind;
use conduit_core::event::{Event, PropertyBag, PropertyValue};
use conduit_core::filter::Filter;
use conduit_core::io::OutputPort;

use crate::message::ProxyHeader;
use crate::parser::Parser;

/// Decodes a PROXY protocol v1/v2 header off the front of a byte stream,
/// then forwards the remainder as an ordinary message body.
pub struct HaproxyDecoder {
    parser: Parser,
    out: OutputPort,
    header_started: bool,
}

impl Default for HaproxyDecoder {
    fn default() -> Self {
        Self {
            parser: Parser::new(),
            out: OutputPort::new(),
            header_started: false,
        }
    }
}

impl fmt::Debug for HaproxyDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HaproxyDecoder")
            .field("latched", &self.parser.is_latched())
            .field("header_started", &self.header_started)
            .finish()
    }
}

impl HaproxyDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn emit_header(&mut self, header: &ProxyHeader) {
        let mut head = PropertyBag::new();
        head.set("version", PropertyValue::Number(f64::from(header.version)));
        head.set(
            "command",
            PropertyValue::Str(if header.command == crate::message::Command::Local { "LOCAL" } else { "PROXY" }.into()),
        );
        head.set("protocol", PropertyValue::Str(header.protocol.name().into()));
        if let Some(addr) = &header.source_address {
            head.set("sourceAddress", PropertyValue::Str(addr.as_str().into()));
        }
        if let Some(port) = header.source_port {
            head.set("sourcePort", PropertyValue::Number(f64::from(port)));
        }
        if let Some(addr) = &header.target_address {
            head.set("targetAddress", PropertyValue::Str(addr.as_str().into()));
        }
        if let Some(port) = header.target_port {
            head.set("targetPort", PropertyValue::Number(f64::from(port)));
        }

        self.header_started = true;
        self.out.emit(Event::message_start_with_head(head));
    }
}

impl Filter for HaproxyDecoder {
    fn clone_filter(&self) -> Box<dyn Filter> {
        Box::new(Self::new())
    }

    fn chain(&mut self, output: OutputPort) {
        self.out = output;
    }

    fn reset(&mut self) {
        self.parser = Parser::new();
        self.header_started = false;
    }

    fn process(&mut self, evt: Event) {
        let Event::Data(mut data) = evt else {
            if let Event::StreamEnd(kind) = evt {
                if self.header_started {
                    self.out.emit(Event::message_end());
                }
                self.out.emit(Event::stream_end(kind));
            }
            return;
        };

        let result = self.parser.feed(&mut data);
        if let Some(header) = &result.header {
            self.emit_header(header);
        }
        if !result.payload.empty() {
            self.out.emit(Event::data(result.payload));
        }

        if self.parser.is_latched() {
            self.out.emit(Event::stream_end(StreamErrorKind::MalformedInput));
        }
    }

    fn dump(&self) -> &'static str {
        "haproxy-decoder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::buffer::Data;
    use conduit_core::filter::FilterSlot;
    use conduit_core::io::{Input, InputContext};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder {
        seen: RefCell<Vec<Event>>,
    }

    impl Input for Recorder {
        fn input(self: Rc<Self>, evt: Event) {
            self.seen.borrow_mut().push(evt);
        }
    }

    fn wire_with(payload: &[u8]) -> Vec<u8> {
        let mut wire = b"PROXY TCP4 1.2.3.4 5.6.7.8 11111 22222\r\n".to_vec();
        wire.extend_from_slice(payload);
        wire
    }

    #[test]
    fn decoder_emits_connect_head_then_forwards_payload_intact() {
        let slot = FilterSlot::new(Box::new(HaproxyDecoder::new()));
        let recorder = Rc::new(Recorder { seen: RefCell::new(Vec::new()) });
        let downstream = OutputPort::new();
        downstream.chain(recorder.clone());
        slot.chain(downstream);

        let wire = wire_with(b"hello world");
        InputContext::dispatch(slot.clone(), Event::data(Data::from(wire.as_slice())));
        InputContext::dispatch(slot.clone(), Event::stream_end(StreamErrorKind::Graceful));

        let seen = recorder.seen.borrow();
        assert_eq!(seen.len(), 3);

        assert!(seen[0].is_message_start());
        let Event::MessageStart(info) = &seen[0] else { panic!("expected MessageStart") };
        let head = info.head.as_ref().expect("head properties");
        assert_eq!(head.get("protocol"), Some(&PropertyValue::Str("TCP4".into())));
        assert_eq!(head.get("sourceAddress"), Some(&PropertyValue::Str("1.2.3.4".into())));
        assert_eq!(head.get("targetAddress"), Some(&PropertyValue::Str("5.6.7.8".into())));
        assert_eq!(head.get("sourcePort"), Some(&PropertyValue::Number(11111.0)));
        assert_eq!(head.get("targetPort"), Some(&PropertyValue::Number(22222.0)));

        assert_eq!(seen[1].as_data().unwrap().to_vec(), b"hello world");
        assert!(seen[2].is_message_end());
    }

    #[test]
    fn decoder_forwards_stream_end_without_a_leading_message_end_when_no_header_parsed() {
        let slot = FilterSlot::new(Box::new(HaproxyDecoder::new()));
        let recorder = Rc::new(Recorder { seen: RefCell::new(Vec::new()) });
        let downstream = OutputPort::new();
        downstream.chain(recorder.clone());
        slot.chain(downstream);

        InputContext::dispatch(slot.clone(), Event::stream_end(StreamErrorKind::Graceful));

        let seen = recorder.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_stream_end());
    }

    #[test]
    fn decoder_emits_stream_end_on_malformed_header() {
        let slot = FilterSlot::new(Box::new(HaproxyDecoder::new()));
        let recorder = Rc::new(Recorder { seen: RefCell::new(Vec::new()) });
        let downstream = OutputPort::new();
        downstream.chain(recorder.clone());
        slot.chain(downstream);

        InputContext::dispatch(slot.clone(), Event::data(Data::from(b"NOT A PROXY HEADER AT ALL HERE".as_slice())));

        let seen = recorder.seen.borrow();
        let last = seen.last().expect("at least one event");
        assert!(last.is_stream_end());
    }
}
