//! Streaming PROXY protocol decoder: a
//! [`conduit_core::deframer::DeframerHandler`] scanning byte-by-byte for
//! either header variant, then passing everything after the header straight
//! through (§4.5, §8 scenario 4).
//!
//! Grounded on the reference `haproxy::Server::process`: no captures are
//! ever scheduled (unlike the BGP parser's fixed-size reads) because the
//! reference scans one byte at a time until it recognizes a signature and,
//! for v1, until it finds the terminating CRLF — a length it cannot know in
//! advance. Once a header parses, [`DeframerCore::pass_all`] takes over and
//! every further byte is forwarded unexamined, mirroring `Server::process`
//! routing subsequent `Data` straight into the already-determined
//! sub-pipeline.

use std::net::Ipv4Addr;

use conduit_core::buffer::Data;
use conduit_core::deframer::{DeframerCore, DeframerHandler};

use crate::config::{SIGNATURE_DETECT_LIMIT, V1_MAX_LINE_LEN, V2_MAX_ADDRESS_LEN, V2_SIGNATURE};
use crate::error::HaproxyError;
use crate::message::{Command, Protocol, ProxyHeader};

const DETECT: i32 = 0;
const V1: i32 = 1;
const V2: i32 = 2;
const ERROR: i32 = -1;

/// One call to [`Parser::feed`]'s yield: at most one newly parsed header
/// (a connection carries exactly one), plus whatever payload bytes that
/// call passed through once the header was already known.
#[derive(Default)]
pub struct FeedResult {
    pub header: Option<ProxyHeader>,
    pub payload: Data,
}

/// Streaming PROXY protocol header decoder. One `Parser` per connection;
/// state persists across calls to [`Parser::feed`] so a header split across
/// TCP segments decodes identically to one delivered whole.
pub struct Parser {
    core: DeframerCore,
    header: Vec<u8>,
    address_len_v2: u16,
    result: Option<ProxyHeader>,
    passthrough: Data,
    error_detail: Option<HaproxyError>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: DeframerCore::new(DETECT),
            header: Vec::new(),
            address_len_v2: 0,
            result: None,
            passthrough: Data::new(),
            error_detail: None,
        }
    }

    /// Feed more wire bytes in. Returns any header this call completed
    /// along with any payload bytes it passed through once a header was
    /// already known (the two can both be populated in the same call, if
    /// trailing bytes in the same chunk followed the header).
    pub fn feed(&mut self, input: &mut Data) -> FeedResult {
        let mut core = std::mem::replace(&mut self.core, DeframerCore::new(DETECT));
        core.deframe(input, self);
        self.core = core;
        FeedResult {
            header: self.result.take(),
            payload: std::mem::replace(&mut self.passthrough, Data::new()),
        }
    }

    /// Whether the decoder has latched into its terminal error state.
    #[must_use]
    pub fn is_latched(&self) -> bool {
        self.core.is_error()
    }

    /// Take the error that caused the latch, if any. Sticky-cleared: a
    /// second call returns `None` even though `is_latched` stays `true`.
    pub fn take_error(&mut self) -> Option<HaproxyError> {
        self.error_detail.take()
    }

    fn fail(&mut self, err: HaproxyError) -> i32 {
        tracing::warn!(%err, "PROXY header parse failed");
        self.error_detail = Some(err);
        ERROR
    }

    fn finish_v1(&mut self, core: &mut DeframerCore) -> i32 {
        // Strip the trailing CRLF before tokenizing.
        let line = &self.header[..self.header.len() - 2];
        let Ok(text) = std::str::from_utf8(line) else {
            return self.fail(HaproxyError::MalformedV1("header is not valid UTF-8"));
        };

        let mut fields = text.split(' ');
        let _tag = fields.next(); // "PROXY"
        let Some(proto_word) = fields.next() else {
            return self.fail(HaproxyError::MalformedV1("missing protocol field"));
        };
        let protocol = match proto_word {
            "TCP4" => Protocol::Tcp4,
            "TCP6" => Protocol::Tcp6,
            "UNKNOWN" => Protocol::Unknown,
            _ => return self.fail(HaproxyError::MalformedV1("unrecognized protocol word")),
        };

        let header = if protocol == Protocol::Unknown {
            ProxyHeader::unaddressed(1, Command::Proxy, protocol)
        } else {
            let (Some(src_addr), Some(dst_addr), Some(src_port), Some(dst_port)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return self.fail(HaproxyError::MalformedV1("missing address/port field"));
            };
            let Ok(source_port) = src_port.parse::<u16>() else {
                return self.fail(HaproxyError::MalformedV1("source port is not a valid u16"));
            };
            let Ok(target_port) = dst_port.parse::<u16>() else {
                return self.fail(HaproxyError::MalformedV1("target port is not a valid u16"));
            };
            ProxyHeader {
                version: 1,
                command: Command::Proxy,
                protocol,
                source_address: Some(src_addr.to_string()),
                source_port: Some(source_port),
                target_address: Some(dst_addr.to_string()),
                target_port: Some(target_port),
            }
        };

        self.result = Some(header);
        core.pass_all(true);
        DETECT
    }

    fn finish_v2(&mut self, core: &mut DeframerCore) -> i32 {
        let version_nibble = (self.header[12] >> 4) & 0x0F;
        if version_nibble != 2 {
            return self.fail(HaproxyError::MalformedV2("version nibble must be 2"));
        }
        let command = match self.header[12] & 0x0F {
            0x0 => Command::Local,
            0x1 => Command::Proxy,
            other => return self.fail(HaproxyError::UnsupportedCommand(other)),
        };

        let (protocol, is_ipv6, is_unix) = match self.header[13] {
            0x00 => (Protocol::Unknown, false, false),
            0x11 => (Protocol::Tcp4, false, false),
            0x12 => (Protocol::Udp4, false, false),
            0x21 => (Protocol::Tcp6, true, false),
            0x22 => (Protocol::Udp6, true, false),
            0x31 => (Protocol::Unix, false, true),
            0x32 => (Protocol::UnixDgram, false, true),
            other => return self.fail(HaproxyError::UnsupportedFamily(other)),
        };

        let header = if is_ipv6 || is_unix || protocol == Protocol::Unknown {
            // The reference decoder's `parse_header_v2` leaves the IPv6 and
            // UNIX branches empty; addresses for those families are not
            // recovered here either (§10.5).
            ProxyHeader::unaddressed(2, command, protocol)
        } else {
            let body = &self.header[16..16 + self.address_len_v2 as usize];
            if body.len() < 12 {
                return self.fail(HaproxyError::MalformedV2("address block too short for IPv4"));
            }
            let source = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
            let target = Ipv4Addr::new(body[4], body[5], body[6], body[7]);
            ProxyHeader {
                version: 2,
                command,
                protocol,
                source_address: Some(source.to_string()),
                source_port: Some(u16::from_be_bytes([body[8], body[9]])),
                target_address: Some(target.to_string()),
                target_port: Some(u16::from_be_bytes([body[10], body[11]])),
            }
        };

        self.result = Some(header);
        core.pass_all(true);
        DETECT
    }
}

impl DeframerHandler for Parser {
    const ERROR_STATE: i32 = ERROR;

    fn on_state(&mut self, core: &mut DeframerCore, state: i32, last_byte: i32) -> i32 {
        match state {
            DETECT => {
                self.header.push(last_byte as u8);
                let n = self.header.len();
                if n == 6 && self.header == b"PROXY " {
                    return V1;
                }
                if n == 12 && self.header[..] == V2_SIGNATURE {
                    return V2;
                }
                if n > SIGNATURE_DETECT_LIMIT {
                    return self.fail(HaproxyError::UnrecognizedSignature);
                }
                DETECT
            }
            V1 => {
                self.header.push(last_byte as u8);
                let n = self.header.len();
                if n >= 2 && self.header[n - 2] == b'\r' && self.header[n - 1] == b'\n' {
                    return self.finish_v1(core);
                }
                if n > V1_MAX_LINE_LEN {
                    return self.fail(HaproxyError::LineTooLong);
                }
                V1
            }
            V2 => {
                self.header.push(last_byte as u8);
                let n = self.header.len();
                if n == 16 {
                    self.address_len_v2 = u16::from_be_bytes([self.header[14], self.header[15]]);
                    if self.address_len_v2 as usize > V2_MAX_ADDRESS_LEN {
                        return self.fail(HaproxyError::MalformedV2("address block length out of range"));
                    }
                }
                if n >= 16 && n == 16 + self.address_len_v2 as usize {
                    return self.finish_v2(core);
                }
                V2
            }
            _ => ERROR,
        }
    }

    fn on_pass(&mut self, _core: &mut DeframerCore, data: Data) {
        self.passthrough.push(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut Parser, chunks: &[&[u8]]) -> (Option<ProxyHeader>, Vec<u8>) {
        let mut header = None;
        let mut payload = Vec::new();
        for chunk in chunks {
            let mut data = Data::from(*chunk);
            let result = parser.feed(&mut data);
            if result.header.is_some() {
                header = result.header;
            }
            payload.extend_from_slice(&result.payload.to_vec());
        }
        (header, payload)
    }

    #[test]
    fn v1_header_with_trailing_payload_in_one_chunk() {
        let mut wire = b"PROXY TCP4 1.2.3.4 5.6.7.8 11111 22222\r\n".to_vec();
        wire.extend_from_slice(b"hello");

        let mut parser = Parser::new();
        let (header, payload) = feed_all(&mut parser, &[&wire]);
        let header = header.expect("header parsed");

        assert_eq!(header.version, 1);
        assert_eq!(header.protocol, Protocol::Tcp4);
        assert_eq!(header.source_address.as_deref(), Some("1.2.3.4"));
        assert_eq!(header.target_address.as_deref(), Some("5.6.7.8"));
        assert_eq!(header.source_port, Some(11111));
        assert_eq!(header.target_port, Some(22222));
        assert_eq!(payload, b"hello");
        assert!(!parser.is_latched());
    }

    #[test]
    fn v1_header_resumable_across_byte_at_a_time_splits() {
        let wire = b"PROXY TCP4 1.2.3.4 5.6.7.8 11111 22222\r\nhello";
        let byte_chunks: Vec<&[u8]> = wire.iter().map(std::slice::from_ref).collect();

        let mut parser = Parser::new();
        let (header, payload) = feed_all(&mut parser, &byte_chunks);
        assert_eq!(header.expect("header parsed").source_address.as_deref(), Some("1.2.3.4"));
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn v1_unknown_protocol_has_no_addresses() {
        let wire = b"PROXY UNKNOWN\r\n";
        let mut parser = Parser::new();
        let (header, _) = feed_all(&mut parser, &[wire]);
        let header = header.expect("header parsed");
        assert_eq!(header.protocol, Protocol::Unknown);
        assert_eq!(header.source_address, None);
    }

    #[test]
    fn v1_missing_crlf_past_limit_latches() {
        let mut wire = b"PROXY TCP4 ".to_vec();
        wire.extend(std::iter::repeat(b'1').take(200));
        let mut parser = Parser::new();
        let mut data = Data::from(wire.as_slice());
        let _ = parser.feed(&mut data);
        assert!(parser.is_latched());
        assert_eq!(parser.take_error(), Some(HaproxyError::LineTooLong));
    }

    #[test]
    fn v2_header_with_ipv4_addresses_and_trailing_payload() {
        let mut wire = V2_SIGNATURE.to_vec();
        wire.push(0x21); // version 2, command PROXY
        wire.push(0x11); // TCP4
        wire.extend_from_slice(&12u16.to_be_bytes());
        wire.extend_from_slice(&[10, 0, 0, 1]);
        wire.extend_from_slice(&[10, 0, 0, 2]);
        wire.extend_from_slice(&4321u16.to_be_bytes());
        wire.extend_from_slice(&80u16.to_be_bytes());
        wire.extend_from_slice(b"payload");

        let mut parser = Parser::new();
        let (header, payload) = feed_all(&mut parser, &[&wire]);
        let header = header.expect("header parsed");
        assert_eq!(header.version, 2);
        assert_eq!(header.command, Command::Proxy);
        assert_eq!(header.protocol, Protocol::Tcp4);
        assert_eq!(header.source_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(header.target_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(header.source_port, Some(4321));
        assert_eq!(header.target_port, Some(80));
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn v2_ipv6_family_is_recognized_without_decoded_addresses() {
        let mut wire = V2_SIGNATURE.to_vec();
        wire.push(0x21);
        wire.push(0x21); // TCP6
        wire.extend_from_slice(&0u16.to_be_bytes());

        let mut parser = Parser::new();
        let (header, _) = feed_all(&mut parser, &[&wire]);
        let header = header.expect("header parsed");
        assert_eq!(header.protocol, Protocol::Tcp6);
        assert_eq!(header.source_address, None);
    }

    #[test]
    fn unrecognized_signature_latches() {
        let wire = b"NOT A PROXY HEADER AT ALL HERE";
        let mut parser = Parser::new();
        let mut data = Data::from(wire.as_slice());
        let _ = parser.feed(&mut data);
        assert!(parser.is_latched());
        assert_eq!(parser.take_error(), Some(HaproxyError::UnrecognizedSignature));
    }

    #[test]
    fn latched_parser_makes_no_further_progress() {
        let wire = b"NOT A PROXY HEADER AT ALL HERE";
        let mut parser = Parser::new();
        let mut data = Data::from(wire.as_slice());
        let _ = parser.feed(&mut data);
        assert!(parser.is_latched());

        let mut more = Data::from(&b"PROXY TCP4 1.2.3.4 5.6.7.8 1 2\r\n"[..]);
        let result = parser.feed(&mut more);
        assert!(result.header.is_none());
        assert_eq!(more.size(), 33, "latched parser must not consume further input");
    }
}
