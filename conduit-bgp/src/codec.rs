//! BGP-4 wire format: encode and whole-buffer decode (§4.6).
//!
//! `encode` never fails; fields that don't fit the wire format's length
//! bytes are clamped and logged (§4.6 "Failure semantics", §10.3).
//! `decode` is the simple, non-streaming half of the codec interface from
//! §6 (`decode(Data) -> list<Message>`) — it expects `data` to hold zero or
//! more complete messages back-to-back. [`crate::parser::Parser`] is the
//! streaming half, built on the same per-kind body parsers, for input that
//! arrives split across arbitrary chunk boundaries.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use conduit_core::buffer::Data;

use crate::config::{HEADER_LEN, MARKER, MAX_AS_PATH_SEGMENT_LEN, MAX_MESSAGE_LEN, MAX_PARAM_BLOCK_LEN, MAX_PATH_ATTR_LEN};
use crate::error::{BgpError, Result};
use crate::message::{
    AsPathSegment, AttrFlags, Message, MessageNotification, MessageOpen, MessageUpdate,
    OpenParameter, PathAttribute, Prefix,
};

/// Borrowing cursor over an already-contiguous body slice (the Deframer
/// driver hands `Parser` a fully-captured `Data` for BODY; this is where
/// it gets read field-by-field).
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(BgpError::Malformed("field truncated"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn ipv4(&mut self) -> Result<Ipv4Addr> {
        let b = self.take(4)?;
        Ok(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
    }
}

/// Validate a 19-byte header and return `(type_code, total_len)`.
pub(crate) fn parse_header(header: &[u8]) -> Result<(u8, u16)> {
    if header.len() < HEADER_LEN {
        return Err(BgpError::Malformed("short header"));
    }
    if header[0..16] != MARKER {
        return Err(BgpError::InvalidMarker);
    }
    let total_len = u16::from_be_bytes([header[16], header[17]]);
    let type_code = header[18];
    if (total_len as usize) < HEADER_LEN {
        return Err(BgpError::Malformed("length shorter than header"));
    }
    Ok((type_code, total_len))
}

/// Parse a message body given its already-validated type code.
pub(crate) fn decode_body(type_code: u8, body: &[u8]) -> Result<Message> {
    let mut cursor = Cursor::new(body);
    match type_code {
        1 => Ok(Message::Open(decode_open(&mut cursor)?)),
        2 => Ok(Message::Update(decode_update(&mut cursor)?)),
        3 => Ok(Message::Notification(decode_notification(&mut cursor)?)),
        4 => Ok(Message::Keepalive),
        other => Err(BgpError::UnknownMessageType(other)),
    }
}

fn decode_open(c: &mut Cursor<'_>) -> Result<MessageOpen> {
    let version = c.u8()?;
    let my_as = c.u16()?;
    let hold_time = c.u16()?;
    let identifier = c.ipv4()?;
    let param_len = c.u8()? as usize;
    let param_bytes = c.take(param_len)?;

    let mut capabilities = Vec::new();
    let mut parameters = Vec::new();
    let mut pc = Cursor::new(param_bytes);
    while pc.remaining() > 0 {
        let param_type = pc.u8()?;
        let len = pc.u8()? as usize;
        let value = pc.take(len)?;
        if param_type == 2 {
            let mut cc = Cursor::new(value);
            while cc.remaining() > 0 {
                let code = cc.u8()?;
                let clen = cc.u8()? as usize;
                let cval = cc.take(clen)?;
                capabilities.push((code, Bytes::copy_from_slice(cval)));
            }
        } else {
            parameters.push(OpenParameter {
                param_type,
                value: Bytes::copy_from_slice(value),
            });
        }
    }

    Ok(MessageOpen {
        version,
        my_as,
        hold_time,
        identifier,
        capabilities,
        parameters,
    })
}

fn decode_prefixes(buf: &[u8]) -> Result<Vec<Prefix>> {
    let mut c = Cursor::new(buf);
    let mut out = Vec::new();
    while c.remaining() > 0 {
        let prefix_len = c.u8()?;
        let nbytes = (prefix_len as usize).div_ceil(8);
        let bytes = c.take(nbytes)?;
        let mut octets = [0u8; 4];
        octets[..nbytes].copy_from_slice(bytes);
        out.push(Prefix::new(prefix_len, Ipv4Addr::from(octets)));
    }
    Ok(out)
}

fn decode_path_attributes(buf: &[u8]) -> Result<Vec<PathAttribute>> {
    let mut c = Cursor::new(buf);
    let mut out = Vec::new();
    while c.remaining() > 0 {
        let flags = AttrFlags::from_byte(c.u8()?);
        let type_code = c.u8()?;
        let len = if flags.extended_length {
            c.u16()? as usize
        } else {
            c.u8()? as usize
        };
        let value = c.take(len)?;
        out.push(decode_one_attribute(flags, type_code, value)?);
    }
    Ok(out)
}

fn decode_one_attribute(flags: AttrFlags, type_code: u8, value: &[u8]) -> Result<PathAttribute> {
    Ok(match type_code {
        1 => {
            if value.len() != 1 {
                return Err(BgpError::Malformed("ORIGIN must be 1 byte"));
            }
            PathAttribute::Origin { flags, value: value[0] }
        }
        2 => {
            let mut vc = Cursor::new(value);
            let mut segments = Vec::new();
            while vc.remaining() > 0 {
                let segment_type = vc.u8()?;
                let count = vc.u8()? as usize;
                let mut as_numbers = Vec::with_capacity(count);
                for _ in 0..count {
                    as_numbers.push(vc.u16()?);
                }
                segments.push(AsPathSegment { segment_type, as_numbers });
            }
            PathAttribute::AsPath { flags, segments }
        }
        3 => {
            if value.len() != 4 {
                return Err(BgpError::Malformed("NEXT_HOP must be 4 bytes"));
            }
            PathAttribute::NextHop {
                flags,
                address: Ipv4Addr::new(value[0], value[1], value[2], value[3]),
            }
        }
        4 => {
            if value.len() != 4 {
                return Err(BgpError::Malformed("MULTI_EXIT_DISC must be 4 bytes"));
            }
            PathAttribute::MultiExitDisc {
                flags,
                value: u32::from_be_bytes([value[0], value[1], value[2], value[3]]),
            }
        }
        5 => {
            if value.len() != 4 {
                return Err(BgpError::Malformed("LOCAL_PREF must be 4 bytes"));
            }
            PathAttribute::LocalPref {
                flags,
                value: u32::from_be_bytes([value[0], value[1], value[2], value[3]]),
            }
        }
        6 => {
            if !value.is_empty() {
                return Err(BgpError::Malformed("ATOMIC_AGGREGATE must be empty"));
            }
            PathAttribute::AtomicAggregate { flags }
        }
        7 => {
            if value.len() != 6 {
                return Err(BgpError::Malformed("AGGREGATOR must be 6 bytes"));
            }
            PathAttribute::Aggregator {
                flags,
                asn: u16::from_be_bytes([value[0], value[1]]),
                address: Ipv4Addr::new(value[2], value[3], value[4], value[5]),
            }
        }
        other => PathAttribute::Unknown {
            flags,
            type_code: other,
            value: Bytes::copy_from_slice(value),
        },
    })
}

fn decode_update(c: &mut Cursor<'_>) -> Result<MessageUpdate> {
    let withdrawn_len = c.u16()? as usize;
    let withdrawn_routes = decode_prefixes(c.take(withdrawn_len)?)?;

    let path_attr_len = c.u16()? as usize;
    let path_attributes = decode_path_attributes(c.take(path_attr_len)?)?;

    let nlri_len = c.remaining();
    let destinations = decode_prefixes(c.take(nlri_len)?)?;

    Ok(MessageUpdate {
        withdrawn_routes,
        path_attributes,
        destinations,
    })
}

fn decode_notification(c: &mut Cursor<'_>) -> Result<MessageNotification> {
    let error_code = c.u8()?;
    let error_subcode = c.u8()?;
    let remaining = c.remaining();
    let data = Bytes::copy_from_slice(c.take(remaining)?);
    Ok(MessageNotification::new(error_code, error_subcode, data))
}

fn push_clamped_param(dst: &mut BytesMut, param_type: u8, value: &[u8]) {
    let len = value.len().min(MAX_PARAM_BLOCK_LEN);
    if len < value.len() {
        tracing::warn!(param_type, actual = value.len(), "BGP encode: parameter value clamped");
    }
    dst.put_u8(param_type);
    dst.put_u8(len as u8);
    dst.extend_from_slice(&value[..len]);
}

fn encode_open(open: &MessageOpen, buf: &mut BytesMut) {
    buf.put_u8(open.version);
    buf.put_u16(open.my_as);
    buf.put_u16(open.hold_time);
    buf.extend_from_slice(&open.identifier.octets());

    let mut params = BytesMut::new();

    if !open.capabilities.is_empty() {
        let mut cap_value = BytesMut::new();
        for (code, value) in &open.capabilities {
            let len = value.len().min(MAX_PARAM_BLOCK_LEN);
            if len < value.len() {
                tracing::warn!(code, actual = value.len(), "BGP encode: capability value clamped");
            }
            cap_value.put_u8(*code);
            cap_value.put_u8(len as u8);
            cap_value.extend_from_slice(&value[..len]);
        }
        push_clamped_param(&mut params, 2, &cap_value);
    }

    for param in &open.parameters {
        push_clamped_param(&mut params, param.param_type, &param.value);
    }

    let param_len = params.len().min(MAX_PARAM_BLOCK_LEN);
    if param_len < params.len() {
        tracing::warn!(actual = params.len(), "BGP encode: parameter block clamped");
    }
    buf.put_u8(param_len as u8);
    buf.extend_from_slice(&params[..param_len]);
}

fn encode_prefix(buf: &mut BytesMut, prefix: &Prefix) {
    let nbytes = (prefix.prefix_len as usize).div_ceil(8).min(4);
    let mut octets = prefix.prefix.octets();
    let used_bits = (prefix.prefix_len as usize) % 8;
    if used_bits != 0 && nbytes > 0 {
        let mask = 0xffu8 << (8 - used_bits);
        octets[nbytes - 1] &= mask;
    }
    buf.put_u8(prefix.prefix_len);
    buf.extend_from_slice(&octets[..nbytes]);
}

fn encode_path_attribute(buf: &mut BytesMut, attr: &PathAttribute) {
    let mut value = BytesMut::new();
    match attr {
        PathAttribute::Origin { value: v, .. } => value.put_u8(*v),
        PathAttribute::AsPath { segments, .. } => {
            for seg in segments {
                let count = seg.as_numbers.len().min(MAX_AS_PATH_SEGMENT_LEN);
                if count < seg.as_numbers.len() {
                    tracing::warn!(actual = seg.as_numbers.len(), "BGP encode: AS_PATH segment clamped");
                }
                value.put_u8(seg.segment_type);
                value.put_u8(count as u8);
                for asn in seg.as_numbers.iter().take(count) {
                    value.put_u16(*asn);
                }
            }
        }
        PathAttribute::NextHop { address, .. } => value.extend_from_slice(&address.octets()),
        PathAttribute::MultiExitDisc { value: v, .. } | PathAttribute::LocalPref { value: v, .. } => {
            value.put_u32(*v);
        }
        PathAttribute::AtomicAggregate { .. } => {}
        PathAttribute::Aggregator { asn, address, .. } => {
            value.put_u16(*asn);
            value.extend_from_slice(&address.octets());
        }
        PathAttribute::Unknown { value: v, .. } => value.extend_from_slice(v),
    }

    let mut flags = attr.flags();
    let clamped_len = value.len().min(MAX_PATH_ATTR_LEN);
    if clamped_len < value.len() {
        tracing::warn!(type_code = attr.type_code(), actual = value.len(), "BGP encode: path attribute value clamped");
    }
    flags.extended_length = clamped_len > 0xff;

    buf.put_u8(flags.to_byte());
    buf.put_u8(attr.type_code());
    if flags.extended_length {
        buf.put_u16(clamped_len as u16);
    } else {
        buf.put_u8(clamped_len as u8);
    }
    buf.extend_from_slice(&value[..clamped_len]);
}

fn encode_update(update: &MessageUpdate, buf: &mut BytesMut) {
    // Three independent scratch buffers, concatenated in a fixed order
    // (withdrawn, then path attributes, then NLRI) — carried forward from
    // the reference encoder (§10.5).
    let mut withdrawn = BytesMut::new();
    for p in &update.withdrawn_routes {
        encode_prefix(&mut withdrawn, p);
    }
    buf.put_u16(withdrawn.len() as u16);
    buf.extend_from_slice(&withdrawn);

    let mut attrs = BytesMut::new();
    for a in &update.path_attributes {
        encode_path_attribute(&mut attrs, a);
    }
    buf.put_u16(attrs.len() as u16);
    buf.extend_from_slice(&attrs);

    let mut nlri = BytesMut::new();
    for p in &update.destinations {
        encode_prefix(&mut nlri, p);
    }
    buf.extend_from_slice(&nlri);
}

fn encode_notification(notification: &MessageNotification, buf: &mut BytesMut) {
    buf.put_u8(notification.error_code);
    buf.put_u8(notification.error_subcode);
    buf.extend_from_slice(&notification.data);
}

/// Encode one message to its wire form. Never fails; over-size fields are
/// clamped per §4.6/§10.3 and logged, not rejected.
#[must_use]
pub fn encode(msg: &Message) -> Data {
    let mut body = BytesMut::new();
    match msg {
        Message::Open(open) => encode_open(open, &mut body),
        Message::Update(update) => encode_update(update, &mut body),
        Message::Notification(notification) => encode_notification(notification, &mut body),
        Message::Keepalive => {}
    }

    let total_len = (HEADER_LEN + body.len()).min(MAX_MESSAGE_LEN);
    let body_cap = total_len - HEADER_LEN;
    if body.len() > body_cap {
        tracing::warn!(
            kind = msg.kind_name(),
            actual = body.len(),
            clamped = body_cap,
            "BGP encode: message truncated to MAX_MESSAGE_LEN"
        );
        body.truncate(body_cap);
    }

    let mut header = BytesMut::with_capacity(HEADER_LEN);
    header.extend_from_slice(&MARKER);
    header.put_u16(total_len as u16);
    header.put_u8(msg.type_code());

    let mut out = Data::new();
    out.push_bytes(header.freeze());
    out.push_bytes(body.freeze());
    out
}

/// Decode zero or more complete, back-to-back messages from `data`.
///
/// # Errors
///
/// Returns the first [`BgpError`] encountered; a truncated trailing
/// message is `Malformed`, an unrecognized top-level type is
/// `UnknownMessageType`.
pub fn decode(data: &Data) -> Result<Vec<Message>> {
    let mut reader = data.reader();
    let mut out = Vec::new();
    while !reader.eof() {
        let mut header = [0u8; HEADER_LEN];
        if reader.read(HEADER_LEN, &mut header) < HEADER_LEN {
            return Err(BgpError::Malformed("truncated header"));
        }
        let (type_code, total_len) = parse_header(&header)?;
        let body_len = total_len as usize - HEADER_LEN;
        let mut body = vec![0u8; body_len];
        if reader.read(body_len, &mut body) < body_len {
            return Err(BgpError::Malformed("truncated body"));
        }
        out.push(decode_body(type_code, &body)?);
    }
    Ok(out)
}
