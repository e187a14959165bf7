//! Tunables owned by this codec crate (§4.6, §10.3).
//!
//! Like `conduit-core::config`, this module is wired into `lib.rs` with
//! `pub mod config;` — unlike the teacher's `monocoque-zmtp::config`, which
//! defined buffer-sizing constants but never actually declared itself as a
//! module (dead code); that omission is not carried forward here.

/// A BGP message's total on-wire length (19-byte header + body) is clamped
/// to this many bytes on encode; a header claiming more on decode fails
/// with `malformed_message`.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Fixed size of the BGP message header: 16 marker bytes + 2-byte length +
/// 1-byte type.
pub const HEADER_LEN: usize = 19;

/// The 16 marker bytes every BGP header must carry (all `0xFF`; BGP never
/// used the authentication scheme the marker field was reserved for).
pub const MARKER: [u8; 16] = [0xFF; 16];

/// An OPEN message's per-parameter value, and the parameter block as a
/// whole, are each clamped to this many bytes on encode (the wire format's
/// 1-byte parameter/block length field can express no more).
pub const MAX_PARAM_BLOCK_LEN: usize = 0xff;

/// An UPDATE path attribute's extended-length value is clamped to this many
/// bytes on encode (the wire format's 2-byte length field can express no
/// more).
pub const MAX_PATH_ATTR_LEN: usize = 0xffff;

/// AS_PATH segments are clamped to this many AS numbers on encode (the
/// wire format's 1-byte segment count field can express no more).
pub const MAX_AS_PATH_SEGMENT_LEN: usize = 0xff;
