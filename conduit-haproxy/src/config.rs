//! Tunables owned by this codec crate (§4.5, §10.3).

/// The 12-byte magic that opens a v2 binary header
/// (`\r\n\r\n\0\r\nQUIT\n`).
pub const V2_SIGNATURE: [u8; 12] = [0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A];

/// A v1 ASCII header line is capped at this many bytes before a missing
/// CRLF is treated as malformed (mirrors the reference decoder's
/// `m_header_read_ptr >= 108` guard).
pub const V1_MAX_LINE_LEN: usize = 107;

/// Neither the v1 nor the v2 signature is recognizable once this many bytes
/// have been read without a match.
pub const SIGNATURE_DETECT_LIMIT: usize = 16;

/// The v2 binary header's address block (`length` field at bytes 14-15) is
/// clamped to this many bytes.
pub const V2_MAX_ADDRESS_LEN: usize = 216;
