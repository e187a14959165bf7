//! PROXY protocol header decode failures (§10.2).

use thiserror::Error;

/// Failures the PROXY protocol decoder can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HaproxyError {
    /// Neither the v1 nor v2 signature matched within
    /// [`crate::config::SIGNATURE_DETECT_LIMIT`] bytes.
    #[error("unrecognized PROXY protocol signature")]
    UnrecognizedSignature,

    /// A v1 ASCII header line exceeded the maximum length without a
    /// terminating CRLF.
    #[error("PROXY v1 header line exceeded the maximum length")]
    LineTooLong,

    /// The v1 ASCII header was malformed in some other way (bad protocol
    /// word, missing address field, unparsable port).
    #[error("malformed PROXY v1 header: {0}")]
    MalformedV1(&'static str),

    /// The v2 binary header was malformed (bad version nibble, address
    /// block too short for the declared protocol).
    #[error("malformed PROXY v2 header: {0}")]
    MalformedV2(&'static str),

    /// The v2 header's command nibble was neither LOCAL (0) nor PROXY (1).
    #[error("unsupported PROXY v2 command {0}")]
    UnsupportedCommand(u8),

    /// The v2 header's address-family/protocol byte matched none of the
    /// values the spec defines.
    #[error("unsupported PROXY v2 address family/protocol byte 0x{0:02x}")]
    UnsupportedFamily(u8),
}

/// Result type alias for PROXY protocol codec operations.
pub type Result<T> = std::result::Result<T, HaproxyError>;
