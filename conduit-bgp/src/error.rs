//! BGP decode/encode failures (§10.2).
//!
//! Encode never fails (§4.6): over-size fields are clamped per §10.3's
//! tunables, logged at `tracing::warn!`, not represented as a [`BgpError`]
//! variant. Decode failures are represented here and, at the point they
//! cross into the core event model, converted into a
//! `conduit_core::error::StreamErrorKind::MalformedInput`.

use thiserror::Error;

/// Failures the BGP decoder can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BgpError {
    /// A field (header, parameter, attribute, prefix) ran out of bytes
    /// before it was fully read.
    #[error("malformed BGP message: {0}")]
    Malformed(&'static str),

    /// The header's type byte did not match any known message kind.
    #[error("unknown BGP message type {0}")]
    UnknownMessageType(u8),

    /// The header's marker field was not all `0xFF`.
    #[error("invalid BGP marker")]
    InvalidMarker,
}

impl BgpError {
    /// The RFC 4271 §6.1 NOTIFICATION `(code, subcode)` this failure maps
    /// to, used to synthesize the NOTIFICATION the decoder emits upstream
    /// when it latches (§4.6, §9 "Open question — `error()` in HEADER").
    #[must_use]
    pub const fn notification_code(&self) -> (u8, u8) {
        match self {
            // Message Header Error / Bad Message Type.
            Self::UnknownMessageType(_) => (1, 3),
            // Message Header Error / Connection Not Synchronized (bad
            // marker) and Bad Message Length (truncation) both surface
            // under the same top-level error class; subcode 0 matches the
            // sampled reference's undifferentiated `error(0, 0)` call for
            // anything it doesn't special-case.
            Self::InvalidMarker | Self::Malformed(_) => (0, 0),
        }
    }
}

/// Result type alias for BGP codec operations.
pub type Result<T> = std::result::Result<T, BgpError>;
