//! Conduit Core Error Types
//!
//! Comprehensive error handling for the event-streaming core, matching the
//! error kinds enumerated by the design (see crate-level docs).

use thiserror::Error;

/// Main error type for core operations that can fail synchronously.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Attempt to allocate a `Pipeline` from a `PipelineLayout` that has not
    /// been bound yet.
    #[error("pipeline layout {name:?} is not bound")]
    UnboundLayout { name: String },

    /// A demuxer or muxer refused a new inbound message because it is
    /// shutting down.
    #[error("shutdown in progress on {component}")]
    ShutdownInProgress { component: &'static str },

    /// An internal invariant was violated (stream-list underflow, a head
    /// stream that doesn't exist, etc). This is a bug, not a protocol or I/O
    /// condition, and is fatal to the owning worker thread.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),

    /// Wraps a protocol-level decode failure surfaced by a codec crate
    /// (e.g. `conduit-bgp`) at the point it crosses into the core as a
    /// `StreamEnd`.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The subset of [`CoreError`] kinds (plus ordinary completion) that can
/// terminate an event stream. Carried inside `Event::StreamEnd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// The stream ended normally; no error occurred.
    Graceful,
    /// A protocol decoder could not parse the input.
    MalformedInput,
    /// The owning demuxer/muxer is shutting down and refused the message.
    ShutdownInProgress,
    /// An internal invariant was violated.
    InternalInvariant,
    /// The upstream I/O collaborator (socket/TLS/listener) reported an error.
    /// The core does not interpret this kind; it only forwards it.
    Io,
}

impl StreamErrorKind {
    /// Whether this kind represents an actual error (as opposed to graceful
    /// completion).
    #[must_use]
    pub const fn is_error(self) -> bool {
        !matches!(self, Self::Graceful)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graceful_is_not_an_error() {
        assert!(!StreamErrorKind::Graceful.is_error());
        assert!(StreamErrorKind::MalformedInput.is_error());
    }
}
