//! Error types for SSE encoding, decoding and connections.
//!
//! Errors are split along the line callers care about: a [`ValidationError`]
//! means the caller handed us something we refuse to put on the wire (nothing
//! was written, the stream is still healthy), while [`Error::Io`] means the
//! transport itself failed and the connection should be considered dead.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for SSE operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An event (or payload) that cannot be encoded.
///
/// Validation errors are detected before any byte reaches the sink.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ValidationError {
    /// No event was supplied.
    #[error("sse: nil event")]
    NilEvent,

    /// The id contains NUL, CR or LF.
    #[error("sse: id contains forbidden char")]
    ForbiddenIdChar,

    /// The retry delay is negative.
    #[error("sse: retry must be >=0")]
    NegativeRetry,

    /// The event type contains CR or LF.
    #[error("sse: event contains newline")]
    EventContainsNewline,

    /// A raw payload is not valid UTF-8.
    #[error("sse: raw payload not valid UTF-8")]
    RawNotUtf8,

    /// A raw payload contains line breaks but was not marked for splitting.
    #[error("sse: raw data contains newlines but Split is false")]
    RawContainsNewline,

    /// A structured payload could not be serialized.
    #[error("sse: json encoding failed: {0}")]
    JsonEncoding(#[source] serde_json::Error),
}

/// Errors produced while decoding an event stream.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The stream ended cleanly on a frame boundary.
    #[error("sse: end of stream")]
    Eof,

    /// The stream ended in the middle of a frame; the partial frame was discarded.
    #[error("sse: unexpected EOF (truncated frame)")]
    UnexpectedEof,

    /// The underlying reader failed.
    #[error("sse: read failed: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// Returns true for the clean end-of-stream condition.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

/// Top-level error for encoders and connections.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The event or payload was rejected before anything was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Writing to or flushing the sink failed.
    #[error("sse: write failed: {0}")]
    Io(#[from] io::Error),

    /// The connection has already been closed.
    #[error("sse: connection closed")]
    Closed,

    /// The call's cancellation token fired before the write started.
    #[error("sse: send canceled")]
    Canceled,

    /// The call's deadline passed before the write started.
    #[error("sse: send deadline exceeded")]
    DeadlineExceeded,

    /// The response writer offers no way to flush incrementally.
    #[error("sse: response writer lacks flush support")]
    FlushUnsupported,

    /// The connection configuration is unusable.
    #[error("sse: invalid configuration: {0}")]
    Config(String),

    /// Parsing a frame failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Returns true if the error was caused by an invalid event or payload.
    ///
    /// The connection remains usable after a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if the call was aborted because the connection or the
    /// call's own context was already done.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Closed | Self::Canceled | Self::DeadlineExceeded)
    }
}
