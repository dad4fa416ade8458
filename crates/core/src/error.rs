//! Error types for the streaming library.

use std::fmt;

/// Errors that can occur in the streaming library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Control protocol**: [`Parse`](Self::Parse) — malformed control
///   messages or media headers.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures, and
///   [`PartialSend`](Self::PartialSend) — a fragmented datagram send
///   that failed partway through a group.
/// - **Server**: [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// [`StreamServer::start`](crate::StreamServer::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse a control message or a media packet header.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A multi-fragment send failed after `written` payload bytes went out.
    ///
    /// The receiver will evict the incomplete group once its reassembly
    /// window slides past it.
    #[error("datagram send failed after {written} payload bytes: {source}")]
    PartialSend {
        written: usize,
        source: std::io::Error,
    },
}

/// Specific kind of parse failure.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `METHOD resource version` shape.
    InvalidRequestLine,
    /// Method token is not one of the six supported methods.
    UnknownMethod,
    /// Sequence header value was not a number.
    InvalidSequence,
    /// Response status line was missing or had a non-numeric code.
    InvalidStatusLine,
    /// Media packet shorter than the 12-byte fixed header.
    ShortMediaHeader,
    /// Feedback packet shorter than its fixed 24-byte layout.
    ShortFeedbackPacket,
    /// Fragment header shorter than its 4-byte fixed part.
    ShortFragmentHeader,
    /// Fragment header length prefix disagrees with the bytes present.
    FragmentLengthMismatch,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::UnknownMethod => write!(f, "unknown method"),
            Self::InvalidSequence => write!(f, "invalid sequence header"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::ShortMediaHeader => write!(f, "short media packet header"),
            Self::ShortFeedbackPacket => write!(f, "short feedback packet"),
            Self::ShortFragmentHeader => write!(f, "short fragment header"),
            Self::FragmentLengthMismatch => write!(f, "fragment header length mismatch"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
