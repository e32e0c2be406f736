//! Error types for SIP message parsing, building, and SDP handling.

/// Errors that can occur while parsing or building SIP/SDP messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input was not a SIP message at all (no request/status line).
    #[error("malformed SIP message: {0}")]
    Malformed(String),

    /// A required header was missing.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// A header was present but could not be parsed.
    #[error("invalid header {header}: {reason}")]
    InvalidHeader {
        /// Header name.
        header: &'static str,
        /// Why parsing failed.
        reason: String,
    },

    /// SDP body was malformed or missing a required line.
    #[error("invalid SDP: {0}")]
    InvalidSdp(String),

    /// `Content-Length` did not match the body actually present.
    #[error("content-length mismatch: header said {declared}, body was {actual}")]
    ContentLengthMismatch {
        /// Declared `Content-Length`.
        declared: usize,
        /// Actual number of bytes in the body.
        actual: usize,
    },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
