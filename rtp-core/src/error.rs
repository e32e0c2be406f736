//! Error types for RTP session management.

/// Errors raised by RTP packet framing and session I/O.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Header was shorter than the mandatory 12 bytes, or a reported
    /// CSRC/extension length ran past the buffer.
    #[error("malformed RTP packet: {0}")]
    MalformedPacket(String),

    /// No UDP port in the configured range could be bound.
    #[error("no available RTP port in range {start}-{end}")]
    NoAvailablePort {
        /// Start of the configured range.
        start: u16,
        /// End of the configured range.
        end: u16,
    },

    /// Binding the chosen port failed for a reason other than it being
    /// already in use (e.g. permission denied).
    #[error("failed to bind RTP socket: {0}")]
    Bind(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
