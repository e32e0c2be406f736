//! RFC 3550 RTP packet framing and session I/O (component C2).
//!
//! Binds a UDP socket from a configured port range, frames outbound audio
//! into 12-byte-header RTP packets with a monotonic sequence number and
//! timestamp, and runs a dedicated receive task per session. Codec
//! encode/decode and jitter buffering live one layer up, in
//! `dialer-media-core`.

pub mod error;
pub mod packet;
pub mod session;

pub use error::{Error, Result};
pub use packet::RtpPacket;
pub use session::{RtpSession, RtpSessionStatsSnapshot, SAMPLES_PER_FRAME};
