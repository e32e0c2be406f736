//! G.711 codec, jitter buffer, AMD analyzer, and playback/DTMF handling
//! for one active call (components C1, C6, C7).

pub mod amd;
pub mod codec;
pub mod error;
pub mod jitter;
pub mod media_handler;

pub use amd::{AmdResult, AmdThresholds};
pub use codec::Variant;
pub use error::{Error, Result};
pub use jitter::JitterBuffer;
pub use media_handler::{DtmfCollectionResult, MediaHandler, PlaybackState};
