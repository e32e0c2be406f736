use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("rtp session error: {0}")]
    Rtp(#[from] dialer_rtp_core::Error),
    #[error("unsupported codec payload type {0}")]
    UnsupportedPayloadType(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
