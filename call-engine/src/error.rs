//! Engine-wide error taxonomy (spec §7), aggregating each lower crate's
//! errors as a variant so the call manager and scheduler can dispatch on
//! kind without matching every inner error by hand.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("sip transport error: {0}")]
    Transport(#[from] dialer_dialog_core::Error),

    #[error("sip protocol error: {0}")]
    Protocol(#[from] dialer_sip_core::Error),

    #[error("rtp error: {0}")]
    Media(#[from] dialer_rtp_core::Error),

    #[error("media handler error: {0}")]
    MediaHandler(String),

    #[error("registration failed: {reason}")]
    Registration { reason: String },

    #[error("ivr error: {0}")]
    Ivr(String),

    #[error("call manager invariant violated: {0}")]
    Concurrency(String),

    #[error("repository error: {0}")]
    Persistence(String),
}

impl EngineError {
    /// Whether this is worth a bounded retry rather than a terminal
    /// failure (spec §7 propagation policy).
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Transport(e) => e.is_recoverable(),
            EngineError::Persistence(_) => true,
            EngineError::Configuration(_)
            | EngineError::Protocol(_)
            | EngineError::Media(_)
            | EngineError::MediaHandler(_)
            | EngineError::Registration { .. }
            | EngineError::Ivr(_)
            | EngineError::Concurrency(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
