use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sip message error: {0}")]
    Sip(#[from] dialer_sip_core::Error),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response received before timeout")]
    Timeout,
    #[error("registration rejected with status {status}")]
    RegistrationRejected { status: u16 },
    #[error("call rejected with status {status} {reason}")]
    CallRejected { status: u16, reason: String },
    #[error("malformed authentication challenge: {0}")]
    MalformedChallenge(String),
    #[error("dialog is not in a state that allows this operation: {0}")]
    InvalidState(&'static str),
}

impl Error {
    /// Whether the caller should treat this as worth retrying (e.g. a
    /// transient timeout) versus a terminal rejection.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Timeout | Error::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
