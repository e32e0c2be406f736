//! SIP registration and INVITE dialog state machine (component C4).
//!
//! Owns one UDP [`transport::SipTransport`] per registered identity,
//! layered with a [`registration::Registrar`] for REGISTER/refresh and
//! one [`dialog::Dialog`] per call. SDP offer/answer and wire framing
//! live in `dialer-sip-core`; this crate is the state machine on top.

pub mod dialog;
pub mod error;
pub mod registration;
pub mod transport;

mod digest;

pub use dialog::{Dialog, DialogState, InviteOutcome};
pub use error::{Error, Result};
pub use registration::{Registrar, RegistrationConfig, RegistrationStatus};
pub use transport::{InboundRequest, SipTransport};
