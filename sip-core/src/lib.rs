//! SIP message parsing, building, and SDP offer/answer.
//!
//! This crate is the wire-level layer (components C3 and C5 of the dialer
//! engine): it knows how to tokenize a datagram into a [`message::SipMessage`],
//! how to build outbound requests/responses with [`builder::RequestBuilder`],
//! and how to build/parse the single-`m=audio` SDP bodies the engine
//! exchanges. It has no concept of dialogs, transactions, or registration —
//! that lives in `dialer-dialog-core`.

pub mod builder;
pub mod error;
pub mod message;
pub mod sdp;

mod parser;

pub use error::{Error, Result};
pub use message::{Header, Method, SipMessage, StartLine};
pub use parser::parse;
