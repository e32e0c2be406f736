//! Fluent builders for outbound SIP requests and responses.
//!
//! Mirrors the shape of a typed SIP message builder: each header has a
//! dedicated setter, `Max-Forwards`, `User-Agent`, and `Content-Length` are
//! filled in automatically, and every transaction gets a fresh branch ID.

use crate::message::{Method, SipMessage};
use bytes::Bytes;
use rand::Rng;

/// Default `Max-Forwards` value per spec.
pub const MAX_FORWARDS: u32 = 70;

/// Generate a transaction branch parameter per RFC 3261 §8.1.1.7: the
/// `z9hG4bK` magic cookie followed by randomness unique to this
/// transaction.
pub fn generate_branch() -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("z9hG4bK{suffix:016x}")
}

/// Generate a random `From`/`To` tag.
pub fn generate_tag() -> String {
    let value: u64 = rand::thread_rng().gen();
    format!("{value:016x}")
}

/// Generate a globally unique `Call-ID` local part (the caller supplies the
/// `@host` half, or omits it for a UUID-only id).
pub fn generate_call_id(host: &str) -> String {
    let value: u128 = rand::thread_rng().gen();
    format!("{value:032x}@{host}")
}

/// Builder for an outbound SIP request.
pub struct RequestBuilder {
    message: SipMessage,
    user_agent: &'static str,
}

impl RequestBuilder {
    /// Start building `method uri SIP/2.0`, filling in the headers every
    /// request needs (`Max-Forwards`, `User-Agent`).
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        let mut message = SipMessage::new_request(method, uri);
        message.add_header("Max-Forwards", MAX_FORWARDS.to_string());
        Self {
            message,
            user_agent: "dialer-engine/0.1",
        }
    }

    /// Override the default `User-Agent` string.
    pub fn user_agent(mut self, ua: &'static str) -> Self {
        self.user_agent = ua;
        self
    }

    /// Add a `Via` header with a fresh branch, for the given local
    /// transport address and `rport` support.
    pub fn via(mut self, transport: &str, local_addr: &str) -> Self {
        let branch = generate_branch();
        self.message.add_header(
            "Via",
            format!("SIP/2.0/{transport} {local_addr};branch={branch};rport"),
        );
        self
    }

    pub fn from_header(mut self, display_name: Option<&str>, uri: &str, tag: &str) -> Self {
        let value = match display_name {
            Some(name) => format!("\"{name}\" <{uri}>;tag={tag}"),
            None => format!("<{uri}>;tag={tag}"),
        };
        self.message.add_header("From", value);
        self
    }

    pub fn to_header(mut self, display_name: Option<&str>, uri: &str, tag: Option<&str>) -> Self {
        let mut value = match display_name {
            Some(name) => format!("\"{name}\" <{uri}>"),
            None => format!("<{uri}>"),
        };
        if let Some(tag) = tag {
            value.push_str(&format!(";tag={tag}"));
        }
        self.message.add_header("To", value);
        self
    }

    pub fn call_id(mut self, call_id: &str) -> Self {
        self.message.add_header("Call-ID", call_id.to_string());
        self
    }

    /// `CSeq`. ACK and CANCEL must reuse the INVITE's sequence number per
    /// RFC 3261 — callers are responsible for passing the right `seq`.
    pub fn cseq(mut self, seq: u32) -> Self {
        let method = self.message.method().cloned().unwrap_or(Method::Options);
        self.message
            .add_header("CSeq", format!("{seq} {method}"));
        self
    }

    pub fn contact(mut self, contact_uri: &str) -> Self {
        self.message
            .add_header("Contact", format!("<{contact_uri}>"));
        self
    }

    pub fn expires(mut self, seconds: u32) -> Self {
        self.message.add_header("Expires", seconds.to_string());
        self
    }

    pub fn authorization(mut self, value: String) -> Self {
        self.message.add_header("Authorization", value);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.add_header(name, value);
        self
    }

    pub fn sdp_body(mut self, sdp: String) -> Self {
        self.message
            .add_header("Content-Type", "application/sdp".to_string());
        self.message.body = Bytes::from(sdp.into_bytes());
        self
    }

    /// Finish the message, inserting `User-Agent` and `Content-Length`
    /// (computed from whatever body was attached) as the last headers.
    pub fn build(mut self) -> SipMessage {
        self.message
            .add_header("User-Agent", self.user_agent.to_string());
        self.message
            .add_header("Content-Length", self.message.body.len().to_string());
        self.message
    }
}

/// Builder for an outbound SIP response.
pub struct ResponseBuilder {
    message: SipMessage,
}

impl ResponseBuilder {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            message: SipMessage {
                start_line: crate::message::StartLine::Response {
                    status,
                    reason: reason.into(),
                },
                headers: Vec::new(),
                body: Bytes::new(),
            },
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.add_header(name, value);
        self
    }

    pub fn build(mut self) -> SipMessage {
        self.message
            .add_header("Content-Length", self.message.body.len().to_string());
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_has_magic_cookie() {
        assert!(generate_branch().starts_with("z9hG4bK"));
    }

    #[test]
    fn builds_register_with_required_headers() {
        let msg = RequestBuilder::new(Method::Register, "sip:pbx.example.com")
            .via("UDP", "10.0.0.5:5060")
            .from_header(None, "sip:1005@pbx.example.com", &generate_tag())
            .to_header(None, "sip:1005@pbx.example.com", None)
            .call_id("abc@10.0.0.5")
            .cseq(1)
            .expires(300)
            .build();
        assert_eq!(msg.header("Max-Forwards"), Some("70"));
        assert!(msg.header("User-Agent").is_some());
        assert_eq!(msg.header("Content-Length"), Some("0"));
    }
}
