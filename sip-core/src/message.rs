//! SIP request/response message types.
//!
//! A [`SipMessage`] is either a [`Request`] or a [`Response`] plus an
//! ordered list of headers and an opaque body. Headers keep their original
//! insertion order and allow duplicates (e.g. multiple `Via`), matching how
//! SIP messages are actually laid out on the wire.

use bytes::Bytes;
use std::fmt;

/// SIP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Register,
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Info,
    /// Any method not enumerated above, kept verbatim.
    Other(String),
}

impl Method {
    /// Parse a method token from a request line.
    pub fn parse(token: &str) -> Self {
        match token {
            "REGISTER" => Method::Register,
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            "INFO" => Method::Info,
            other => Method::Other(other.to_string()),
        }
    }

    /// The wire representation of this method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Info => "INFO",
            Method::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either side of a SIP message: the request line or the status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: Method, uri: String },
    Response { status: u16, reason: String },
}

/// A single header, preserving the exact name casing as it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// A parsed (or about-to-be-serialized) SIP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipMessage {
    pub start_line: StartLine,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl SipMessage {
    /// Construct an empty request with no headers and no body.
    pub fn new_request(method: Method, uri: impl Into<String>) -> Self {
        Self {
            start_line: StartLine::Request {
                method,
                uri: uri.into(),
            },
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// True if this message is a request.
    pub fn is_request(&self) -> bool {
        matches!(self.start_line, StartLine::Request { .. })
    }

    /// The method of a request, if this is one.
    pub fn method(&self) -> Option<&Method> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    /// The status code of a response, if this is one.
    pub fn status(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    /// Whether a response status is provisional (1xx).
    pub fn is_provisional(&self) -> bool {
        matches!(self.status(), Some(s) if (100..200).contains(&s))
    }

    /// Whether a response status is a final success (2xx).
    pub fn is_success(&self) -> bool {
        matches!(self.status(), Some(s) if (200..300).contains(&s))
    }

    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// All header values matching `name`, in order, case-insensitively.
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Append a header, keeping any existing ones with the same name.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Call-ID header value, if present.
    pub fn call_id(&self) -> Option<&str> {
        self.header("Call-ID")
    }

    /// Extract the `tag=` parameter from the `From` header.
    pub fn from_tag(&self) -> Option<String> {
        self.header("From").and_then(extract_tag)
    }

    /// Extract the `tag=` parameter from the `To` header.
    pub fn to_tag(&self) -> Option<String> {
        self.header("To").and_then(extract_tag)
    }

    /// Parse the `CSeq` header into `(sequence, method)`.
    pub fn cseq(&self) -> Option<(u32, Method)> {
        let raw = self.header("CSeq")?;
        let mut parts = raw.split_whitespace();
        let seq: u32 = parts.next()?.parse().ok()?;
        let method = Method::parse(parts.next()?);
        Some((seq, method))
    }

    /// The `branch=` parameter of the topmost `Via`, if any.
    pub fn top_via_branch(&self) -> Option<String> {
        self.header("Via").and_then(|v| extract_param(v, "branch"))
    }

    /// Serialize this message to its wire form (CRLF line endings).
    pub fn to_bytes(&self) -> Bytes {
        let mut out = String::new();
        match &self.start_line {
            StartLine::Request { method, uri } => {
                out.push_str(&format!("{} {} SIP/2.0\r\n", method, uri));
            }
            StartLine::Response { status, reason } => {
                out.push_str(&format!("SIP/2.0 {} {}\r\n", status, reason));
            }
        }
        for h in &self.headers {
            out.push_str(&format!("{}: {}\r\n", h.name, h.value));
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        Bytes::from(bytes)
    }
}

/// Extract a `tag=` (or other) parameter value from a header like
/// `"Alice" <sip:alice@example.com>;tag=abc123`.
fn extract_tag(header_value: &str) -> Option<String> {
    extract_param(header_value, "tag")
}

/// Extract `name=value` from a `;`-delimited parameter list, tolerating
/// surrounding whitespace and quoted values.
pub fn extract_param(header_value: &str, name: &str) -> Option<String> {
    for segment in header_value.split(';').skip(1) {
        let segment = segment.trim();
        if let Some(rest) = segment.strip_prefix(name) {
            let rest = rest.trim_start();
            if let Some(value) = rest.strip_prefix('=') {
                return Some(value.trim().trim_matches('"').to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tag_from_from_header() {
        let msg = SipMessage::new_request(Method::Invite, "sip:bob@example.com")
            .with_header("From", "\"Alice\" <sip:alice@example.com>;tag=abc123");
        assert_eq!(msg.from_tag().as_deref(), Some("abc123"));
    }

    #[test]
    fn parses_cseq() {
        let msg = SipMessage::new_request(Method::Invite, "sip:bob@example.com")
            .with_header("CSeq", "42 INVITE");
        let (seq, method) = msg.cseq().unwrap();
        assert_eq!(seq, 42);
        assert_eq!(method, Method::Invite);
    }

    #[test]
    fn serializes_with_crlf() {
        let msg = SipMessage::new_request(Method::Bye, "sip:bob@example.com")
            .with_header("Call-ID", "abc");
        let bytes = msg.to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("BYE sip:bob@example.com SIP/2.0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
