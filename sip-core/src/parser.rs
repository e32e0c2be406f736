//! SIP message tokenizer.
//!
//! Splits a raw datagram into a start line, headers, and body. Line breaks
//! are accepted as CRLF or bare LF — some PBXes (and plenty of test
//! harnesses) are not strict about it, so the parser is not either.

use crate::error::{Error, Result};
use crate::message::{Header, Method, SipMessage, StartLine};
use bytes::Bytes;

/// Parse a complete SIP message (start line + headers + body) from bytes.
pub fn parse(input: &[u8]) -> Result<SipMessage> {
    let text = String::from_utf8_lossy(input);
    let mut lines = split_lines(&text);

    let start_line_raw = lines
        .next()
        .ok_or_else(|| Error::Malformed("empty message".into()))?;
    let start_line = parse_start_line(start_line_raw)?;

    let mut headers = Vec::new();
    let mut header_bytes_consumed = start_line_raw.len() + 2;
    let mut body_start_text_len = None;

    for line in lines.by_ref() {
        header_bytes_consumed += line.len() + 2;
        if line.is_empty() {
            body_start_text_len = Some(header_bytes_consumed);
            break;
        }
        headers.push(parse_header_line(line)?);
    }

    let body = match body_start_text_len {
        Some(_) => extract_body(&text, &headers),
        None => Bytes::new(),
    };

    if let Some(declared) = content_length(&headers) {
        if declared != body.len() {
            // Some UAs pad with trailing CRLFs beyond the declared length;
            // only the first `declared` bytes are the real body.
            if declared < body.len() {
                return Ok(SipMessage {
                    start_line,
                    headers,
                    body: body.slice(0..declared),
                });
            }
            return Err(Error::ContentLengthMismatch {
                declared,
                actual: body.len(),
            });
        }
    }

    Ok(SipMessage {
        start_line,
        headers,
        body,
    })
}

/// Split `text` into lines on CRLF or bare LF, without including the
/// terminator in each yielded line.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l))
}

fn parse_start_line(line: &str) -> Result<StartLine> {
    if let Some(rest) = line.strip_prefix("SIP/2.0 ") {
        let mut parts = rest.splitn(2, ' ');
        let status: u16 = parts
            .next()
            .ok_or_else(|| Error::Malformed("missing status code".into()))?
            .parse()
            .map_err(|_| Error::Malformed(format!("invalid status code in {line:?}")))?;
        let reason = parts.next().unwrap_or("").to_string();
        return Ok(StartLine::Response { status, reason });
    }

    let mut parts = line.splitn(3, ' ');
    let method = parts
        .next()
        .ok_or_else(|| Error::Malformed("empty request line".into()))?;
    let uri = parts
        .next()
        .ok_or_else(|| Error::Malformed(format!("missing request-uri in {line:?}")))?;
    let version = parts.next().unwrap_or("");
    if !version.starts_with("SIP/2.0") {
        return Err(Error::Malformed(format!(
            "unsupported SIP version in {line:?}"
        )));
    }
    Ok(StartLine::Request {
        method: Method::parse(method),
        uri: uri.to_string(),
    })
}

fn parse_header_line(line: &str) -> Result<Header> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Error::Malformed(format!("header line without colon: {line:?}")))?;
    Ok(Header {
        name: name.trim().to_string(),
        value: value.trim().to_string(),
    })
}

fn content_length(headers: &[Header]) -> Option<usize> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("Content-Length") || h.name.eq_ignore_ascii_case("l"))
        .and_then(|h| h.value.parse().ok())
}

/// Re-locate the body in the *original byte buffer* rather than the
/// lossily-decoded text, so binary bodies (there are none in this
/// protocol's SDP case, but defensively) survive round-trip intact.
fn extract_body(text: &str, _headers: &[Header]) -> Bytes {
    match text.find("\r\n\r\n") {
        Some(idx) => Bytes::copy_from_slice(text[idx + 4..].as_bytes()),
        None => match text.find("\n\n") {
            Some(idx) => Bytes::copy_from_slice(text[idx + 2..].as_bytes()),
            None => Bytes::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_register_request() {
        let raw = b"REGISTER sip:pbx.example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bK123\r\n\
From: <sip:1005@pbx.example.com>;tag=abc\r\n\
To: <sip:1005@pbx.example.com>\r\n\
Call-ID: xyz\r\n\
CSeq: 1 REGISTER\r\n\
Content-Length: 0\r\n\r\n";
        let msg = parse(raw).unwrap();
        assert_eq!(msg.method(), Some(&Method::Register));
        assert_eq!(msg.call_id(), Some("xyz"));
        assert_eq!(msg.from_tag().as_deref(), Some("abc"));
    }

    #[test]
    fn parses_response_with_lf_only() {
        let raw = b"SIP/2.0 200 OK\nCall-ID: abc\nContent-Length: 0\n\n";
        let msg = parse(raw).unwrap();
        assert_eq!(msg.status(), Some(200));
        assert!(msg.is_success());
    }

    #[test]
    fn parses_body_with_content_length() {
        let sdp = b"v=0\r\no=- 1 1 IN IP4 10.0.0.5\r\ns=-\r\n";
        let mut raw = format!(
            "SIP/2.0 200 OK\r\nCall-ID: abc\r\nContent-Length: {}\r\n\r\n",
            sdp.len()
        )
        .into_bytes();
        raw.extend_from_slice(sdp);
        let msg = parse(&raw).unwrap();
        assert_eq!(msg.body.as_ref(), sdp);
    }

    #[test]
    fn rejects_mismatched_content_length() {
        let raw = b"SIP/2.0 200 OK\r\nCall-ID: abc\r\nContent-Length: 100\r\n\r\nshort";
        let err = parse(raw).unwrap_err();
        assert!(matches!(err, Error::ContentLengthMismatch { .. }));
    }
}
