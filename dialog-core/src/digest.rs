//! RFC 2617 HTTP Digest authentication, as used for SIP 401/407 challenges.

use crate::error::{Error, Result};
use md5::{Digest, Md5};

/// Fields extracted from a `WWW-Authenticate` or `Proxy-Authenticate`
/// challenge header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
}

/// Pull `name="value"` (or `name=value`) out of a comma-separated
/// Digest-scheme parameter list. Unlike SIP URI parameters, these are
/// comma- not semicolon-delimited, so `sip_core::message::extract_param`
/// doesn't apply here.
fn extract_comma_param(header_value: &str, name: &str) -> Option<String> {
    for segment in header_value.split(',') {
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

/// Parse the realm and nonce out of a `Digest realm="...", nonce="...", ...`
/// header value. Order of parameters is not assumed.
pub fn parse_challenge(header_value: &str) -> Result<Challenge> {
    if !header_value.trim_start().starts_with("Digest") {
        return Err(Error::MalformedChallenge(header_value.to_string()));
    }
    let realm = extract_comma_param(header_value, "realm")
        .ok_or_else(|| Error::MalformedChallenge("missing realm".into()))?;
    let nonce = extract_comma_param(header_value, "nonce")
        .ok_or_else(|| Error::MalformedChallenge("missing nonce".into()))?;
    Ok(Challenge { realm, nonce })
}

fn hex_md5(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compute the `response` field of a digest `Authorization` header.
/// `qop` is intentionally unsupported — every registrar in this corpus
/// challenges with plain MD5 digest, not qop=auth.
pub fn compute_response(
    username: &str,
    realm: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce: &str,
) -> String {
    let ha1 = hex_md5(&format!("{username}:{realm}:{password}"));
    let ha2 = hex_md5(&format!("{method}:{uri}"));
    hex_md5(&format!("{ha1}:{nonce}:{ha2}"))
}

/// Build a full `Authorization: Digest ...` header value.
pub fn build_authorization_header(
    username: &str,
    realm: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce: &str,
) -> String {
    let response = compute_response(username, realm, password, method, uri, nonce);
    format!(
        "Digest username=\"{username}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", response=\"{response}\", algorithm=MD5"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_realm_and_nonce_from_challenge() {
        let header = r#"Digest realm="example.com", nonce="abc123", algorithm=MD5"#;
        let challenge = parse_challenge(header).unwrap();
        assert_eq!(challenge.realm, "example.com");
        assert_eq!(challenge.nonce, "abc123");
    }

    #[test]
    fn rejects_non_digest_challenge() {
        assert!(parse_challenge("Basic realm=\"x\"").is_err());
    }

    #[test]
    fn response_is_deterministic_for_fixed_inputs() {
        let a = compute_response("alice", "example.com", "secret", "REGISTER", "sip:example.com", "n1");
        let b = compute_response("alice", "example.com", "secret", "REGISTER", "sip:example.com", "n1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn response_changes_with_nonce() {
        let a = compute_response("alice", "example.com", "secret", "REGISTER", "sip:example.com", "n1");
        let b = compute_response("alice", "example.com", "secret", "REGISTER", "sip:example.com", "n2");
        assert_ne!(a, b);
    }
}
