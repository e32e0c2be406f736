//! SDP offer/answer for a single `m=audio` line, PT 0/8/9 only.
//!
//! This is deliberately not a general SDP library: the dialer only ever
//! advertises G.711 µ-law/A-law and G.722 advertise-only, so the builder
//! and parser stay to what spec'd (§4.5).

use crate::error::{Error, Result};

/// A statically known RTP audio codec this engine can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub payload_type: u8,
    pub rtpmap_name: &'static str,
    pub clock_rate: u32,
}

pub const PCMU: CodecDescriptor = CodecDescriptor {
    payload_type: 0,
    rtpmap_name: "PCMU",
    clock_rate: 8000,
};
pub const PCMA: CodecDescriptor = CodecDescriptor {
    payload_type: 8,
    rtpmap_name: "PCMA",
    clock_rate: 8000,
};
pub const G722: CodecDescriptor = CodecDescriptor {
    payload_type: 9,
    rtpmap_name: "G722",
    clock_rate: 8000,
};

/// The codecs this engine ever advertises, in default preference order.
pub const DEFAULT_CODECS: [CodecDescriptor; 3] = [PCMU, PCMA, G722];

/// Result of parsing a remote SDP body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub connection_ip: Option<String>,
    pub port: Option<u16>,
    pub payload_types: Vec<u8>,
}

impl RemoteMedia {
    fn empty() -> Self {
        Self {
            connection_ip: None,
            port: None,
            payload_types: Vec::new(),
        }
    }

    /// Full remote RTP endpoint, if both IP and port were present.
    pub fn endpoint(&self) -> Option<(String, u16)> {
        match (&self.connection_ip, self.port) {
            (Some(ip), Some(port)) => Some((ip.clone(), port)),
            _ => None,
        }
    }
}

/// Build an SDP offer/answer body advertising `codecs` on `rtp_port`.
///
/// ```text
/// v=0
/// o=<username> <session-id> <version> IN IP4 <local_ip>
/// s=dialer-engine
/// c=IN IP4 <local_ip>
/// t=0 0
/// m=audio <rtp_port> RTP/AVP <pt...>
/// a=rtpmap:<pt> <name>/<clock>
/// ...
/// a=sendrecv
/// a=ptime:20
/// ```
pub fn build_session(
    username: &str,
    local_ip: &str,
    rtp_port: u16,
    session_id: u64,
    codecs: &[CodecDescriptor],
) -> String {
    let mut sdp = String::new();
    sdp.push_str("v=0\r\n");
    sdp.push_str(&format!(
        "o={username} {session_id} {session_id} IN IP4 {local_ip}\r\n"
    ));
    sdp.push_str("s=dialer-engine\r\n");
    sdp.push_str(&format!("c=IN IP4 {local_ip}\r\n"));
    sdp.push_str("t=0 0\r\n");
    let pts: Vec<String> = codecs.iter().map(|c| c.payload_type.to_string()).collect();
    sdp.push_str(&format!("m=audio {rtp_port} RTP/AVP {}\r\n", pts.join(" ")));
    for codec in codecs {
        sdp.push_str(&format!(
            "a=rtpmap:{} {}/{}\r\n",
            codec.payload_type, codec.rtpmap_name, codec.clock_rate
        ));
    }
    sdp.push_str("a=sendrecv\r\n");
    sdp.push_str("a=ptime:20\r\n");
    sdp
}

/// Parse a remote SDP body, extracting the connection address, the first
/// `m=audio` port, and its advertised payload types.
pub fn parse(sdp: &str) -> Result<RemoteMedia> {
    if sdp.trim().is_empty() {
        return Err(Error::InvalidSdp("empty SDP body".into()));
    }

    let mut media = RemoteMedia::empty();
    let mut in_audio_media = false;

    for raw_line in sdp.split(['\n']) {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line).trim();

        if let Some(rest) = line.strip_prefix("c=") {
            // c=IN IP4 <addr>
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if parts.len() >= 3 {
                media.connection_ip = Some(parts[2].to_string());
            }
        } else if let Some(rest) = line.strip_prefix("m=") {
            in_audio_media = rest.starts_with("audio");
            if in_audio_media {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                if parts.len() >= 2 {
                    media.port = parts[1].parse().ok();
                }
                if parts.len() > 3 {
                    media.payload_types = parts[3..]
                        .iter()
                        .filter_map(|p| p.parse().ok())
                        .collect();
                }
            }
        } else if !in_audio_media {
            continue;
        }
    }

    if media.port.is_none() {
        return Err(Error::InvalidSdp("no m=audio line found".into()));
    }

    Ok(media)
}

/// Choose the first payload type in `preference_order` that the remote
/// side also advertised (§4.5: "first mutually supported PT wins").
pub fn negotiate(remote_pts: &[u8], preference_order: &[u8]) -> Option<u8> {
    preference_order
        .iter()
        .find(|pt| remote_pts.contains(pt))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_offer_with_default_codecs() {
        let sdp = build_session("dialer", "10.0.0.5", 40000, 1, &DEFAULT_CODECS);
        assert!(sdp.contains("m=audio 40000 RTP/AVP 0 8 9"));
        assert!(sdp.contains("a=rtpmap:0 PCMU/8000"));
        assert!(sdp.contains("a=ptime:20"));
    }

    #[test]
    fn parses_remote_sdp() {
        let sdp = "v=0\r\no=- 1 1 IN IP4 192.168.1.50\r\ns=-\r\nc=IN IP4 192.168.1.50\r\nt=0 0\r\nm=audio 10000 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\n";
        let remote = parse(sdp).unwrap();
        assert_eq!(remote.connection_ip.as_deref(), Some("192.168.1.50"));
        assert_eq!(remote.port, Some(10000));
        assert_eq!(remote.payload_types, vec![0, 8]);
        assert_eq!(remote.endpoint(), Some(("192.168.1.50".to_string(), 10000)));
    }

    #[test]
    fn negotiates_first_mutual_codec() {
        assert_eq!(negotiate(&[8, 0], &[0, 8, 9]), Some(0));
        assert_eq!(negotiate(&[8], &[0, 8, 9]), Some(8));
        assert_eq!(negotiate(&[99], &[0, 8, 9]), None);
    }

    #[test]
    fn rejects_sdp_without_audio_media() {
        let sdp = "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\n";
        assert!(parse(sdp).is_err());
    }
}
