//! RTP packet framing per RFC 3550 §5.1.
//!
//! Only the fixed 12-byte header is used — no CSRC list, no header
//! extensions, no padding. That's all the dialer ever sends or needs to
//! read back.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const RTP_VERSION: u8 = 2;
pub const HEADER_LEN: usize = 12;

/// An RTP packet: the fixed header plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Serialize to the 12-byte header followed by the payload.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        // V=2, P=0, X=0, CC=0
        buf.put_u8((RTP_VERSION << 6) | 0);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a packet from a received datagram.
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::MalformedPacket(format!(
                "packet of {} bytes shorter than {HEADER_LEN}-byte header",
                data.len()
            )));
        }
        let byte0 = data[0];
        let version = byte0 >> 6;
        if version != RTP_VERSION {
            return Err(Error::MalformedPacket(format!(
                "unsupported RTP version {version}"
            )));
        }
        let cc = (byte0 & 0x0F) as usize;
        let byte1 = data[1];
        let marker = (byte1 & 0x80) != 0;
        let payload_type = byte1 & 0x7F;

        let mut rest = data.split_off(2);
        let sequence_number = rest.get_u16();
        let timestamp = rest.get_u32();
        let ssrc = rest.get_u32();

        let csrc_bytes = cc * 4;
        if rest.len() < csrc_bytes {
            return Err(Error::MalformedPacket(
                "CSRC list runs past end of packet".into(),
            ));
        }
        rest.advance(csrc_bytes);

        Ok(RtpPacket {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            payload: rest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_fields() {
        let pkt = RtpPacket {
            marker: true,
            payload_type: 0,
            sequence_number: 4242,
            timestamp: 160_000,
            ssrc: 0xDEADBEEF,
            payload: Bytes::from_static(&[1, 2, 3, 4]),
        };
        let bytes = pkt.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN + 4);
        let parsed = RtpPacket::parse(bytes).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn marker_bit_is_isolated_from_payload_type() {
        let pkt = RtpPacket {
            marker: true,
            payload_type: 8,
            sequence_number: 1,
            timestamp: 160,
            ssrc: 1,
            payload: Bytes::new(),
        };
        let bytes = pkt.to_bytes();
        assert_eq!(bytes[1] & 0x7F, 8);
        assert_eq!(bytes[1] & 0x80, 0x80);
    }

    #[test]
    fn rejects_short_packet() {
        let err = RtpPacket::parse(Bytes::from_static(&[0u8; 4])).unwrap_err();
        assert!(matches!(err, Error::MalformedPacket(_)));
    }
}
