//! A single RTP media session: one UDP socket, one SSRC, one remote peer.

use crate::error::{Error, Result};
use crate::packet::RtpPacket;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Number of audio samples (and therefore the RTP timestamp increment)
/// carried by one 20 ms G.711 frame at 8 kHz.
pub const SAMPLES_PER_FRAME: u32 = 160;

/// Cumulative send/receive counters for a session.
#[derive(Debug, Default)]
pub struct RtpSessionStats {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
}

/// A point-in-time copy of [`RtpSessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpSessionStatsSnapshot {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
}

impl RtpSessionStats {
    fn snapshot(&self) -> RtpSessionStatsSnapshot {
        RtpSessionStatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Mutable per-frame sequencing state, held behind a single mutex so the
/// send path can never emit two frames with the same sequence number.
struct SendState {
    sequence_number: u16,
    timestamp: u32,
}

/// An RTP session bound to one local UDP port.
pub struct RtpSession {
    socket: Arc<UdpSocket>,
    local_port: u16,
    ssrc: u32,
    remote_addr: Mutex<Option<SocketAddr>>,
    send_state: Mutex<SendState>,
    stats: Arc<RtpSessionStats>,
}

impl RtpSession {
    /// Bind to the first free port in `[port_start, port_end]` on
    /// `local_ip`. Fails the whole session if none is free — callers treat
    /// this as fatal to the call, not retryable.
    pub async fn bind(local_ip: IpAddr, port_start: u16, port_end: u16) -> Result<Self> {
        for port in port_start..=port_end {
            let addr = SocketAddr::new(local_ip, port);
            match UdpSocket::bind(addr).await {
                Ok(socket) => {
                    let mut rng = rand::thread_rng();
                    debug!(port, "bound RTP session");
                    return Ok(Self {
                        socket: Arc::new(socket),
                        local_port: port,
                        ssrc: rng.gen(),
                        remote_addr: Mutex::new(None),
                        send_state: Mutex::new(SendState {
                            sequence_number: rng.gen(),
                            timestamp: rng.gen(),
                        }),
                        stats: Arc::new(RtpSessionStats::default()),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(Error::Bind(e)),
            }
        }
        Err(Error::NoAvailablePort {
            start: port_start,
            end: port_end,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn set_remote_addr(&self, addr: SocketAddr) {
        *self.remote_addr.lock() = Some(addr);
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote_addr.lock()
    }

    pub fn stats(&self) -> RtpSessionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Send one 20 ms frame of `payload` with the given payload type,
    /// advancing the session's sequence number by 1 and its timestamp by
    /// [`SAMPLES_PER_FRAME`]. Socket write errors are logged and swallowed
    /// — media loss is soft, not fatal (§4.2).
    pub async fn send_frame(&self, payload_type: u8, payload: Bytes, marker: bool) -> Result<()> {
        let Some(remote) = self.remote_addr() else {
            return Err(Error::MalformedPacket(
                "no remote address set for session".into(),
            ));
        };

        let (seq, ts) = {
            let mut state = self.send_state.lock();
            let seq = state.sequence_number;
            let ts = state.timestamp;
            state.sequence_number = state.sequence_number.wrapping_add(1);
            state.timestamp = state.timestamp.wrapping_add(SAMPLES_PER_FRAME);
            (seq, ts)
        };

        let packet = RtpPacket {
            marker,
            payload_type,
            sequence_number: seq,
            timestamp: ts,
            ssrc: self.ssrc,
            payload,
        };
        let bytes = packet.to_bytes();
        match self.socket.send_to(&bytes, remote).await {
            Ok(n) => {
                self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                trace!(seq, ts, n, "sent RTP frame");
            }
            Err(e) => warn!(error = %e, "RTP send failed, dropping frame"),
        }
        Ok(())
    }

    /// Spawn the receive task. `on_packet` is invoked for every
    /// successfully parsed packet; malformed datagrams are logged and
    /// dropped. The task runs until the socket errors out or is dropped.
    pub fn spawn_receive<F>(self: &Arc<Self>, on_packet: F) -> JoinHandle<()>
    where
        F: Fn(RtpPacket) + Send + Sync + 'static,
    {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                match session.socket.recv_from(&mut buf).await {
                    Ok((n, _from)) => {
                        session
                            .stats
                            .packets_received
                            .fetch_add(1, Ordering::Relaxed);
                        session
                            .stats
                            .bytes_received
                            .fetch_add(n as u64, Ordering::Relaxed);
                        match RtpPacket::parse(Bytes::copy_from_slice(&buf[..n])) {
                            Ok(packet) => on_packet(packet),
                            Err(e) => warn!(error = %e, "dropping malformed RTP packet"),
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "RTP receive socket error, stopping receive task");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn binds_within_port_range() {
        let session = RtpSession::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000, 40010)
            .await
            .unwrap();
        assert!((40000..=40010).contains(&session.local_port()));
    }

    #[tokio::test]
    async fn sequence_and_timestamp_are_monotonic() {
        let a = Arc::new(
            RtpSession::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 41000, 41010)
                .await
                .unwrap(),
        );
        let b = RtpSession::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 41011, 41020)
            .await
            .unwrap();
        a.set_remote_addr(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            b.local_port(),
        ));

        let first_seq = { a.send_state.lock().sequence_number };
        let first_ts = { a.send_state.lock().timestamp };
        a.send_frame(0, Bytes::from_static(&[0xFF; 160]), false)
            .await
            .unwrap();
        a.send_frame(0, Bytes::from_static(&[0xFF; 160]), false)
            .await
            .unwrap();
        let state = a.send_state.lock();
        assert_eq!(state.sequence_number, first_seq.wrapping_add(2));
        assert_eq!(
            state.timestamp,
            first_ts.wrapping_add(2 * SAMPLES_PER_FRAME)
        );
    }

    #[tokio::test]
    async fn exhausted_port_range_is_an_error() {
        // Bind the only port in a tiny range, then try again on the same range.
        let _first = RtpSession::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 42000, 42000)
            .await
            .unwrap();
        let err = RtpSession::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 42000, 42000)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAvailablePort { .. }));
    }
}
